//! Replication variant: CRAQ (Chain Replication with Apportioned Queries).
//!
//! Writes flow head to tail under a per-key clean/dirty version discipline;
//! reads are served by any replica, falling back to a version query against
//! the tail when the local copy is dirty. Reference:
//!   - <https://www.usenix.org/legacy/event/usenix09/tech/full_papers/terrace/terrace.pdf>

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::cr::UNSET_VALUE;
use crate::message::{Message, MsgType};
use crate::server::{GenericReplica, ServerInfo};
use crate::transport::ConnectionStub;
use crate::utils::ChainKvError;

/// Per-key version counter, assigned by the head.
pub(crate) type Version = u64;

/// Entry state in the clean/dirty discipline.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum EntryState {
    /// Committed at the tail.
    Clean,

    /// Pending tail commit.
    Dirty,
}

/// One versioned value of a key.
#[derive(Debug, Clone)]
struct VersionedValue {
    value: String,
    state: EntryState,
}

/// All live versions of one key, oldest first. Invariants: at most one
/// entry is clean; every dirty entry is newer than the clean one; marking a
/// version clean evicts all strictly lower versions.
#[derive(Debug, Default)]
struct KeyEntries {
    entries: BTreeMap<Version, VersionedValue>,
}

impl KeyEntries {
    /// Largest version present for this key.
    fn latest_version(&self) -> Option<Version> {
        self.entries.keys().next_back().copied()
    }

    /// The unique clean version, if one exists.
    fn clean_version(&self) -> Option<Version> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.state == EntryState::Clean)
            .map(|(&ver, _)| ver)
    }

    /// Whether any pending version exists.
    fn has_dirty(&self) -> bool {
        self.entries
            .values()
            .any(|entry| entry.state == EntryState::Dirty)
    }

    /// Value stored at an exact version.
    fn value_at(&self, ver: Version) -> Option<&str> {
        self.entries.get(&ver).map(|entry| entry.value.as_str())
    }

    /// Value of the lowest version still present. By the eviction invariant
    /// its version is never lower than the tail's committed one, which makes
    /// it the fallback when a just-committed version got evicted locally.
    fn oldest_value(&self) -> Option<&str> {
        self.entries.values().next().map(|entry| entry.value.as_str())
    }

    /// Appends a pending version.
    fn insert_dirty(&mut self, ver: Version, value: String) {
        self.entries.insert(
            ver,
            VersionedValue {
                value,
                state: EntryState::Dirty,
            },
        );
    }

    /// Marks `ver` clean and evicts all strictly lower versions. No-op if
    /// `ver` is no longer present (a newer commit already evicted it).
    fn mark_clean(&mut self, ver: Version) {
        match self.entries.get_mut(&ver) {
            Some(entry) => entry.state = EntryState::Clean,
            None => return,
        }
        self.entries.retain(|&v, _| v >= ver);
    }

    /// Installs a committed version at the tail. Versions define the commit
    /// order, so a version older than the newest one present is already
    /// superseded and must not resurrect evicted state; it is simply
    /// dropped (its acknowledgement still flows upstream).
    fn commit_latest(&mut self, ver: Version, value: String) {
        if self.latest_version().is_some_and(|latest| latest > ver) {
            return;
        }
        self.entries.insert(
            ver,
            VersionedValue {
                value,
                state: EntryState::Clean,
            },
        );
        self.entries.retain(|&v, _| v >= ver);
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let clean: Vec<Version> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == EntryState::Clean)
            .map(|(&ver, _)| ver)
            .collect();
        assert!(clean.len() <= 1, "more than one clean version: {:?}", clean);
        if let Some(&clean_ver) = clean.first() {
            assert!(
                self.entries.keys().all(|&ver| ver >= clean_ver),
                "version older than the clean one survived eviction"
            );
        }
    }
}

/// CRAQ replica. The tail is the sole serializer of commit order: a write
/// is committed the moment the tail applies it clean, and every dirty read
/// resolves its version against the tail, pinning the result to a specific
/// point in that order. The handler task that forwarded a write suspends
/// until the downstream acknowledgement arrives, then flips its own
/// `(key, version)` dirty entry clean.
pub struct CraqReplica {
    /// This replica's identity.
    info: ServerInfo,

    /// Predecessor name; `None` at the head.
    prev: Option<String>,

    /// Successor name; `None` at the tail.
    next: Option<String>,

    /// Name of the tail, the commit-order serializer.
    tail: String,

    /// Stub holding the transports for this replica's outgoing edges.
    stub: Arc<ConnectionStub>,

    /// Versioned key-value store.
    store: Mutex<HashMap<String, KeyEntries>>,
}

impl CraqReplica {
    pub(crate) fn new(
        info: ServerInfo,
        stub: Arc<ConnectionStub>,
        prev: Option<String>,
        next: Option<String>,
        tail: String,
    ) -> Self {
        CraqReplica {
            info,
            prev,
            next,
            tail,
            stub,
            store: Mutex::new(HashMap::new()),
        }
    }

    fn is_head(&self) -> bool {
        self.prev.is_none()
    }

    fn is_tail(&self) -> bool {
        self.next.is_none()
    }

    /// SET entrance: version presence distinguishes client writes (none,
    /// head-bound) from forwarded writes (stamped by the head).
    async fn handle_set(
        &self,
        req: Message,
    ) -> Result<Message, ChainKvError> {
        let key = match req.key() {
            Some(key) => key.to_string(),
            None => return Ok(Message::err_reply("SET missing key field")),
        };
        let value = match req.value() {
            Some(value) => value.to_string(),
            None => return Ok(Message::err_reply("SET missing value field")),
        };

        if self.is_head() && req.version().is_some() {
            return Ok(Message::err_reply(
                "client SET must not carry a version",
            ));
        }
        if !self.is_head() && req.version().is_none() {
            return Ok(Message::err_reply("SET served only by the head"));
        }

        match self.next.clone() {
            None => Ok(self.apply_set_tail(req.version(), key, value)),
            Some(next) => self.relay_set(req, &next, key, value).await,
        }
    }

    /// Tail write application: straight to clean, no pending state. A
    /// chain of length one makes the head and tail the same replica, in
    /// which case the version is assigned right here.
    fn apply_set_tail(
        &self,
        req_version: Option<Version>,
        key: String,
        value: String,
    ) -> Message {
        let mut store = self.store.lock().unwrap();
        let entries = store.entry(key.clone()).or_default();
        let version = match req_version {
            Some(ver) => ver,
            None => entries.latest_version().map_or(1, |ver| ver + 1),
        };
        entries.commit_latest(version, value);
        drop(store);

        pf_debug!(&self.info.name; "committed {} @ v{}", key, version);
        Message::ok_with_version(version)
    }

    /// Non-tail write path: append dirty, forward, and on acknowledgement
    /// flip exactly the forwarded `(key, version)` clean.
    async fn relay_set(
        &self,
        mut req: Message,
        next: &str,
        key: String,
        value: String,
    ) -> Result<Message, ChainKvError> {
        let version = {
            let mut store = self.store.lock().unwrap();
            let entries = store.entry(key.clone()).or_default();
            let version = match req.version() {
                Some(ver) => ver,
                // the head assigns the next version for this key
                None => entries.latest_version().map_or(1, |ver| ver + 1),
            };
            entries.insert_dirty(version, value);
            version
        };
        req.set_version(version);
        pf_debug!(&self.info.name;
                  "appended dirty {} @ v{}, forwarding", key, version);

        // forward outside the lock; the reply is the downstream ack
        let ack = self.stub.send(next, &req).await?;
        if !ack.is_ok() {
            // commit never happened below us; leave the entry dirty and
            // surface the failure up the chain unchanged
            return Ok(ack);
        }

        {
            let mut store = self.store.lock().unwrap();
            if let Some(entries) = store.get_mut(&key) {
                entries.mark_clean(version);
            }
        }
        pf_debug!(&self.info.name; "marked clean {} @ v{}", key, version);
        Ok(Message::ok_with_version(version))
    }

    /// GET, servable by any replica: clean local copies answer directly;
    /// dirty ones resolve the committed version against the tail first.
    async fn handle_get(
        &self,
        req: &Message,
    ) -> Result<Message, ChainKvError> {
        let key = match req.key() {
            Some(key) => key,
            None => return Ok(Message::err_reply("GET missing key field")),
        };

        {
            let store = self.store.lock().unwrap();
            match store.get(key) {
                None => {
                    return Ok(Message::ok_with_value(UNSET_VALUE));
                }
                Some(entries) if !entries.has_dirty() => {
                    let value = entries
                        .clean_version()
                        .and_then(|ver| entries.value_at(ver))
                        .unwrap_or(UNSET_VALUE)
                        .to_string();
                    return Ok(Message::ok_with_value(&value));
                }
                Some(_) => {} // dirty: fall through to the version query
            }
        }

        // ask the tail which version of this key is committed
        pf_trace!(&self.info.name; "dirty read of {}, querying tail", key);
        let ver_reply =
            self.stub.send(&self.tail, &Message::version_req(key)).await?;
        if !ver_reply.is_ok() {
            return Ok(ver_reply);
        }
        let tail_ver = match ver_reply.version() {
            Some(ver) => ver,
            // nothing committed for this key yet
            None => return Ok(Message::ok_with_value(UNSET_VALUE)),
        };

        let mut store = self.store.lock().unwrap();
        let value = match store.get_mut(key) {
            None => UNSET_VALUE.to_string(),
            Some(entries) => match entries
                .value_at(tail_ver)
                .map(str::to_string)
            {
                Some(value) => {
                    // the tail has committed this version, so flipping it
                    // clean here cannot violate the mono-clean invariant
                    entries.mark_clean(tail_ver);
                    value
                }
                // the committed version was already evicted here by a newer
                // acknowledgement; the oldest surviving entry carries the
                // committed value of a version no older than the tail's
                None => entries
                    .oldest_value()
                    .unwrap_or(UNSET_VALUE)
                    .to_string(),
            },
        };
        Ok(Message::ok_with_value(&value))
    }

    /// VERSION query: only the tail answers, with the version of its
    /// committed entry. The `version` field is omitted for keys the tail
    /// has never stored; readers map that to the unset value.
    fn handle_version(&self, req: &Message) -> Message {
        if !self.is_tail() {
            return Message::err_reply("VERSION served only by the tail");
        }
        let key = match req.key() {
            Some(key) => key,
            None => return Message::err_reply("VERSION missing key field"),
        };

        let store = self.store.lock().unwrap();
        match store.get(key).and_then(KeyEntries::clean_version) {
            Some(ver) => Message::ok_with_version(ver),
            None => Message::ok_reply(),
        }
    }
}

#[async_trait]
impl GenericReplica for CraqReplica {
    fn info(&self) -> &ServerInfo {
        &self.info
    }

    async fn process_req(
        &self,
        req: Message,
    ) -> Result<Message, ChainKvError> {
        match req.msg_type() {
            Some(MsgType::Set) => self.handle_set(req).await,
            Some(MsgType::Get) => self.handle_get(&req).await,
            Some(MsgType::Version) => Ok(self.handle_version(&req)),
            None => Ok(Message::err_reply("unexpected message type")),
        }
    }
}
