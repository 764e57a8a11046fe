//! Client façade: directs writes to the head and reads to the protocol's
//! read replicas, emitting the history log lines that the external
//! linearizability checker consumes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cluster::{ChainTopology, ClusterConfig};
use crate::message::Message;
use crate::protocols::ChainProtocol;
use crate::transport::ConnectionStub;
use crate::utils::ChainKvError;

/// Client-side state shared by all workers: the stub plus routing info.
struct ClientShared {
    /// Transports to the head and every read target.
    stub: ConnectionStub,

    /// Name of the head replica (all writes go here).
    head: String,

    /// Read-target replica names: the tail alone for CR, every replica for
    /// CRAQ.
    read_targets: Vec<String>,

    /// Next read-target index, round-robin across all workers.
    next_read: AtomicU64,

    /// Next worker id to mint; ids are unique and monotonic.
    next_worker: AtomicU64,
}

impl ClientShared {
    fn pick_read_target(&self) -> &str {
        let idx = self.next_read.fetch_add(1, Ordering::Relaxed) as usize;
        &self.read_targets[idx % self.read_targets.len()]
    }
}

/// Handle to a launched cluster; mints sequential workers.
pub struct ChainClient {
    shared: Arc<ClientShared>,
}

impl ChainClient {
    pub(crate) fn new(
        protocol: ChainProtocol,
        topology: &ChainTopology,
        config: &ClusterConfig,
    ) -> Result<Self, ChainKvError> {
        let head = topology.head().name.clone();
        let read_targets: Vec<String> = match protocol {
            ChainProtocol::ChainRep => {
                vec![topology.tail_name().to_string()]
            }
            ChainProtocol::Craq => topology
                .replicas()
                .iter()
                .map(|info| info.name.clone())
                .collect(),
        };

        let mut peers = Vec::new();
        let mut seen = HashSet::new();
        for name in std::iter::once(&head).chain(read_targets.iter()) {
            if seen.insert(name.clone()) {
                peers.push((name.clone(), topology.addr_of(name)?));
            }
        }
        let stub = ConnectionStub::new(
            "client",
            peers,
            config.pool_size,
            config.conn_retries,
        )?;

        Ok(ChainClient {
            shared: Arc::new(ClientShared {
                stub,
                head,
                read_targets,
                next_read: AtomicU64::new(0),
                next_worker: AtomicU64::new(0),
            }),
        })
    }

    /// Mints a new worker with a unique, monotonically increasing id. A
    /// worker has at most one request in flight at any time.
    pub fn worker(&self) -> ClientWorker {
        let id = self.shared.next_worker.fetch_add(1, Ordering::Relaxed);
        ClientWorker {
            id,
            tag: format!("worker_{}", id),
            shared: self.shared.clone(),
        }
    }
}

/// One strictly sequential client worker. Both operations take `&mut self`,
/// so a single worker can never have two requests in flight.
pub struct ClientWorker {
    id: u64,
    tag: String,
    shared: Arc<ClientShared>,
}

impl ClientWorker {
    /// SET directed at the head. Returns whether the write was acknowledged
    /// by the whole chain. Only successful completions emit the `Set` line.
    pub async fn set(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<bool, ChainKvError> {
        log::info!(target: &self.tag, "Setting {} = {}", key, value);
        let reply = self
            .shared
            .stub
            .send(&self.shared.head, &Message::set_req(key, value))
            .await?;

        if reply.is_ok() {
            log::info!(target: &self.tag, "Set {} = {}", key, value);
            Ok(true)
        } else {
            pf_warn!(&self.tag; "SET {} rejected: {:?}", key, reply.reason());
            Ok(false)
        }
    }

    /// GET directed at this variant's read replicas, round-robin. Returns
    /// `None` if the replica rejected the read.
    pub async fn get(
        &mut self,
        key: &str,
    ) -> Result<Option<String>, ChainKvError> {
        let target = self.shared.pick_read_target().to_string();
        self.get_from(&target, key).await
    }

    /// GET directed at a specific read replica.
    pub async fn get_from(
        &mut self,
        replica: &str,
        key: &str,
    ) -> Result<Option<String>, ChainKvError> {
        log::info!(target: &self.tag, "Getting {}", key);
        let reply = self
            .shared
            .stub
            .send(replica, &Message::get_req(key))
            .await?;

        match reply.value() {
            Some(value) if reply.is_ok() => {
                log::info!(target: &self.tag, "Get {} = {}", key, value);
                Ok(Some(value.to_string()))
            }
            _ => {
                pf_warn!(&self.tag;
                         "GET {} rejected: {:?}", key, reply.reason());
                Ok(None)
            }
        }
    }

    /// This worker's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod client_tests {
    use super::*;
    use crate::server::ServerInfo;

    fn test_topology(protocol: ChainProtocol) -> ChainTopology {
        let infos = vec![
            ServerInfo::new("a", "127.0.0.1", 21901),
            ServerInfo::new("b", "127.0.0.1", 21902),
            ServerInfo::new("c", "127.0.0.1", 21903),
        ];
        ChainTopology::chain(protocol, infos).unwrap()
    }

    #[test]
    fn worker_ids_unique_and_monotonic() -> Result<(), ChainKvError> {
        let client = ChainClient::new(
            ChainProtocol::ChainRep,
            &test_topology(ChainProtocol::ChainRep),
            &ClusterConfig::default(),
        )?;
        for expected in 0..4 {
            let worker = client.worker();
            assert_eq!(worker.id(), expected);
        }
        Ok(())
    }

    #[test]
    fn cr_reads_only_from_tail() -> Result<(), ChainKvError> {
        let client = ChainClient::new(
            ChainProtocol::ChainRep,
            &test_topology(ChainProtocol::ChainRep),
            &ClusterConfig::default(),
        )?;
        assert_eq!(client.shared.read_targets, vec!["c".to_string()]);
        for _ in 0..3 {
            assert_eq!(client.shared.pick_read_target(), "c");
        }
        Ok(())
    }

    #[test]
    fn craq_reads_round_robin_all_replicas() -> Result<(), ChainKvError> {
        let client = ChainClient::new(
            ChainProtocol::Craq,
            &test_topology(ChainProtocol::Craq),
            &ClusterConfig::default(),
        )?;
        assert_eq!(client.shared.read_targets.len(), 3);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(client.shared.pick_read_target().to_string());
        }
        assert_eq!(seen.len(), 3);
        Ok(())
    }
}
