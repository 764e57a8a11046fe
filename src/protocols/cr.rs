//! Replication variant: Chain Replication (CR).
//!
//! Writes install down the chain head to tail; acknowledgements fold back
//! tail to head as the replies of the forwarding requests. Reads are served
//! exclusively by the tail. Reference:
//!   - <https://www.cs.cornell.edu/home/rvr/papers/OSDI04.pdf>

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::message::{Message, MsgType};
use crate::server::{GenericReplica, ServerInfo};
use crate::transport::ConnectionStub;
use crate::utils::ChainKvError;

/// Value read for keys that were never set.
pub(crate) const UNSET_VALUE: &str = "0";

/// CR replica: a plain key-value map. Every write is totally ordered by its
/// arrival at the tail, every read observes the tail's state, and a write
/// acknowledges to the client only after the tail has applied it; the
/// handler task that forwarded a write suspends until the downstream reply
/// (the acknowledgement) arrives.
pub struct ChainRepReplica {
    /// This replica's identity.
    info: ServerInfo,

    /// Predecessor name; `None` at the head.
    prev: Option<String>,

    /// Successor name; `None` at the tail.
    next: Option<String>,

    /// Stub holding the transports for this replica's outgoing edges.
    stub: Arc<ConnectionStub>,

    /// Local key-value store.
    store: Mutex<HashMap<String, String>>,
}

impl ChainRepReplica {
    pub(crate) fn new(
        info: ServerInfo,
        stub: Arc<ConnectionStub>,
        prev: Option<String>,
        next: Option<String>,
    ) -> Self {
        ChainRepReplica {
            info,
            prev,
            next,
            stub,
            store: Mutex::new(HashMap::new()),
        }
    }

    fn is_tail(&self) -> bool {
        self.next.is_none()
    }

    /// SET: install locally, forward down the chain, and acknowledge
    /// upstream once the downstream acknowledgement folds back.
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

        pf_debug!(&self.info.name; "setting {} = {}", key, value);
        {
            let mut store = self.store.lock().unwrap();
            store.insert(key.clone(), value);
        }

        // forward outside the lock; the reply is the downstream ack
        if let Some(next) = &self.next {
            let ack = self.stub.send(next, &req).await?;
            if !ack.is_ok() {
                // surface the downstream failure up the chain unchanged
                return Ok(ack);
            }
        }

        match &self.prev {
            Some(prev) => {
                pf_debug!(&self.info.name;
                          "set {} acknowledged toward '{}'", key, prev);
            }
            None => {
                pf_debug!(&self.info.name;
                          "set {} acknowledged to client", key);
            }
        }
        Ok(Message::ok_reply())
    }

    /// GET: only the tail serves reads; its state is authoritative.
    fn handle_get(&self, req: &Message) -> Message {
        if !self.is_tail() {
            return Message::err_reply("GET served only by the tail");
        }
        let key = match req.key() {
            Some(key) => key,
            None => return Message::err_reply("GET missing key field"),
        };

        let store = self.store.lock().unwrap();
        let value = store
            .get(key)
            .cloned()
            .unwrap_or_else(|| UNSET_VALUE.to_string());
        Message::ok_with_value(&value)
    }
}

#[async_trait]
impl GenericReplica for ChainRepReplica {
    fn info(&self) -> &ServerInfo {
        &self.info
    }

    async fn process_req(
        &self,
        req: Message,
    ) -> Result<Message, ChainKvError> {
        match req.msg_type() {
            Some(MsgType::Set) => self.handle_set(req).await,
            Some(MsgType::Get) => Ok(self.handle_get(&req)),
            Some(MsgType::Version) => {
                Ok(Message::err_reply("VERSION not part of chain replication"))
            }
            None => Ok(Message::err_reply("unexpected message type")),
        }
    }
}

#[cfg(test)]
mod cr_tests {
    use super::*;

    fn solo_replica() -> ChainRepReplica {
        let stub = ConnectionStub::new("a", vec![], 1, 1).unwrap();
        ChainRepReplica::new(
            ServerInfo::new("a", "127.0.0.1", 0),
            Arc::new(stub),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn solo_set_then_get() -> Result<(), ChainKvError> {
        let replica = solo_replica();
        let ack = replica.process_req(Message::set_req("z", "9")).await?;
        assert!(ack.is_ok());

        let reply = replica.process_req(Message::get_req("z")).await?;
        assert!(reply.is_ok());
        assert_eq!(reply.value(), Some("9"));
        Ok(())
    }

    #[tokio::test]
    async fn unset_key_reads_zero() -> Result<(), ChainKvError> {
        let replica = solo_replica();
        let reply = replica.process_req(Message::get_req("nope")).await?;
        assert_eq!(reply.value(), Some(UNSET_VALUE));
        Ok(())
    }

    #[tokio::test]
    async fn get_rejected_off_tail() -> Result<(), ChainKvError> {
        let stub = ConnectionStub::new("a", vec![], 1, 1)?;
        let replica = ChainRepReplica::new(
            ServerInfo::new("a", "127.0.0.1", 0),
            Arc::new(stub),
            None,
            Some("b".into()),
        );
        let reply = replica.process_req(Message::get_req("k")).await?;
        assert!(!reply.is_ok());
        assert_eq!(reply.status(), Some("ERR"));
        Ok(())
    }

    #[tokio::test]
    async fn version_rejected() -> Result<(), ChainKvError> {
        let replica = solo_replica();
        let reply = replica.process_req(Message::version_req("k")).await?;
        assert!(!reply.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_set_rejected_without_mutation(
    ) -> Result<(), ChainKvError> {
        let replica = solo_replica();
        let mut req = Message::default();
        req.insert("type", "SET".into());
        req.insert("key", "k".into());
        let reply = replica.process_req(req).await?;
        assert!(!reply.is_ok());

        let reply = replica.process_req(Message::get_req("k")).await?;
        assert_eq!(reply.value(), Some(UNSET_VALUE));
        Ok(())
    }
}
