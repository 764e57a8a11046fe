//! ChainKV's collection of replication protocol variants.

mod cr;
mod craq;

use std::sync::Arc;

use crate::cluster::ChainTopology;
use crate::server::{GenericReplica, ServerInfo};
use crate::transport::ConnectionStub;
use crate::utils::ChainKvError;

pub use cr::ChainRepReplica;
pub use craq::CraqReplica;

/// Enum of supported replication protocol variants.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChainProtocol {
    /// Chain Replication: writes flow head to tail, acknowledgements fold
    /// back tail to head, reads are served exclusively by the tail.
    ChainRep,

    /// Chain Replication with Apportioned Queries: writes flow head to tail
    /// under a per-key clean/dirty discipline, reads are served by any
    /// replica with a version-check fallback to the tail.
    Craq,
}

impl ChainProtocol {
    /// Parses a protocol name string into a `ChainProtocol` variant.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "ChainRep" => Some(Self::ChainRep),
            "Craq" => Some(Self::Craq),
            _ => None,
        }
    }

    /// Builds this variant's replica for one chain position, with the
    /// injected connection stub restricted to the replica's outgoing edges.
    pub(crate) fn new_replica(
        &self,
        info: ServerInfo,
        stub: Arc<ConnectionStub>,
        topology: &ChainTopology,
    ) -> Result<Arc<dyn GenericReplica>, ChainKvError> {
        let prev = topology.prev_of(&info.name)?;
        let next = topology.next_of(&info.name)?;
        match self {
            Self::ChainRep => {
                Ok(Arc::new(ChainRepReplica::new(info, stub, prev, next)))
            }
            Self::Craq => Ok(Arc::new(CraqReplica::new(
                info,
                stub,
                prev,
                next,
                topology.tail_name().to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod protocols_tests {
    use super::ChainProtocol;

    macro_rules! valid_name_test {
        ($p:ident) => {
            assert_eq!(
                ChainProtocol::parse_name(stringify!($p)),
                Some(ChainProtocol::$p)
            );
        };
    }

    #[test]
    fn parse_valid_names() {
        valid_name_test!(ChainRep);
        valid_name_test!(Craq);
    }

    #[test]
    fn parse_invalid_name() {
        assert_eq!(ChainProtocol::parse_name("InvalidProtocol"), None);
    }
}
