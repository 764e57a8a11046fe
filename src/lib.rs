//! Public interface to the ChainKV core library: a strongly-consistent,
//! chain-replicated in-memory key-value store with two replication
//! variants (CR and CRAQ) over a framed-JSON TCP transport.

#[macro_use]
mod utils;

mod client;
mod cluster;
mod message;
mod protocols;
mod server;
mod transport;

pub use client::{ChainClient, ClientWorker};
pub use cluster::{ChainTopology, ClusterConfig, ClusterManager};
pub use message::{Message, MsgType};
pub use protocols::ChainProtocol;
pub use server::{GenericReplica, MsgServer, ServerInfo};
pub use transport::{ConnectionStub, PeerTransport};
pub use utils::ChainKvError;
