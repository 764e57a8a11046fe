//! Cluster bootstrap: chain topology, configuration, and the manager that
//! wires replicas into a running chain.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::client::ChainClient;
use crate::protocols::ChainProtocol;
use crate::server::{MsgServer, ServerInfo};
use crate::transport::ConnectionStub;
use crate::utils::ChainKvError;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Max concurrent in-flight requests per peer link. Must be at least
    /// the expected number of concurrent writes per link, or the chain
    /// deadlocks waiting on pool slots.
    pub pool_size: usize,

    /// TCP connect retry budget during bootstrap.
    pub conn_retries: u8,
}

#[allow(clippy::derivable_impls)]
impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            pool_size: 32,
            conn_retries: 10,
        }
    }
}

/// A total order over replicas plus the explicit adjacency map of who may
/// send to whom. The adjacency must induce the linear chain graph for
/// correctness; linearity of custom maps is not verified.
#[derive(Debug, Clone)]
pub struct ChainTopology {
    /// Chain order, head first.
    chain: Vec<ServerInfo>,

    /// Name of the tail replica.
    tail: String,

    /// Outgoing edges per replica name.
    edges: HashMap<String, HashSet<String>>,
}

impl ChainTopology {
    /// Builds the canonical linear topology for a protocol variant: chain
    /// links only for CR; for CRAQ additionally a shortcut edge from every
    /// non-tail replica to the tail, used by version queries.
    pub fn chain(
        protocol: ChainProtocol,
        infos: Vec<ServerInfo>,
    ) -> Result<Self, ChainKvError> {
        let mut edges = HashMap::new();
        let tail = match infos.last() {
            Some(last) => last.name.clone(),
            None => return logged_err!("topology"; "empty chain"),
        };

        let mut names = HashSet::new();
        for info in &infos {
            if !names.insert(info.name.clone()) {
                return logged_err!("topology";
                                   "duplicate replica name '{}'", info.name);
            }
        }

        for (idx, info) in infos.iter().enumerate() {
            let mut out = HashSet::new();
            if idx + 1 < infos.len() {
                out.insert(infos[idx + 1].name.clone());
                if protocol == ChainProtocol::Craq
                    && infos[idx + 1].name != tail
                {
                    out.insert(tail.clone());
                }
            }
            edges.insert(info.name.clone(), out);
        }

        Ok(ChainTopology {
            chain: infos,
            tail,
            edges,
        })
    }

    /// Wraps a chain order with a caller-provided adjacency map. Every edge
    /// endpoint must name a chain member; whether the map induces a linear
    /// graph is the caller's responsibility.
    pub fn with_edges(
        chain: Vec<ServerInfo>,
        edges: HashMap<String, HashSet<String>>,
    ) -> Result<Self, ChainKvError> {
        let tail = match chain.last() {
            Some(last) => last.name.clone(),
            None => return logged_err!("topology"; "empty chain"),
        };
        let names: HashSet<&str> =
            chain.iter().map(|info| info.name.as_str()).collect();
        for (from, outs) in &edges {
            for name in std::iter::once(from).chain(outs.iter()) {
                if !names.contains(name.as_str()) {
                    return logged_err!("topology";
                                       "edge endpoint '{}' not in chain",
                                       name);
                }
            }
        }

        Ok(ChainTopology { chain, tail, edges })
    }

    /// The head replica.
    pub fn head(&self) -> &ServerInfo {
        &self.chain[0]
    }

    /// Name of the tail replica.
    pub fn tail_name(&self) -> &str {
        &self.tail
    }

    /// All replicas in chain order.
    pub fn replicas(&self) -> &[ServerInfo] {
        &self.chain
    }

    /// Predecessor of a replica in the chain order; `None` at the head.
    pub(crate) fn prev_of(
        &self,
        name: &str,
    ) -> Result<Option<String>, ChainKvError> {
        let pos = self.position_of(name)?;
        Ok(if pos == 0 {
            None
        } else {
            Some(self.chain[pos - 1].name.clone())
        })
    }

    /// Successor of a replica in the chain order; `None` at the tail.
    pub(crate) fn next_of(
        &self,
        name: &str,
    ) -> Result<Option<String>, ChainKvError> {
        let pos = self.position_of(name)?;
        Ok(if pos + 1 == self.chain.len() {
            None
        } else {
            Some(self.chain[pos + 1].name.clone())
        })
    }

    /// Resolved `(name, addr)` pairs for a replica's outgoing edges.
    pub(crate) fn outgoing_addrs(
        &self,
        name: &str,
    ) -> Result<Vec<(String, SocketAddr)>, ChainKvError> {
        let mut peers = Vec::new();
        if let Some(outs) = self.edges.get(name) {
            for out in outs {
                peers.push((out.clone(), self.addr_of(out)?));
            }
        }
        Ok(peers)
    }

    /// Resolved address of a named replica.
    pub(crate) fn addr_of(
        &self,
        name: &str,
    ) -> Result<SocketAddr, ChainKvError> {
        self.chain[self.position_of(name)?].addr()
    }

    #[cfg(test)]
    pub(crate) fn edges_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.edges.get(name)
    }

    fn position_of(&self, name: &str) -> Result<usize, ChainKvError> {
        match self.chain.iter().position(|info| info.name == name) {
            Some(pos) => Ok(pos),
            None => logged_err!("topology";
                                "replica '{}' not in chain", name),
        }
    }
}

/// Spawns one server task per replica, injects each one's connection stub
/// restricted to its outgoing edges, and hands out client handles once
/// every replica has warmed its connections.
pub struct ClusterManager {
    protocol: ChainProtocol,
    topology: ChainTopology,
    config: ClusterConfig,

    /// Connection stubs injected into the replicas, kept for the
    /// `initiate_connections` bootstrap phase.
    stubs: Vec<Arc<ConnectionStub>>,

    /// Join handles of the spawned server tasks.
    server_handles: Vec<JoinHandle<()>>,

    launched: bool,
}

impl ClusterManager {
    /// Creates a manager for the given protocol variant and topology.
    pub fn new(
        protocol: ChainProtocol,
        topology: ChainTopology,
        config: ClusterConfig,
    ) -> Self {
        ClusterManager {
            protocol,
            topology,
            config,
            stubs: Vec::new(),
            server_handles: Vec::new(),
            launched: false,
        }
    }

    /// Binds every replica's listener, spawns every accept loop, then warms
    /// all pooled connections. Returns once the whole chain is ready to
    /// serve requests.
    pub async fn launch(&mut self) -> Result<(), ChainKvError> {
        if self.launched {
            return logged_err!("cluster"; "launch already done");
        }

        let mut servers = Vec::new();
        for info in self.topology.replicas() {
            let peers = self.topology.outgoing_addrs(&info.name)?;
            let stub = Arc::new(ConnectionStub::new(
                &info.name,
                peers,
                self.config.pool_size,
                self.config.conn_retries,
            )?);
            let replica = self.protocol.new_replica(
                info.clone(),
                stub.clone(),
                &self.topology,
            )?;
            let server = MsgServer::new_and_setup(replica).await?;
            self.stubs.push(stub);
            servers.push(server);
        }

        // every listener is bound; start accepting before dialing out so
        // the warm-up connections all land
        for server in servers {
            self.server_handles.push(tokio::spawn(server.run()));
        }
        for stub in &self.stubs {
            stub.initiate_connections().await?;
        }

        self.launched = true;
        pf_info!("cluster"; "launched {} {:?} replicas, tail '{}'",
                 self.topology.replicas().len(),
                 self.protocol,
                 self.topology.tail_name());
        Ok(())
    }

    /// Returns a client handle bound to this cluster: writes go to the
    /// head; reads go to the tail (CR) or round-robin over all replicas
    /// (CRAQ).
    pub fn client(&self) -> Result<ChainClient, ChainKvError> {
        if !self.launched {
            return logged_err!("cluster"; "client requested before launch");
        }
        ChainClient::new(self.protocol, &self.topology, &self.config)
    }

    /// Aborts all server tasks.
    pub fn shutdown(&mut self) {
        for handle in self.server_handles.drain(..) {
            handle.abort();
        }
        if self.launched {
            pf_info!("cluster"; "cluster shut down");
        }
        self.launched = false;
    }
}
