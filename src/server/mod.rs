//! Message-oriented TCP server framework and the replica extension point.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};

use crate::message::Message;
use crate::utils::{
    recv_msg, send_msg, tcp_bind_with_retry, ChainKvError, LEN_HEADER_WIDTH,
};

/// Stable identity of one replica: name plus listening address. Set at
/// bootstrap and never changed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Replica name, e.g. `a`.
    pub name: String,

    /// Listening host.
    pub host: String,

    /// Listening port.
    pub port: u16,
}

impl ServerInfo {
    /// Creates a replica identity.
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        ServerInfo {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Resolves the listening socket address.
    pub fn addr(&self) -> Result<SocketAddr, ChainKvError> {
        let addr_str = format!("{}:{}", self.host, self.port);
        addr_str.to_socket_addrs()?.next().ok_or_else(|| {
            ChainKvError(format!("cannot resolve address '{}'", addr_str))
        })
    }
}

/// Replica capability: the sole extension point of the server framework.
/// The CR and CRAQ replica types implement this contract; the framework is
/// oblivious to which variant is running.
#[async_trait]
pub trait GenericReplica: Send + Sync + 'static {
    /// This replica's identity.
    fn info(&self) -> &ServerInfo;

    /// Processes one inbound request into exactly one reply. Returning an
    /// `Err` makes the framework answer with an `ERR` reply carrying the
    /// error text; the connection stays up either way.
    async fn process_req(&self, req: Message)
        -> Result<Message, ChainKvError>;
}

/// Message-oriented TCP server: accepts connections forever and runs one
/// handler task per accepted socket. Framing makes concurrent requests on
/// one socket impossible; concurrency across sockets is unlimited.
pub struct MsgServer {
    replica: Arc<dyn GenericReplica>,
    listener: TcpListener,
}

impl MsgServer {
    /// Binds the replica's listening port (with retry) and returns the
    /// ready-to-run server.
    pub async fn new_and_setup(
        replica: Arc<dyn GenericReplica>,
    ) -> Result<Self, ChainKvError> {
        let addr = replica.info().addr()?;
        let listener = tcp_bind_with_retry(addr, 10).await?;
        pf_info!(&replica.info().name; "accepting requests on '{}'", addr);
        Ok(MsgServer { replica, listener })
    }

    /// Accept loop; runs until the surrounding task is aborted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let replica = self.replica.clone();
                    tokio::spawn(Self::handler_task(
                        replica, stream, peer_addr,
                    ));
                }
                Err(e) => {
                    pf_warn!(&self.replica.info().name;
                             "error accepting connection: {}", e);
                }
            }
        }
    }

    /// Per-connection handler: reads framed requests one at a time,
    /// delegates each to the replica, and writes the reply back on the same
    /// socket. Exits when the peer closes the connection or framing breaks.
    async fn handler_task(
        replica: Arc<dyn GenericReplica>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        let me = replica.info().name.clone();
        pf_debug!(&me; "handler spawned for '{}'", peer_addr);
        if let Err(e) = stream.set_nodelay(true) {
            pf_warn!(&me; "error setting nodelay for '{}': {}", peer_addr, e);
        }

        let mut read_buf = BytesMut::with_capacity(LEN_HEADER_WIDTH + 1024);
        loop {
            let req = match recv_msg(&mut read_buf, &mut stream).await {
                Ok(req) => req,
                Err(_) => break, // peer closed or framing broke
            };

            let reply = match replica.process_req(req).await {
                Ok(reply) => reply,
                Err(err) => {
                    pf_warn!(&me; "error processing request: {}", err);
                    Message::err_reply(err.to_string())
                }
            };

            if let Err(e) = send_msg(&mut stream, &reply).await {
                pf_error!(&me; "error replying to '{}': {}", peer_addr, e);
                break;
            }
        }

        pf_debug!(&me; "handler for '{}' exited", peer_addr);
    }
}
