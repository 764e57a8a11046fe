//! Pooled point-to-point transport and the name-indexed connection stub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use crate::message::Message;
use crate::utils::{
    recv_msg, send_msg, tcp_connect_with_retry, ChainKvError,
    LEN_HEADER_WIDTH,
};

/// A pooled connection: the socket plus its partial-read buffer.
struct PooledConn {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl PooledConn {
    async fn connect(
        addr: SocketAddr,
        retries: u8,
    ) -> Result<Self, ChainKvError> {
        let stream = tcp_connect_with_retry(addr, retries).await?;
        Ok(PooledConn {
            stream,
            read_buf: BytesMut::with_capacity(LEN_HEADER_WIDTH + 1024),
        })
    }
}

/// Point-to-point client owning a bounded pool of long-lived connections to
/// a single peer. A request exclusively holds one socket for its whole
/// round-trip, so concurrent callers get independent sockets up to the pool
/// capacity and then suspend until a slot frees up.
pub struct PeerTransport {
    /// Peer name.
    peer: String,

    /// Peer address.
    addr: SocketAddr,

    /// Free-list of idle pooled connections.
    idle: Mutex<Vec<PooledConn>>,

    /// Bounds sockets in flight plus idle to the pool capacity.
    slots: Semaphore,

    /// Connect retry budget when (re)filling the pool.
    conn_retries: u8,
}

impl PeerTransport {
    /// Creates a transport bound to one peer with given pool capacity.
    pub fn new(
        peer: impl Into<String>,
        addr: SocketAddr,
        pool_size: usize,
        conn_retries: u8,
    ) -> Result<Self, ChainKvError> {
        let peer = peer.into();
        if pool_size == 0 {
            return logged_err!(&peer; "invalid pool_size {}", pool_size);
        }
        Ok(PeerTransport {
            peer,
            addr,
            idle: Mutex::new(Vec::with_capacity(pool_size)),
            slots: Semaphore::new(pool_size),
            conn_retries,
        })
    }

    /// Opens one connection upfront so the first request is not charged the
    /// TCP handshake. No-op if the pool already holds an idle socket.
    pub async fn prime(&self) -> Result<(), ChainKvError> {
        let _slot = self.slots.acquire().await?;
        if !self.idle.lock().unwrap().is_empty() {
            return Ok(());
        }
        let conn = PooledConn::connect(self.addr, self.conn_retries).await?;
        self.park(conn);
        Ok(())
    }

    /// Sends one framed request and awaits its reply on an exclusively held
    /// pooled socket. Suspends while all pool slots are in flight. Any
    /// socket error discards that socket (the pool refills lazily) and
    /// surfaces to the caller; no retry, no pipelining.
    pub async fn request(
        &self,
        msg: &Message,
    ) -> Result<Message, ChainKvError> {
        let _slot = self.slots.acquire().await?;
        let mut conn = match self.take_idle() {
            Some(conn) => conn,
            None => {
                PooledConn::connect(self.addr, self.conn_retries).await?
            }
        };

        match Self::roundtrip(&mut conn, msg).await {
            Ok(reply) => {
                self.park(conn);
                Ok(reply)
            }
            // socket state is unknown after an error; drop it
            Err(err) => {
                pf_debug!(&self.peer; "discarding socket: {}", err);
                Err(err)
            }
        }
    }

    /// The peer this transport is bound to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn roundtrip(
        conn: &mut PooledConn,
        msg: &Message,
    ) -> Result<Message, ChainKvError> {
        send_msg(&mut conn.stream, msg).await?;
        recv_msg(&mut conn.read_buf, &mut conn.stream).await
    }

    fn take_idle(&self) -> Option<PooledConn> {
        self.idle.lock().unwrap().pop()
    }

    fn park(&self, conn: PooledConn) {
        self.idle.lock().unwrap().push(conn);
    }
}

/// A name-indexed collection of peer transports: one replica's (or the
/// client facade's) window onto the rest of the cluster.
pub struct ConnectionStub {
    /// My name, used as the logging identity.
    me: String,

    /// Map from peer name -> transport.
    transports: HashMap<String, PeerTransport>,
}

impl ConnectionStub {
    /// Creates a stub holding one transport per named peer.
    pub fn new(
        me: impl Into<String>,
        peers: Vec<(String, SocketAddr)>,
        pool_size: usize,
        conn_retries: u8,
    ) -> Result<Self, ChainKvError> {
        let me = me.into();
        let mut transports = HashMap::new();
        for (name, addr) in peers {
            let transport =
                PeerTransport::new(name.clone(), addr, pool_size, conn_retries)?;
            transports.insert(name, transport);
        }
        Ok(ConnectionStub { me, transports })
    }

    /// Opens at least one socket to every peer in the stub, so the first
    /// protocol message is not charged the TCP handshake.
    pub async fn initiate_connections(&self) -> Result<(), ChainKvError> {
        for (name, transport) in &self.transports {
            transport.prime().await?;
            pf_debug!(&self.me; "connected to peer '{}'", name);
        }
        Ok(())
    }

    /// Sends `msg` to the named peer and awaits the reply. Sending to a
    /// name not present in the stub is a programming error and fails fast.
    pub async fn send(
        &self,
        peer: &str,
        msg: &Message,
    ) -> Result<Message, ChainKvError> {
        match self.transports.get(peer) {
            Some(transport) => transport.request(msg).await,
            None => {
                logged_err!(&self.me; "peer '{}' not found in stub", peer)
            }
        }
    }

    /// Names of all peers reachable through this stub.
    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::time::{self, Duration};

    /// Replies to every request with the request's key as the value,
    /// counting accepted connections.
    async fn spawn_echo_server(
        addr: SocketAddr,
        accepted: Arc<AtomicUsize>,
        delay: Duration,
    ) {
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut read_buf = BytesMut::new();
                    loop {
                        let req =
                            match recv_msg(&mut read_buf, &mut stream).await {
                                Ok(req) => req,
                                Err(_) => break,
                            };
                        if !delay.is_zero() {
                            time::sleep(delay).await;
                        }
                        let reply =
                            Message::ok_with_value(req.key().unwrap_or(""));
                        if send_msg(&mut stream, &reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_roundtrip() -> Result<(), ChainKvError> {
        let addr: SocketAddr = "127.0.0.1:21701".parse()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        spawn_echo_server(addr, accepted.clone(), Duration::ZERO).await;

        let transport = PeerTransport::new("peer", addr, 2, 2)?;
        let reply = transport.request(&Message::get_req("hello")).await?;
        assert!(reply.is_ok());
        assert_eq!(reply.value(), Some("hello"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sockets_reused_across_requests() -> Result<(), ChainKvError> {
        let addr: SocketAddr = "127.0.0.1:21702".parse()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        spawn_echo_server(addr, accepted.clone(), Duration::ZERO).await;

        let transport = PeerTransport::new("peer", addr, 1, 2)?;
        for i in 0..5 {
            let key = format!("k{}", i);
            let reply = transport.request(&Message::get_req(&key)).await?;
            assert_eq!(reply.value(), Some(key.as_str()));
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_capacity_bounds_sockets() -> Result<(), ChainKvError> {
        let addr: SocketAddr = "127.0.0.1:21703".parse()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        spawn_echo_server(addr, accepted.clone(), Duration::from_millis(50))
            .await;

        let transport = Arc::new(PeerTransport::new("peer", addr, 2, 2)?);
        let mut tasks = Vec::new();
        for i in 0..4 {
            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("k{}", i);
                transport.request(&Message::get_req(&key)).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap()?.is_ok());
        }
        // four concurrent requests over a capacity-2 pool never open more
        // than two sockets
        assert!(accepted.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn initiate_connections_warms_pool() -> Result<(), ChainKvError> {
        let addr: SocketAddr = "127.0.0.1:21704".parse()?;
        let accepted = Arc::new(AtomicUsize::new(0));
        spawn_echo_server(addr, accepted.clone(), Duration::ZERO).await;

        let stub = ConnectionStub::new(
            "a",
            vec![("b".to_string(), addr)],
            4,
            2,
        )?;
        stub.initiate_connections().await?;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        // the warmed socket serves the first request; no new connection
        let reply = stub.send("b", &Message::get_req("warm")).await?;
        assert_eq!(reply.value(), Some("warm"));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_peer_fails_fast() -> Result<(), ChainKvError> {
        let stub = ConnectionStub::new("a", vec![], 1, 1)?;
        assert!(stub.send("ghost", &Message::get_req("k")).await.is_err());
        Ok(())
    }

    #[test]
    fn zero_pool_size_rejected() {
        let addr: SocketAddr = "127.0.0.1:21705".parse().unwrap();
        assert!(PeerTransport::new("peer", addr, 0, 1).is_err());
    }
}
