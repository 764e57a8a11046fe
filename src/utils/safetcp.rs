//! TCP bind/connect helpers and length-delimited message framing.

use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::message::Message;
use crate::utils::ChainKvError;

/// Width of the decimal frame length header in bytes.
pub(crate) const LEN_HEADER_WIDTH: usize = 8;

/// Largest payload length expressible in the decimal header.
const MAX_FRAME_LEN: usize = 99_999_999;

/// Sends one framed message to TCP writable connection `conn_write`: an
/// `LEN_HEADER_WIDTH`-character zero-padded decimal payload length followed
/// by the UTF-8 JSON payload itself.
pub(crate) async fn send_msg<Conn>(
    conn_write: &mut Conn,
    msg: &Message,
) -> Result<(), ChainKvError>
where
    Conn: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChainKvError(format!(
            "frame payload too large: {} bytes",
            payload.len()
        )));
    }

    let header =
        format!("{:0width$}", payload.len(), width = LEN_HEADER_WIDTH);
    conn_write.write_all(header.as_bytes()).await?;
    conn_write.write_all(&payload).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Receives one framed message from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads: bytes already read
/// before a short read stay in the buffer and are appended to by future
/// invocations until the whole frame is present. Bytes of any following
/// frame are preserved in the buffer.
pub(crate) async fn recv_msg<Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<Message, ChainKvError>
where
    Conn: AsyncRead + Unpin,
{
    // read the decimal length header first
    while read_buf.len() < LEN_HEADER_WIDTH {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ChainKvError("connection closed".into()));
        }
    }
    let payload_len = std::str::from_utf8(&read_buf[..LEN_HEADER_WIDTH])?
        .parse::<usize>()?;

    // then read the payload itself
    let frame_end = LEN_HEADER_WIDTH + payload_len;
    while read_buf.len() < frame_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ChainKvError("connection closed mid-frame".into()));
        }
    }
    let msg =
        serde_json::from_slice(&read_buf[LEN_HEADER_WIDTH..frame_end])?;

    // discard bytes used by this frame, keeping any bytes read beyond it
    read_buf.advance(frame_end);
    Ok(msg)
}

/// Wrapper over tokio `TcpListener` binding that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ChainKvError> {
    loop {
        let attempt = || -> Result<TcpListener, ChainKvError> {
            let socket = TcpSocket::new_v4()?;
            socket.set_reuseaddr(true)?;
            socket.set_nodelay(true)?;
            socket.bind(bind_addr)?;
            Ok(socket.listen(1024)?)
        };

        match attempt() {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err);
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, ChainKvError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

#[cfg(test)]
mod safetcp_tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frame_roundtrip() -> Result<(), ChainKvError> {
        let (mut alice, mut bob) = duplex(1024);
        let msg = Message::set_req("x", "1");
        send_msg(&mut alice, &msg).await?;

        let mut read_buf = BytesMut::new();
        let got = recv_msg(&mut read_buf, &mut bob).await?;
        assert_eq!(got, msg);
        assert!(read_buf.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn partial_reads_accumulate() -> Result<(), ChainKvError> {
        // a tiny duplex capacity forces many short reads per frame
        let (mut alice, mut bob) = duplex(4);
        let first = Message::set_req("key", "value");
        let second = Message::get_req("key");

        let writer = tokio::spawn(async move {
            send_msg(&mut alice, &first).await?;
            send_msg(&mut alice, &second).await?;
            Ok::<(), ChainKvError>(())
        });

        let mut read_buf = BytesMut::new();
        let got_first = recv_msg(&mut read_buf, &mut bob).await?;
        let got_second = recv_msg(&mut read_buf, &mut bob).await?;
        assert_eq!(got_first, Message::set_req("key", "value"));
        assert_eq!(got_second, Message::get_req("key"));
        writer.await??;
        Ok(())
    }

    #[tokio::test]
    async fn decimal_header_honored() -> Result<(), ChainKvError> {
        let (mut alice, mut bob) = duplex(1024);
        alice.write_all(b"00000002{}").await?;

        let mut read_buf = BytesMut::new();
        let got = recv_msg(&mut read_buf, &mut bob).await?;
        assert_eq!(got, Message::default());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_header_rejected() {
        let (mut alice, mut bob) = duplex(1024);
        alice.write_all(b"notdigit{}").await.unwrap();

        let mut read_buf = BytesMut::new();
        assert!(recv_msg(&mut read_buf, &mut bob).await.is_err());
    }

    #[tokio::test]
    async fn closed_mid_frame_errors() {
        let (mut alice, mut bob) = duplex(1024);
        alice.write_all(b"00000099{\"type\"").await.unwrap();
        drop(alice);

        let mut read_buf = BytesMut::new();
        assert!(recv_msg(&mut read_buf, &mut bob).await.is_err());
    }
}
