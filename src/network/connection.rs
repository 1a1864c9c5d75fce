//! Connection handling
//!
//! Wraps one player's transport stream with the protocol codec:
//! - Message encoding/decoding
//! - Clean-close detection
//! - Traffic statistics

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{CodecError, Decoder, Encoder, Frame, Message};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open for traffic
    Connected,
    /// Connection is closing gracefully
    Closing,
    /// Connection has been closed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to one player
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The transport stream
    stream: S,
    /// Protocol encoder
    encoder: Encoder,
    /// Protocol decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Connection state
    state: ConnectionState,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection from an established stream
    pub fn new(stream: S, remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            state: ConnectionState::Connected,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get the current connection state
    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send a message
    pub async fn send(&mut self, message: &Message) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        self.write_buf.clear();
        self.encoder.encode(message, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.messages_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        Ok(())
    }

    /// Receive a message. Returns None when the peer closed cleanly between
    /// frames.
    ///
    /// Cancel-safe: partially read frames stay buffered.
    pub async fn recv(&mut self) -> ConnectionResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.messages_received += 1;
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() && self.decoder.is_idle() {
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Try to receive a message with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Frame>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Close the connection gracefully. Safe to call more than once.
    pub async fn close(&mut self, reason: &str) -> ConnectionResult<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closing;

        let farewell = self
            .send(&Message::Disconnect {
                reason: reason.to_string(),
            })
            .await;
        let shutdown = self.stream.shutdown().await;

        self.state = ConnectionState::Closed;

        farewell?;
        shutdown?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PaddlePosition, Score, Snapshot};
    use tokio_test::io::Builder;

    fn addr() -> SocketAddr {
        "127.0.0.1:4567".parse().unwrap()
    }

    fn encode_all(messages: &[Message]) -> Vec<u8> {
        let mut encoder = Encoder::new();
        let mut buf = BytesMut::new();
        for message in messages {
            encoder.encode(message, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn snapshot(sync: u64) -> Snapshot {
        Snapshot::new(PaddlePosition { x: 680, y: 200 }, Score::default(), sync)
    }

    #[tokio::test]
    async fn test_recv_reassembles_split_frames() {
        let bytes = encode_all(&[Message::Snapshot(snapshot(1)), Message::Snapshot(snapshot(2))]);
        let (head, tail) = bytes.split_at(7);
        let stream = Builder::new().read(head).read(tail).build();

        let mut conn = Connection::new(stream, addr());

        let first = conn.recv().await.unwrap().unwrap();
        assert_eq!(first.message, Message::Snapshot(snapshot(1)));
        let second = conn.recv().await.unwrap().unwrap();
        assert_eq!(second.message, Message::Snapshot(snapshot(2)));
        assert_eq!(second.sequence, 1);

        assert!(conn.recv().await.unwrap().is_none());
        assert_eq!(conn.stats().messages_received, 2);
        assert_eq!(conn.stats().bytes_received, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_error() {
        let bytes = encode_all(&[Message::Snapshot(snapshot(1))]);
        let stream = Builder::new().read(&bytes[..bytes.len() - 3]).build();

        let mut conn = Connection::new(stream, addr());
        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_garbage_is_protocol_error() {
        let stream = Builder::new().read(b"not a pong frame at all").build();

        let mut conn = Connection::new(stream, addr());
        assert!(matches!(
            conn.recv().await,
            Err(ConnectionError::Protocol(CodecError::InvalidMagic))
        ));
    }

    #[tokio::test]
    async fn test_send_writes_one_frame() {
        let message = Message::Relay { opponent: snapshot(9), pause: false };
        let expected = encode_all(&[message.clone()]);
        let stream = Builder::new().write(&expected).build();

        let mut conn = Connection::new(stream, addr());
        conn.send(&message).await.unwrap();

        assert_eq!(conn.stats().messages_sent, 1);
        assert_eq!(conn.stats().bytes_sent, expected.len() as u64);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let expected = encode_all(&[Message::Disconnect { reason: "bye".to_string() }]);
        let stream = Builder::new().write(&expected).build();

        let mut conn = Connection::new(stream, addr());
        conn.close("bye").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        conn.close("bye").await.unwrap();
        assert!(matches!(
            conn.send(&Message::OpponentLeft).await,
            Err(ConnectionError::Closed)
        ));
    }
}
