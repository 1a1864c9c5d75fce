//! Headless player client
//!
//! Speaks the relay protocol without drawing anything. Used by the `bot`
//! command and by the tests.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError};
use crate::protocol::{Message, SessionId, Side, Snapshot};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Connection timeout")]
    Timeout,

    #[error("Server closed the connection")]
    Closed,

    #[error("Server disconnected: {0}")]
    Disconnected(String),

    #[error("Server error {code}: {message}")]
    Rejected { code: u32, message: String },

    #[error("Unexpected {0} message")]
    Unexpected(&'static str),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A game the client was paired into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub session: SessionId,
    pub side: Side,
    pub width: u32,
    pub height: u32,
    /// Opponent's starting snapshot
    pub opponent: Snapshot,
}

/// Server answer to one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Relay { opponent: Snapshot, pause: bool },
    /// Wait for a new match
    OpponentLeft,
}

/// Relay client
pub struct Client<S = TcpStream> {
    conn: Connection<S>,
}

impl Client {
    /// Connect to a relay server
    pub async fn connect(server_addr: SocketAddr, timeout: Duration) -> ClientResult<Self> {
        tracing::info!("Connecting to {}", server_addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(server_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => return Err(ClientError::Timeout),
        };
        stream.set_nodelay(true)?;

        Ok(Self::new(Connection::new(stream, server_addr)))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: Connection<S>) -> Self {
        Self { conn }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    /// Wait for the server to pair us with an opponent
    pub async fn wait_for_match(&mut self) -> ClientResult<Match> {
        let (session, side, width, height) = match self.next().await? {
            Message::Welcome {
                session,
                side,
                width,
                height,
            } => (session, side, width, height),
            other => return Err(ClientError::Unexpected(other.name())),
        };

        let opponent = match self.next().await? {
            Message::OpponentJoined(snapshot) => snapshot,
            other => return Err(ClientError::Unexpected(other.name())),
        };

        Ok(Match {
            session,
            side,
            width,
            height,
            opponent,
        })
    }

    /// Report our snapshot and get the opponent's
    pub async fn exchange(&mut self, snapshot: Snapshot) -> ClientResult<Reply> {
        self.conn.send(&Message::Snapshot(snapshot)).await?;

        match self.next().await? {
            Message::Relay { opponent, pause } => Ok(Reply::Relay { opponent, pause }),
            Message::OpponentLeft => Ok(Reply::OpponentLeft),
            other => Err(ClientError::Unexpected(other.name())),
        }
    }

    /// Send a raw message
    #[cfg(test)]
    pub async fn send(&mut self, message: &Message) -> ClientResult<()> {
        self.conn.send(message).await?;
        Ok(())
    }

    /// Disconnect from the server
    pub async fn disconnect(mut self) -> ClientResult<()> {
        self.conn.close("Client disconnecting").await?;
        Ok(())
    }

    async fn next(&mut self) -> ClientResult<Message> {
        let frame = self.conn.recv().await?.ok_or(ClientError::Closed)?;

        match frame.message {
            Message::Disconnect { reason } => Err(ClientError::Disconnected(reason)),
            Message::Error { code, message } => Err(ClientError::Rejected { code, message }),
            message => Ok(message),
        }
    }
}
