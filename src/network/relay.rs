//! Relay loop
//!
//! One relay runs per connected player. It waits until the player's session
//! has an opponent, then answers every snapshot from the player with the
//! opponent's latest snapshot until the connection ends:
//!
//! AwaitingOpponent -> Exchanging -> Closed
//!
//! When the opponent leaves mid-game the relay tells the player and goes back
//! to waiting in the same session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

use super::connection::{Connection, ConnectionError};
use super::RelaySettings;
use crate::protocol::{error_codes, Message, PlayerId, SessionId};
use crate::session::{
    Assignment, Exchange, PlayerSlot, RegistryError, Retirement, Session, SessionError,
    SessionRegistry, SLOTS,
};

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Transport error: {0}")]
    Transport(#[from] ConnectionError),

    #[error("Unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("No opponent joined within {0:?}")]
    OpponentTimeout(Duration),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl From<RegistryError> for RelayError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => RelayError::SessionNotFound(id),
            RegistryError::Session(e) => RelayError::Session(e),
        }
    }
}

impl RelayError {
    /// Code for the `Error` message sent before closing, if the player should
    /// be told at all
    fn code(&self) -> Option<u32> {
        match self {
            RelayError::SessionNotFound(_) => Some(error_codes::SESSION_NOT_FOUND),
            RelayError::UnexpectedMessage(_) => Some(error_codes::UNEXPECTED_MESSAGE),
            RelayError::OpponentTimeout(_) => Some(error_codes::OPPONENT_TIMEOUT),
            RelayError::Session(_) => Some(error_codes::INTERNAL_ERROR),
            RelayError::Transport(_) => None,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Why a relay ended without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The player closed the transport
    PeerClosed,
    /// The player sent `Disconnect`
    ClientDisconnect(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "Connection closed"),
            CloseReason::ClientDisconnect(reason) => write!(f, "Client disconnected: {}", reason),
        }
    }
}

enum Waiting {
    Paired(PlayerSlot),
    Closed(CloseReason),
}

enum Exchanging {
    OpponentLeft,
    Closed(CloseReason),
}

/// Per-connection relay
pub struct Relay<S = TcpStream> {
    conn: Connection<S>,
    registry: Arc<SessionRegistry>,
    settings: RelaySettings,
    assignment: Assignment,
}

impl<S> Relay<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        conn: Connection<S>,
        registry: Arc<SessionRegistry>,
        settings: RelaySettings,
        assignment: Assignment,
    ) -> Self {
        Self {
            conn,
            registry,
            settings,
            assignment,
        }
    }

    /// Run until the connection ends.
    ///
    /// The player's slot is released and the transport closed on every exit
    /// path.
    pub async fn run(mut self) -> RelayResult<CloseReason> {
        let outcome = match self.registry.find(self.assignment.session).await {
            Ok(session) => {
                let outcome = self.play(&session).await;
                self.leave(&session).await;
                outcome
            }
            Err(e) => Err(e.into()),
        };

        let reason = match &outcome {
            Ok(reason) => reason.to_string(),
            Err(e) => {
                if let Some(code) = e.code() {
                    let _ = self
                        .conn
                        .send(&Message::Error {
                            code,
                            message: e.to_string(),
                        })
                        .await;
                }
                e.to_string()
            }
        };

        if let Err(e) = self.conn.close(&reason).await {
            tracing::debug!("Close of {} failed: {}", self.conn.remote_addr(), e);
        }

        let stats = self.conn.stats();
        tracing::info!(
            "Player {} ({}) closed: {} [{} in / {} out]",
            self.assignment.player,
            self.conn.remote_addr(),
            reason,
            stats.messages_received,
            stats.messages_sent
        );

        outcome
    }

    async fn play(&mut self, session: &Session) -> RelayResult<CloseReason> {
        loop {
            let opponent = match self.await_opponent(session).await? {
                Waiting::Paired(opponent) => opponent,
                Waiting::Closed(reason) => return Ok(reason),
            };

            self.conn
                .send(&Message::Welcome {
                    session: session.id(),
                    side: self.assignment.side,
                    width: self.settings.width,
                    height: self.settings.height,
                })
                .await?;
            self.conn
                .send(&Message::OpponentJoined(opponent.snapshot))
                .await?;

            tracing::info!(
                "Player {} paired with player {} in session {}",
                self.assignment.player,
                opponent.player,
                session.id()
            );

            match self.exchange(session, opponent.player).await? {
                Exchanging::OpponentLeft => {
                    tracing::info!(
                        "Opponent of player {} left session {}",
                        self.assignment.player,
                        session.id()
                    );
                    self.conn.send(&Message::OpponentLeft).await?;
                }
                Exchanging::Closed(reason) => return Ok(reason),
            }
        }
    }

    /// Block until the session is full, watching the connection meanwhile so a
    /// player that leaves while waiting is never paired.
    async fn await_opponent(&mut self, session: &Session) -> RelayResult<Waiting> {
        let mut seated = session.subscribe();
        let deadline = self.settings.opponent_timeout.map(|t| Instant::now() + t);

        loop {
            tokio::select! {
                paired = until_full(&mut seated) => {
                    if !paired {
                        return Err(RelayError::SessionNotFound(session.id()));
                    }
                    if let Some(opponent) = session.opponent(self.assignment.side).await {
                        return Ok(Waiting::Paired(opponent));
                    }
                }
                frame = self.conn.recv() => {
                    match frame?.map(|f| f.message) {
                        None => return Ok(Waiting::Closed(CloseReason::PeerClosed)),
                        Some(Message::Disconnect { reason }) => {
                            return Ok(Waiting::Closed(CloseReason::ClientDisconnect(reason)));
                        }
                        Some(Message::Snapshot(_)) => {
                            tracing::debug!(
                                "Discarding snapshot from unpaired player {}",
                                self.assignment.player
                            );
                        }
                        Some(other) => return Err(RelayError::UnexpectedMessage(other.name())),
                    }
                }
                _ = sleep_until(deadline) => {
                    return Err(RelayError::OpponentTimeout(
                        self.settings.opponent_timeout.unwrap_or_default(),
                    ));
                }
            }
        }
    }

    /// Relay snapshots with `opponent` until one side goes away
    async fn exchange(&mut self, session: &Session, opponent: PlayerId) -> RelayResult<Exchanging> {
        loop {
            let frame = match self.settings.idle_timeout {
                Some(limit) => self.conn.recv_timeout(limit).await?,
                None => self.conn.recv().await?,
            };

            let snapshot = match frame.map(|f| f.message) {
                None => return Ok(Exchanging::Closed(CloseReason::PeerClosed)),
                Some(Message::Snapshot(snapshot)) => snapshot,
                Some(Message::Disconnect { reason }) => {
                    return Ok(Exchanging::Closed(CloseReason::ClientDisconnect(reason)));
                }
                Some(other) => return Err(RelayError::UnexpectedMessage(other.name())),
            };

            match session
                .exchange(self.assignment.side, opponent, snapshot)
                .await?
            {
                Exchange::Relayed { opponent, pause } => {
                    self.conn.send(&Message::Relay { opponent, pause }).await?;
                }
                Exchange::OpponentGone => return Ok(Exchanging::OpponentLeft),
            }
        }
    }

    async fn leave(&self, session: &Session) {
        let Assignment { player, side, .. } = self.assignment;
        let remaining = session.vacate(side, player).await;

        match self.registry.retire(session.id()).await {
            Ok(Retirement::Retired) | Ok(Retirement::Kept) => {}
            Ok(Retirement::Cleared) => tracing::debug!(
                "Session {} kept with {} player(s) after player {} left",
                session.id(),
                remaining,
                player
            ),
            Err(e) => tracing::warn!("Could not retire session {}: {}", session.id(), e),
        }
    }
}

/// Wait until every slot is taken. False if the session went away.
async fn until_full(seated: &mut watch::Receiver<usize>) -> bool {
    seated.wait_for(|&n| n == SLOTS).await.is_ok()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
