//! Session module - Game sessions and their player slots
//!
//! Provides:
//! - `Session`: one game, at most two player slots (left and right)
//! - `SessionRegistry`: every live session, pairing of new players, retirement
//! - The pairing policy and the sync governor used by the relay

mod governor;
mod pairing;
mod registry;

pub use governor::*;
pub use pairing::*;
pub use registry::*;

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::protocol::{PlayerId, SessionId, Side, Snapshot};

/// Number of player slots in a session
pub const SLOTS: usize = 2;

/// Session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Side {0:?} is already taken")]
    SideTaken(Side),

    #[error("No player seated on side {0:?}")]
    NotSeated(Side),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// One side of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSlot {
    /// Connection that owns this slot
    pub player: PlayerId,
    /// Fixed at assignment
    pub side: Side,
    /// Latest state received from the owner
    pub snapshot: Snapshot,
}

impl PlayerSlot {
    pub fn new(player: PlayerId, side: Side) -> Self {
        Self {
            player,
            side,
            snapshot: Snapshot::default(),
        }
    }
}

/// Result of one relay exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Snapshot stored; here is what the opponent last reported
    Relayed { opponent: Snapshot, pause: bool },
    /// The opponent this player was paired with is no longer seated
    OpponentGone,
}

/// Counters kept per pairing, reset by `Session::clear`
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Snapshots relayed since the session became full
    pub exchanges: u64,
    /// How long the current pair has been playing
    pub paired_for: Option<Duration>,
}

struct SessionState {
    slots: [Option<PlayerSlot>; SLOTS],
    paired_at: Option<Instant>,
    exchanges: u64,
}

impl SessionState {
    fn occupancy(&self) -> Occupancy {
        Occupancy {
            left: self.slots[Side::Left.index()].is_some(),
            right: self.slots[Side::Right.index()].is_some(),
        }
    }
}

/// A game between at most two players
pub struct Session {
    id: SessionId,
    state: Mutex<SessionState>,
    /// Number of occupied slots, watched by relays waiting for an opponent
    seated: watch::Sender<usize>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let (seated, _) = watch::channel(0);

        Self {
            id,
            state: Mutex::new(SessionState {
                slots: [None, None],
                paired_at: None,
                exchanges: 0,
            }),
            seated,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Which sides are taken right now
    pub async fn occupancy(&self) -> Occupancy {
        self.state.lock().await.occupancy()
    }

    pub async fn is_empty(&self) -> bool {
        self.occupancy().await.count() == 0
    }

    /// Watch the number of occupied slots
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.seated.subscribe()
    }

    /// Seat `player` on `side`
    pub async fn occupy(&self, side: Side, player: PlayerId) -> SessionResult<()> {
        let mut state = self.state.lock().await;

        let slot = &mut state.slots[side.index()];
        if slot.is_some() {
            return Err(SessionError::SideTaken(side));
        }
        *slot = Some(PlayerSlot::new(player, side));

        // A new pairing starts both players from the initial snapshot
        let seated = state.occupancy().count();
        if seated == SLOTS {
            for slot in state.slots.iter_mut().flatten() {
                slot.snapshot = Snapshot::default();
            }
            state.paired_at = Some(Instant::now());
            state.exchanges = 0;
        }
        self.seated.send_replace(seated);

        tracing::debug!("Session {}: player {} seated {:?}", self.id, player, side);
        Ok(())
    }

    /// Remove `player` from `side`; returns the number of players left
    pub async fn vacate(&self, side: Side, player: PlayerId) -> usize {
        let mut state = self.state.lock().await;

        let slot = &mut state.slots[side.index()];
        if slot.as_ref().is_some_and(|s| s.player == player) {
            *slot = None;
            state.paired_at = None;
            tracing::debug!("Session {}: player {} left {:?}", self.id, player, side);
        }

        let seated = state.occupancy().count();
        self.seated.send_replace(seated);
        seated
    }

    /// Current holder of the slot across from `side`
    pub async fn opponent(&self, side: Side) -> Option<PlayerSlot> {
        let state = self.state.lock().await;
        state.slots[side.opponent().index()].clone()
    }

    /// Store `snapshot` for `side` and return what `opponent` last reported.
    ///
    /// Nothing is written if `opponent` no longer holds the other slot.
    pub async fn exchange(
        &self,
        side: Side,
        opponent: PlayerId,
        snapshot: Snapshot,
    ) -> SessionResult<Exchange> {
        let mut state = self.state.lock().await;

        let theirs = match &state.slots[side.opponent().index()] {
            Some(slot) if slot.player == opponent => slot.snapshot,
            _ => return Ok(Exchange::OpponentGone),
        };

        let mine = state.slots[side.index()]
            .as_mut()
            .ok_or(SessionError::NotSeated(side))?;

        let pause = should_pause(&snapshot, &theirs);
        mine.snapshot = Snapshot {
            paused: pause,
            ..snapshot
        };
        state.exchanges += 1;

        if pause {
            tracing::debug!(
                "Session {}: {:?} ahead by {} ticks, pausing",
                self.id,
                side,
                lead(&snapshot, &theirs)
            );
        }

        Ok(Exchange::Relayed {
            opponent: theirs,
            pause,
        })
    }

    /// Reset the session for a fresh pairing, keeping its ID.
    ///
    /// Remaining players keep their seats but start again from the initial
    /// snapshot.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;

        for slot in state.slots.iter_mut().flatten() {
            slot.snapshot = Snapshot::default();
        }
        state.paired_at = None;
        state.exchanges = 0;
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        SessionStats {
            exchanges: state.exchanges,
            paired_for: state.paired_at.map(|at| at.elapsed()),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("seated", &*self.seated.borrow())
            .finish()
    }
}
