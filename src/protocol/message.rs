//! Protocol message definitions
//!
//! Defines the messages exchanged between the relay and the two players of a
//! game, and the snapshot record the relay forwards between them.

use serde::{Deserialize, Serialize};

/// Identifier of a game session
pub type SessionId = u64;

/// Identifier of one accepted connection
pub type PlayerId = u64;

/// Which half of the board a player owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    /// Slot index of this side (0 = left, 1 = right)
    pub fn index(self) -> usize {
        self as usize
    }

    /// The side across the net
    pub fn opponent(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Paddle position in board coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaddlePosition {
    pub x: i32,
    pub y: i32,
}

/// Running score as seen by one player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

/// One player's reported state at a point in time.
///
/// The relay never interprets the paddle or score; it only compares `sync`
/// counters and owns the `paused` flag it forwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub paddle: PaddlePosition,
    pub score: Score,
    /// Client-local tick counter, increases every simulated frame
    pub sync: u64,
    /// Pause flag decided by the sync governor
    pub paused: bool,
}

impl Snapshot {
    pub fn new(paddle: PaddlePosition, score: Score, sync: u64) -> Self {
        Self {
            paddle,
            score,
            sync,
            paused: false,
        }
    }
}

/// All possible protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Sent once the player has an opponent
    Welcome {
        session: SessionId,
        side: Side,
        width: u32,
        height: u32,
    },

    /// The opponent's starting snapshot, sent right after `Welcome`
    OpponentJoined(Snapshot),

    /// Player's state for the current tick
    Snapshot(Snapshot),

    /// Reply to `Snapshot`
    Relay {
        /// The opponent's latest snapshot
        opponent: Snapshot,
        /// Whether the receiving player should hold its simulation
        pause: bool,
    },

    /// The opponent disconnected; wait for a new `Welcome`
    OpponentLeft,

    /// Graceful disconnect
    Disconnect {
        reason: String,
    },

    /// Error message
    Error {
        code: u32,
        message: String,
    },
}

impl Message {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            Message::Welcome { .. } => 0x01,
            Message::OpponentJoined(_) => 0x02,
            Message::Snapshot(_) => 0x10,
            Message::Relay { .. } => 0x11,
            Message::OpponentLeft => 0x20,
            Message::Disconnect { .. } => 0xFE,
            Message::Error { .. } => 0xFF,
        }
    }

    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Message::Welcome { .. } => "Welcome",
            Message::OpponentJoined(_) => "OpponentJoined",
            Message::Snapshot(_) => "Snapshot",
            Message::Relay { .. } => "Relay",
            Message::OpponentLeft => "OpponentLeft",
            Message::Disconnect { .. } => "Disconnect",
            Message::Error { .. } => "Error",
        }
    }
}

/// Error codes for the Error message
pub mod error_codes {
    pub const SESSION_NOT_FOUND: u32 = 1;
    pub const UNEXPECTED_MESSAGE: u32 = 2;
    pub const OPPONENT_TIMEOUT: u32 = 3;
    pub const INTERNAL_ERROR: u32 = 100;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opponent() {
        assert_eq!(Side::Left.opponent(), Side::Right);
        assert_eq!(Side::Right.opponent(), Side::Left);
        assert_eq!(Side::Left.index(), 0);
        assert_eq!(Side::Right.index(), 1);
    }

    #[test]
    fn test_fresh_snapshot() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.sync, 0);
        assert_eq!(snapshot.score, Score { left: 0, right: 0 });
        assert!(!snapshot.paused);
    }

    #[test]
    fn test_message_type_ids() {
        assert_eq!(Message::OpponentLeft.type_id(), 0x20);
        assert_eq!(Message::Snapshot(Snapshot::default()).type_id(), 0x10);
        assert_eq!(
            Message::Disconnect { reason: String::new() }.type_id(),
            0xFE
        );
    }
}
