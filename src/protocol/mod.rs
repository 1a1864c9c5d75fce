//! Protocol module - Defines the wire protocol between relay and players
//!
//! The protocol uses a simple binary frame:
//! - 4 magic bytes
//! - 1 byte message type
//! - 4 bytes payload length (big-endian)
//! - 4 bytes sequence number (big-endian)
//! - Variable length payload (bincode)

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for the relay
pub const DEFAULT_PORT: u16 = 4567;

/// Default board size sent to players at pairing
pub const DEFAULT_WIDTH: u32 = 700;
pub const DEFAULT_HEIGHT: u32 = 700;

/// Magic bytes for protocol identification
pub const MAGIC_BYTES: [u8; 4] = [0x50, 0x4F, 0x4E, 0x47]; // "PONG"
