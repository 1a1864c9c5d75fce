//! Sync governor
//!
//! Keeps the two simulations of a game roughly in step. Each exchange the
//! relay compares the players' tick counters and tells the one that is ahead
//! to hold. The relay itself never throttles; the flag is only forwarded.

use crate::protocol::Snapshot;

/// Decide whether the owner of `mine` should pause.
///
/// A player strictly ahead of its opponent pauses; a player level with or
/// behind its opponent proceeds.
pub fn should_pause(mine: &Snapshot, theirs: &Snapshot) -> bool {
    mine.sync > theirs.sync
}

/// Number of ticks `mine` is ahead of `theirs` (negative when behind)
pub fn lead(mine: &Snapshot, theirs: &Snapshot) -> i128 {
    mine.sync as i128 - theirs.sync as i128
}
