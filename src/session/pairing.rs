//! Pairing policy
//!
//! First-fit placement of a new player: the oldest session with a free slot
//! wins, otherwise a new session is opened. No balancing of any kind.

use crate::protocol::{SessionId, Side};

/// Which sides of a session are currently taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub left: bool,
    pub right: bool,
}

impl Occupancy {
    pub fn is_taken(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn count(&self) -> usize {
        self.left as usize + self.right as usize
    }

    pub fn is_full(&self) -> bool {
        self.left && self.right
    }

    /// The side a newcomer gets: the complement of the taken one, left when empty
    pub fn free_side(&self) -> Option<Side> {
        [Side::Left, Side::Right]
            .into_iter()
            .find(|&side| !self.is_taken(side))
    }
}

/// Where a new player goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Join an existing session on the given side
    Join { session: SessionId, side: Side },
    /// Open a new session; the newcomer takes the left side
    Open,
}

/// Pick a placement given the sessions in creation order
pub fn place<I>(sessions: I) -> Placement
where
    I: IntoIterator<Item = (SessionId, Occupancy)>,
{
    sessions
        .into_iter()
        .find_map(|(session, occupancy)| {
            occupancy
                .free_side()
                .map(|side| Placement::Join { session, side })
        })
        .unwrap_or(Placement::Open)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: Occupancy = Occupancy { left: false, right: false };
    const LEFT: Occupancy = Occupancy { left: true, right: false };
    const RIGHT: Occupancy = Occupancy { left: false, right: true };
    const FULL: Occupancy = Occupancy { left: true, right: true };

    #[test]
    fn test_no_sessions_opens_one() {
        assert_eq!(place(Vec::new()), Placement::Open);
    }

    #[test]
    fn test_complement_side() {
        assert_eq!(LEFT.free_side(), Some(Side::Right));
        assert_eq!(RIGHT.free_side(), Some(Side::Left));
        assert_eq!(EMPTY.free_side(), Some(Side::Left));
        assert_eq!(FULL.free_side(), None);
    }

    #[test]
    fn test_first_fit_in_creation_order() {
        let sessions = vec![(0, FULL), (1, RIGHT), (2, EMPTY)];
        assert_eq!(
            place(sessions),
            Placement::Join { session: 1, side: Side::Left }
        );
    }

    #[test]
    fn test_all_full_opens_new() {
        let sessions = vec![(0, FULL), (1, FULL)];
        assert_eq!(place(sessions), Placement::Open);
    }

    #[test]
    fn test_occupancy_count() {
        assert_eq!(EMPTY.count(), 0);
        assert_eq!(LEFT.count(), 1);
        assert_eq!(FULL.count(), 2);
        assert!(FULL.is_full());
        assert!(RIGHT.is_taken(Side::Right));
        assert!(!RIGHT.is_taken(Side::Left));
    }
}
