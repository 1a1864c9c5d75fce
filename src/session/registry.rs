//! Session registry
//!
//! Owns every live session. Pairing of new players happens under the registry
//! write lock so two concurrent allocations never see the same free slot.
//! Lock order is always registry, then session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::{place, Occupancy, Placement, Session, SessionError};
use crate::protocol::{PlayerId, SessionId, Side};

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Where a newly connected player was seated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub player: PlayerId,
    pub session: SessionId,
    pub side: Side,
}

/// What `retire` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// The session was empty and is gone
    Retired,
    /// One player is still seated; the session was cleared for a new opponent
    Cleared,
    /// Both sides were taken again before retirement; left untouched
    Kept,
}

struct Sessions {
    /// In creation order
    list: Vec<Arc<Session>>,
    next_id: SessionId,
}

/// All live sessions
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    next_player: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Sessions {
                list: Vec::new(),
                next_id: 0,
            }),
            next_player: AtomicU64::new(0),
        }
    }

    /// Look up a live session
    pub async fn find(&self, id: SessionId) -> RegistryResult<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .list
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Seat a new player according to the pairing policy
    pub async fn allocate(&self) -> RegistryResult<Assignment> {
        let mut sessions = self.sessions.write().await;

        let mut view = Vec::with_capacity(sessions.list.len());
        for session in &sessions.list {
            view.push((session.id(), session.occupancy().await));
        }

        let (session, side) = match place(view) {
            Placement::Join { session, side } => {
                let session = sessions
                    .list
                    .iter()
                    .find(|s| s.id() == session)
                    .cloned()
                    .ok_or(RegistryError::NotFound(session))?;
                (session, side)
            }
            Placement::Open => {
                let id = sessions.next_id;
                sessions.next_id += 1;

                let session = Arc::new(Session::new(id));
                sessions.list.push(session.clone());
                tracing::info!("Opened session {}", id);
                (session, Side::Left)
            }
        };

        let player = self.next_player.fetch_add(1, Ordering::SeqCst);
        session.occupy(side, player).await?;

        Ok(Assignment {
            player,
            session: session.id(),
            side,
        })
    }

    /// Drop a session once nobody is seated in it.
    ///
    /// With one player still seated the session stays and is cleared so a
    /// replacement opponent can be paired into the free side. A session that
    /// was filled again in the meantime is a live game and is not touched.
    pub async fn retire(&self, id: SessionId) -> RegistryResult<Retirement> {
        let mut sessions = self.sessions.write().await;

        let index = sessions
            .list
            .iter()
            .position(|s| s.id() == id)
            .ok_or(RegistryError::NotFound(id))?;

        let session = &sessions.list[index];
        match session.occupancy().await.count() {
            0 => {
                let stats = session.stats().await;
                sessions.list.remove(index);
                tracing::info!("Retired session {} ({} exchanges)", id, stats.exchanges);
                Ok(Retirement::Retired)
            }
            1 => {
                session.clear().await;
                tracing::info!("Session {} waiting for a new opponent", id);
                Ok(Retirement::Cleared)
            }
            _ => {
                tracing::debug!("Session {} already re-paired, keeping it", id);
                Ok(Retirement::Kept)
            }
        }
    }

    /// Occupancy of every live session, in creation order
    pub async fn sessions(&self) -> Vec<(SessionId, Occupancy)> {
        let sessions = self.sessions.read().await;
        let mut view = Vec::with_capacity(sessions.list.len());
        for session in &sessions.list {
            view.push((session.id(), session.occupancy().await));
        }
        view
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.list.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.list.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Snapshot;

    #[tokio::test]
    async fn test_first_fit_assignments() {
        let registry = SessionRegistry::new();

        let first = registry.allocate().await.unwrap();
        let second = registry.allocate().await.unwrap();
        let third = registry.allocate().await.unwrap();

        assert_eq!((first.session, first.side), (0, Side::Left));
        assert_eq!((second.session, second.side), (0, Side::Right));
        assert_eq!((third.session, third.side), (1, Side::Left));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_player_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.allocate().await.unwrap();
        let b = registry.allocate().await.unwrap();
        assert_ne!(a.player, b.player);
    }

    #[tokio::test]
    async fn test_find_missing_session() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.find(3).await.unwrap_err(),
            RegistryError::NotFound(3)
        );
    }

    #[tokio::test]
    async fn test_freed_side_goes_to_next_player() {
        let registry = SessionRegistry::new();
        let left = registry.allocate().await.unwrap();
        let right = registry.allocate().await.unwrap();

        let session = registry.find(left.session).await.unwrap();
        assert_eq!(session.vacate(left.side, left.player).await, 1);
        assert_eq!(registry.retire(left.session).await, Ok(Retirement::Cleared));
        assert!(registry.find(left.session).await.is_ok());

        let replacement = registry.allocate().await.unwrap();
        assert_eq!(replacement.session, right.session);
        assert_eq!(replacement.side, Side::Left);
        assert_eq!(replacement.side, right.side.opponent());
    }

    #[tokio::test]
    async fn test_retire_after_seat_refilled_keeps_live_game() {
        let registry = SessionRegistry::new();
        let left = registry.allocate().await.unwrap();
        let right = registry.allocate().await.unwrap();
        let session = registry.find(left.session).await.unwrap();

        // The replacement is seated between the vacate and the retire
        session.vacate(right.side, right.player).await;
        let newcomer = registry.allocate().await.unwrap();
        assert_eq!((newcomer.session, newcomer.side), (right.session, right.side));

        let mine = Snapshot {
            sync: 7,
            ..Default::default()
        };
        session
            .exchange(newcomer.side, left.player, mine)
            .await
            .unwrap();

        assert_eq!(registry.retire(left.session).await, Ok(Retirement::Kept));

        let stored = session.opponent(left.side).await.unwrap();
        assert_eq!(stored.player, newcomer.player);
        assert_eq!(stored.snapshot.sync, 7);

        let stats = session.stats().await;
        assert_eq!(stats.exchanges, 1);
        assert!(stats.paired_for.is_some());
    }

    #[tokio::test]
    async fn test_retire_empty_session() {
        let registry = SessionRegistry::new();
        let left = registry.allocate().await.unwrap();
        let right = registry.allocate().await.unwrap();

        let session = registry.find(left.session).await.unwrap();
        session.vacate(left.side, left.player).await;
        session.vacate(right.side, right.player).await;

        assert_eq!(registry.retire(left.session).await, Ok(Retirement::Retired));
        assert!(registry.is_empty().await);
        assert_eq!(
            registry.find(left.session).await.unwrap_err(),
            RegistryError::NotFound(left.session)
        );
        assert_eq!(
            registry.retire(left.session).await,
            Err(RegistryError::NotFound(left.session))
        );
    }

    #[tokio::test]
    async fn test_retired_ids_are_not_reused() {
        let registry = SessionRegistry::new();
        let only = registry.allocate().await.unwrap();
        let session = registry.find(only.session).await.unwrap();
        session.vacate(only.side, only.player).await;
        registry.retire(only.session).await.unwrap();

        let next = registry.allocate().await.unwrap();
        assert_eq!(next.session, 1);
        assert_eq!(next.side, Side::Left);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_keep_invariants() {
        let registry = Arc::new(SessionRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.allocate().await.unwrap() }));
        }

        let mut assignments = Vec::new();
        for handle in handles {
            assignments.push(handle.await.unwrap());
        }

        // 64 players fill exactly 32 sessions, each with one left and one right
        let sessions = registry.sessions().await;
        assert_eq!(sessions.len(), 32);
        assert!(sessions.iter().all(|(_, occupancy)| occupancy.is_full()));

        for (id, _) in &sessions {
            let seated: Vec<_> = assignments.iter().filter(|a| a.session == *id).collect();
            assert_eq!(seated.len(), 2);
            assert_ne!(seated[0].side, seated[1].side);
        }
    }
}
