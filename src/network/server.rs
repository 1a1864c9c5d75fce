//! Relay server
//!
//! Accepts player connections, seats each one in a session and hands the
//! connection to its own relay task.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::Connection;
use super::relay::{CloseReason, Relay, RelayError};
use super::{RelaySettings, ServerSettings};
use crate::protocol::{SessionId, Side};
use crate::session::{Assignment, SessionRegistry};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started {
        bind_addr: SocketAddr,
    },
    /// A player was seated in a session
    PlayerJoined {
        addr: SocketAddr,
        session: SessionId,
        side: Side,
    },
    /// A player's relay ended
    PlayerLeft {
        addr: SocketAddr,
        session: SessionId,
        side: Side,
        reason: String,
    },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error {
        message: String,
    },
}

/// Relay server
pub struct Server {
    /// Server configuration
    settings: ServerSettings,
    /// Live sessions, shared with every relay
    registry: Arc<SessionRegistry>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(settings: ServerSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            settings,
            registry: Arc::new(SessionRegistry::new()),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Sessions served by this server
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Start the server; returns the address actually bound
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = self.settings.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self.event_tx.try_send(ServerEvent::Started { bind_addr: local_addr });

        let registry = self.registry.clone();
        let event_tx = self.event_tx.clone();
        let relay_settings = self.settings.relay.clone();
        let running = self.running.clone();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                // Seat in accept order so pairing follows arrival order
                                let assignment = match registry.allocate().await {
                                    Ok(assignment) => assignment,
                                    Err(e) => {
                                        tracing::error!("Could not seat {}: {}", addr, e);
                                        let _ = event_tx.try_send(ServerEvent::Error {
                                            message: e.to_string(),
                                        });
                                        continue;
                                    }
                                };

                                let registry = registry.clone();
                                let event_tx = event_tx.clone();
                                let relay_settings = relay_settings.clone();

                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(
                                        stream,
                                        addr,
                                        assignment,
                                        registry,
                                        event_tx,
                                        relay_settings,
                                    ).await {
                                        tracing::warn!("Player {} ({}) dropped: {}", assignment.player, addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.try_send(ServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop accepting new players. Games in progress run until their players
    /// leave.
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Run one player's relay to completion
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    assignment: Assignment,
    registry: Arc<SessionRegistry>,
    event_tx: mpsc::Sender<ServerEvent>,
    settings: RelaySettings,
) -> ServerResult<CloseReason> {
    let Assignment { session, side, player } = assignment;
    tracing::info!("Player {} ({}) seated in session {} on {:?}", player, addr, session, side);

    let _ = event_tx.try_send(ServerEvent::PlayerJoined { addr, session, side });

    // Snapshots are tiny; don't let Nagle hold them back
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let relay = Relay::new(Connection::new(stream, addr), registry, settings, assignment);
    let outcome = relay.run().await;

    let reason = match &outcome {
        Ok(reason) => reason.to_string(),
        Err(e) => e.to_string(),
    };
    let _ = event_tx.try_send(ServerEvent::PlayerLeft {
        addr,
        session,
        side,
        reason,
    });

    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Client, Reply};
    use crate::protocol::Snapshot;
    use std::time::Duration;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    async fn start_server() -> (Server, SocketAddr) {
        let mut server = Server::new(ServerSettings::new("127.0.0.1", 0));
        let addr = server.start().await.unwrap();
        (server, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        Client::connect(addr, CONNECT_TIMEOUT).await.unwrap()
    }

    /// Poll the registry until `check` holds, for asserting on state changed
    /// by relay tasks
    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = Server::new(ServerSettings::default());
        assert!(!server.is_running().await);
        assert!(server.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut server, _) = start_server().await;
        assert!(server.is_running().await);
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));

        server.stop().await.unwrap();
        let running = server.running.clone();
        eventually(|| {
            let running = running.clone();
            async move { !*running.read().await }
        })
        .await;
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_pairing_follows_arrival_order() {
        let (server, addr) = start_server().await;

        let mut first = connect(addr).await;
        let mut second = connect(addr).await;
        let mut third = connect(addr).await;
        let mut fourth = connect(addr).await;

        let first = first.wait_for_match().await.unwrap();
        let second = second.wait_for_match().await.unwrap();
        let third = third.wait_for_match().await.unwrap();
        let fourth = fourth.wait_for_match().await.unwrap();

        assert_eq!((first.session, first.side), (0, Side::Left));
        assert_eq!((second.session, second.side), (0, Side::Right));
        assert_eq!((third.session, third.side), (1, Side::Left));
        assert_eq!((fourth.session, fourth.side), (1, Side::Right));
        assert_eq!(server.registry().len().await, 2);
    }

    #[tokio::test]
    async fn test_full_game_over_tcp() {
        let (mut server, addr) = start_server().await;
        let mut events = server.take_event_receiver().unwrap();

        let mut left = connect(addr).await;
        let mut right = connect(addr).await;
        left.wait_for_match().await.unwrap();
        right.wait_for_match().await.unwrap();

        // Left always reports first, so it is one tick ahead when it asks
        for tick in 1..=10u64 {
            let mine = Snapshot { sync: tick, ..Default::default() };
            match left.exchange(mine).await.unwrap() {
                Reply::Relay { opponent, pause } => {
                    assert_eq!(opponent.sync, tick - 1);
                    assert!(pause);
                }
                Reply::OpponentLeft => panic!("opponent left"),
            }
            match right.exchange(mine).await.unwrap() {
                Reply::Relay { opponent, pause } => {
                    assert_eq!(opponent.sync, tick);
                    assert!(opponent.paused);
                    assert!(!pause);
                }
                Reply::OpponentLeft => panic!("opponent left"),
            }
        }

        left.disconnect().await.unwrap();
        drop(right);

        let mut joined = 0;
        let mut departed = 0;
        while departed < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                ServerEvent::PlayerJoined { .. } => joined += 1,
                ServerEvent::PlayerLeft { .. } => departed += 1,
                _ => {}
            }
        }
        assert_eq!(joined, 2);

        // Both relays retired the session before reporting
        assert!(server.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_replacement_player_gets_free_side() {
        let (server, addr) = start_server().await;

        let mut left = connect(addr).await;
        let mut right = connect(addr).await;
        left.wait_for_match().await.unwrap();
        right.wait_for_match().await.unwrap();

        left.disconnect().await.unwrap();

        let registry = server.registry();
        eventually(|| {
            let registry = registry.clone();
            async move {
                registry
                    .sessions()
                    .await
                    .first()
                    .is_some_and(|(_, occupancy)| occupancy.count() == 1)
            }
        })
        .await;

        assert_eq!(right.exchange(Snapshot::default()).await.unwrap(), Reply::OpponentLeft);

        let mut replacement = connect(addr).await;
        let seat = replacement.wait_for_match().await.unwrap();
        assert_eq!((seat.session, seat.side), (0, Side::Left));

        let rematch = right.wait_for_match().await.unwrap();
        assert_eq!((rematch.session, rematch.side), (0, Side::Right));
        assert_eq!(server.registry().len().await, 1);
    }
}
