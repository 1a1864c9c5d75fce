//! Pong Relay - two-player pong state relay
//!
//! Pairs incoming players into sessions and forwards each player's paddle
//! and score to their opponent, keeping the two clients in lockstep.

mod config;
mod network;
mod protocol;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{resolve_host, Client, Reply, Server, ServerEvent};
use protocol::{PaddlePosition, Score, Snapshot};

/// Pong Relay - pairs players and relays game state
#[derive(Parser)]
#[command(name = "pong-relay")]
#[command(author = "Pong Relay Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Pair pong players and relay their game state", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Interface to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Board width sent to players
        #[arg(long)]
        width: Option<u32>,

        /// Board height sent to players
        #[arg(long)]
        height: Option<u32>,
    },

    /// Join a game as a headless player
    Bot {
        /// Server address (host or host:port)
        #[arg(short, long)]
        server: String,

        /// Number of snapshots to exchange before leaving
        #[arg(short, long, default_value_t = 600)]
        ticks: u64,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration; a broken default file is reported once logging is up
    let (mut config, load_warning) = if let Some(config_path) = &cli.config {
        (Config::load(config_path)?, None)
    } else {
        Config::load_default_or_report()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Some(e) = load_warning {
        tracing::warn!("Ignoring configuration file, using defaults: {}", e);
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            width,
            height,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(width) = width {
                config.game.width = width;
            }
            if let Some(height) = height {
                config.game.height = height;
            }
            run_server(config).await?;
        }
        Commands::Bot { server, ticks } => {
            let addr = parse_server_addr(&server).await?;
            run_bot(addr, ticks).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

/// Run the relay server until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    let settings = config.server_settings();
    let mut server = Server::new(settings.clone());

    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let bind_addr = server.start().await?;

    println!("\n========================================");
    println!("  Pong Relay Running");
    println!("========================================");
    println!("  Address: {}", bind_addr);
    println!("  Board: {}x{}", settings.relay.width, settings.relay.height);
    println!("========================================");
    println!("\nWaiting for players...");
    println!("Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::PlayerJoined { addr, session, side } => {
                        println!("+ {} joined session {} ({:?})", addr, session, side);
                    }
                    ServerEvent::PlayerLeft { addr, session, side, reason } => {
                        println!("- {} left session {} ({:?}): {}", addr, session, side, reason);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::info!("Accepting players on {}", bind_addr);
                    }
                    ServerEvent::Stopped => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Accept either `host:port` or a bare host on the default port
async fn parse_server_addr(server: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) = match server.rsplit_once(':') {
        Some((host, port)) => (host, port.parse()?),
        None => (server, protocol::DEFAULT_PORT),
    };

    Ok(resolve_host(host, port).await?)
}

/// Play `ticks` exchanges as a paddle that sweeps up and down
async fn run_bot(addr: SocketAddr, ticks: u64) -> anyhow::Result<()> {
    let mut client = Client::connect(addr, Duration::from_secs(5)).await?;
    println!("Connected to {}, waiting for an opponent...", client.server_addr());

    let mut game = client.wait_for_match().await?;
    println!(
        "Paired in session {} as {:?} on a {}x{} board",
        game.session, game.side, game.width, game.height
    );

    let mut sync = 0u64;
    let mut played = 0u64;
    let mut y = 0i32;
    let mut step = 10i32;
    let mut last_opponent = game.opponent;

    while played < ticks {
        y += step;
        if y <= 0 || y >= game.height as i32 {
            step = -step;
        }

        let snapshot = Snapshot::new(PaddlePosition { x: 0, y }, Score::default(), sync);
        match client.exchange(snapshot).await? {
            Reply::Relay { opponent, pause } => {
                last_opponent = opponent;
                played += 1;
                // Hold our clock while ahead
                if !pause {
                    sync += 1;
                }
                tracing::debug!("tick {} opponent at {:?} pause={}", sync, opponent.paddle, pause);
            }
            Reply::OpponentLeft => {
                println!("Opponent left, waiting for a new one...");
                game = client.wait_for_match().await?;
                sync = 0;
                last_opponent = game.opponent;
            }
        }

        tokio::time::sleep(Duration::from_millis(16)).await;
    }

    println!(
        "Played {} ticks; last opponent score {}:{}",
        played, last_opponent.score.left, last_opponent.score.right
    );
    client.disconnect().await?;

    Ok(())
}

/// Print protocol information
fn print_info(config: &Config) {
    println!("Pong Relay Information");
    println!("======================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Max Message Size: {} bytes", protocol::MAX_MESSAGE_SIZE);
    println!("Players per Session: {}", session::SLOTS);
    println!(
        "Board: {}x{} (default {}x{})",
        config.game.width,
        config.game.height,
        protocol::DEFAULT_WIDTH,
        protocol::DEFAULT_HEIGHT
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["pong-relay", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["pong-relay", "bot", "--server", "localhost:4567", "--ticks", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Bot { ticks: 5, .. }));

        let cli = Cli::try_parse_from(["pong-relay", "--verbose", "serve", "--port", "0"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(0), .. }));
    }

    #[tokio::test]
    async fn test_parse_server_addr() {
        let addr = parse_server_addr("127.0.0.1:9000").await.unwrap();
        assert_eq!(addr.port(), 9000);

        let addr = parse_server_addr("127.0.0.1").await.unwrap();
        assert_eq!(addr.port(), protocol::DEFAULT_PORT);
    }
}
