//! # Tank Arena Dedicated Server
//!
//! Headless authoritative server for multiplayer matches.
//!
//! Runs the simulation without rendering. One task owns the simulation and
//! ticks it at the fixed rate; per-connection tasks only move bytes. Clients
//! get a full snapshot when they join and a delta plus events after every
//! tick.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod game_loop;
pub mod network;
pub mod protocol;
pub mod sync;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use tank_core::data::{GameRules, MapData};
use tank_core::simulation::Simulation;

pub use config::ServerConfig;
pub use error::{Result, ServerError};

use game_loop::GameLoop;
use network::{accept_loop, NetChannels};
use sync::SyncServer;

/// Bind the configured address and serve until the listener fails.
pub async fn run(config: ServerConfig, rules: GameRules, map: MapData) -> Result<()> {
    let address = config.bind_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%address, error = %e, "Failed to bind");
            return Err(e.into());
        }
    };
    run_with_listener(listener, config, rules, map).await
}

/// Serve on an already bound listener.
pub async fn run_with_listener(listener: TcpListener, config: ServerConfig, rules: GameRules, map: MapData) -> Result<()> {
    let tick_rate = rules.tick_rate;
    let sim = Simulation::new(rules, map)?;
    let server = SyncServer::new(sim, &config);

    // events: every reader feeds the single game loop.
    let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
    // updates: encoded tick updates shared by all writers.
    let (updates_tx, _updates_rx) = broadcast::channel(config.broadcast_capacity.max(1));
    // latest: full state for writers that lag behind the broadcast.
    let (latest_tx, latest_rx) = watch::channel(Arc::new(server.latest().clone()));

    let channels = NetChannels {
        events: events_tx,
        updates: updates_tx.clone(),
        latest: latest_rx,
        outbox_capacity: config.outbox_capacity,
    };
    let game = GameLoop::new(server, tick_rate, config.max_catch_up_ticks, events_rx, updates_tx, latest_tx);
    let game = tokio::spawn(game.run());

    info!(address = %listener.local_addr()?, max_players = config.max_players, tick_rate, "Listening");
    serve(listener, channels, game).await
}

/// Accept connections for as long as the `game` task keeps running.
///
/// Returns [`ServerError::GameLoopStopped`] once the game task ends, whether
/// it returned or panicked. The game task is aborted if accepting fails.
pub async fn serve(listener: TcpListener, channels: NetChannels, mut game: JoinHandle<()>) -> Result<()> {
    tokio::select! {
        joined = &mut game => {
            let reason = match joined {
                Ok(()) => "exited".to_string(),
                Err(e) if e.is_panic() => "panicked".to_string(),
                Err(e) => e.to_string(),
            };
            error!(%reason, "Game loop stopped, shutting down");
            Err(ServerError::GameLoopStopped(reason))
        }
        served = accept_loop(listener, channels) => {
            game.abort();
            served
        }
    }
}
