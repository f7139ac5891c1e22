//! Server configuration and data file loading.
//!
//! Settings come from built-in defaults, overridden by `TANK_*` environment
//! variables, overridden by command-line flags. Missing or broken map and
//! rules files fall back to the built-in data with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, warn};

use tank_core::data::{GameRules, MapData};

use crate::error::Result;

/// Runtime settings for the dedicated server (not gameplay tuning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum concurrent players.
    pub max_players: usize,
    /// RON map file; the built-in arena is used when absent.
    pub map_path: Option<PathBuf>,
    /// RON rules file; stock rules are used when absent.
    pub rules_path: Option<PathBuf>,
    /// Capacity of the reader-to-game-loop channel.
    pub event_channel_capacity: usize,
    /// Tick updates buffered per client before it counts as lagging.
    pub broadcast_capacity: usize,
    /// Direct messages buffered per client.
    pub outbox_capacity: usize,
    /// Inputs buffered per session between ticks.
    pub input_buffer: usize,
    /// Most ticks run in one catch-up burst after a stall.
    pub max_catch_up_ticks: u32,
    /// Broadcast a full snapshot every this many ticks; 0 disables.
    pub keyframe_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            max_players: 16,
            map_path: None,
            rules_path: None,
            event_channel_capacity: 1024,
            broadcast_capacity: 128,
            outbox_capacity: 64,
            input_buffer: tank_core::input::DEFAULT_INPUT_BUFFER,
            max_catch_up_ticks: 10,
            keyframe_interval: 600,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Command-line flags. Each one can also be set through its environment variable.
#[derive(Debug, Parser)]
#[command(name = "tank_server")]
#[command(about = "Authoritative tank-combat game server")]
#[command(version)]
pub struct Cli {
    /// Interface to bind
    #[arg(long, env = "TANK_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "TANK_PORT")]
    pub port: Option<u16>,

    /// Maximum concurrent players
    #[arg(long, env = "TANK_MAX_PLAYERS")]
    pub max_players: Option<usize>,

    /// RON map file
    #[arg(long, env = "TANK_MAP")]
    pub map: Option<PathBuf>,

    /// RON rules file
    #[arg(long, env = "TANK_RULES")]
    pub rules: Option<PathBuf>,

    /// Full snapshot broadcast interval in ticks (0 disables)
    #[arg(long, env = "TANK_KEYFRAME_INTERVAL")]
    pub keyframe_interval: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Defaults with every given flag applied.
    #[must_use]
    pub fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if let Some(interval) = self.keyframe_interval {
            config.keyframe_interval = interval;
        }
        config.map_path = self.map;
        config.rules_path = self.rules;
        config
    }
}

/// Read and parse a RON file.
pub fn read_ron<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(ron::from_str(&text)?)
}

/// Rules from `path`, or the stock rules if there is no usable file.
#[must_use]
pub fn load_rules(path: Option<&Path>) -> GameRules {
    let Some(path) = path else {
        return GameRules::default();
    };
    match read_ron::<GameRules>(path) {
        Ok(rules) if rules.tick_rate > 0 && rules.tile_size > 0 => {
            info!(path = %path.display(), "Loaded rules");
            rules
        }
        Ok(_) => {
            warn!(path = %path.display(), "Rules need a non-zero tick rate and tile size, using defaults");
            GameRules::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load rules, using defaults");
            GameRules::default()
        }
    }
}

/// Map from `path`, or the built-in arena if there is no usable file.
#[must_use]
pub fn load_map(path: Option<&Path>) -> MapData {
    let Some(path) = path else {
        return MapData::default_arena();
    };
    let loaded = read_ron::<MapData>(path).and_then(|map| {
        map.validate()?;
        Ok(map)
    });
    match loaded {
        Ok(map) => {
            info!(path = %path.display(), name = %map.name, width = map.width, height = map.height, "Loaded map");
            map
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load map, using built-in arena");
            MapData::default_arena()
        }
    }
}
