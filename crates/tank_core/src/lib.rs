//! # Tank Core
//!
//! Deterministic simulation core for the tank arena server.
//!
//! This crate contains **only** deterministic logic:
//! - No networking
//! - No IO
//! - No wall-clock reads
//! - No system randomness (respawn placement uses a seeded `ChaCha8Rng`)
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - A headless authoritative server
//! - Desync detection through state hashes
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`clock`] - Fixed-step accumulator
//! - [`tilemap`] - Two-layer terrain with adjacency masks
//! - [`spatial`] - Physics collaborator and the grid backend
//! - [`tank`], [`projectile`], [`pillbox`], [`station`] - Entity state machines
//! - [`build_queue`] and [`economy`] - Construction and resources
//! - [`simulation`] - Core simulation loop
//! - [`combat`] - Collision resolution
//! - [`sync`] - Snapshots, deltas and the client mirror
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod build_queue;
pub mod clock;
pub mod combat;
pub mod components;
pub mod data;
pub mod economy;
pub mod error;
pub mod events;
pub mod input;
pub mod math;
pub mod pillbox;
pub mod projectile;
pub mod simulation;
pub mod spatial;
pub mod station;
pub mod sync;
pub mod tank;
pub mod tilemap;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::build_queue::{BuildItem, BuildKind, BuildQueue};
    pub use crate::clock::{SimulationClock, TICK_RATE};
    pub use crate::components::{EntityId, Health, SessionId, Team};
    pub use crate::data::{GameRules, MapData};
    pub use crate::error::{GameError, Result};
    pub use crate::events::{CommandOutcome, GameEvent, Rejection, TickEvents};
    pub use crate::input::{InputQueue, PlayerCommand, PlayerInput};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::pillbox::{Pillbox, PillboxPhase, PillboxState};
    pub use crate::projectile::{Projectile, ProjectileOwner};
    pub use crate::simulation::{MatchState, Simulation};
    pub use crate::station::Station;
    pub use crate::sync::{SnapshotMirror, WorldDelta, WorldSnapshot};
    pub use crate::tank::{Tank, TankState};
    pub use crate::tilemap::{Layer, TileCoord, TileFamily, TileIndex, TileMap};
}
