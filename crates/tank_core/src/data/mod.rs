//! Data structures for match configuration.
//!
//! Tuning rules and map descriptions are plain data designed to be
//! deserialized from RON files. Values are integers (world units,
//! per-second rates, milliseconds, percents) so the files stay readable;
//! the simulation converts them to fixed-point at use.
//!
//! **Note:** This module contains no IO - it only parses strings.
//! File loading is handled by `tank_server`.

mod map_data;
mod rules;

pub use map_data::{MapData, PillboxSpawn, SpawnPoint, StationSpawn};
pub use rules::{
    BuildCost, BuildRules, GameRules, MatchRules, PickupRules, PillboxRules, ProjectileRules,
    StationRules, TankRules,
};

use serde::de::DeserializeOwned;

use crate::error::{GameError, Result};

/// Parse a RON document, labelling errors with `source_name`.
pub fn from_ron<T: DeserializeOwned>(text: &str, source_name: &str) -> Result<T> {
    ron::from_str(text).map_err(|e| GameError::DataParseError {
        path: source_name.to_string(),
        message: e.to_string(),
    })
}
