//! Error types for the tank simulation.

use thiserror::Error;

use crate::pillbox::PillboxPhase;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all simulation errors.
///
/// Expected gameplay rejections (not enough wood, target out of range) are not
/// errors; they are reported as [`crate::events::CommandOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum GameError {
    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(u64),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Map description is structurally invalid.
    #[error("Invalid map '{name}': {reason}")]
    InvalidMap {
        /// Map name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Pillbox asked to perform a transition its state machine does not allow.
    #[error("Invalid pillbox transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Pillbox id.
        id: u64,
        /// Current phase.
        from: PillboxPhase,
        /// Requested phase.
        to: PillboxPhase,
    },

    /// A delta was applied to a mirror that is not at the delta's base tick.
    #[error("Delta base tick {base_tick} does not match mirror tick {mirror_tick}")]
    StaleDelta {
        /// Tick the delta was computed against.
        base_tick: u64,
        /// Tick the mirror currently holds.
        mirror_tick: u64,
    },

    /// Snapshot bytes could not be encoded or decoded.
    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected between two simulations.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}
