//! Error types for the dedicated server.

use thiserror::Error;

use tank_core::components::SessionId;
use tank_core::error::GameError;

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised by the transport, configuration loading and the game loop.
///
/// Malformed client frames are not errors at this level; the reader drops
/// them and keeps the session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded or decoded.
    #[error("Wire encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    /// A RON data file did not parse.
    #[error("Invalid data file: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// The simulation refused an operation.
    #[error("Simulation error: {0}")]
    Game(#[from] GameError),

    /// A peer announced a frame larger than the limit.
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced payload size.
        size: usize,
        /// Largest accepted payload.
        max: usize,
    },

    /// The task that ticks the simulation ended.
    #[error("Game loop stopped: {0}")]
    GameLoopStopped(String),

    /// A message named a session the server does not know.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
}

impl ServerError {
    /// True if the peer should be disconnected rather than merely ignored.
    #[must_use]
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self, Self::Io(_) | Self::FrameTooLarge { .. })
    }
}
