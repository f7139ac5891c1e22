//! Wire messages and framing.
//!
//! Every frame is a big-endian `u32` payload length followed by a bincode
//! payload. Client frames are limited to [`MAX_CLIENT_FRAME`] bytes; a larger
//! announcement closes the session.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tank_core::build_queue::BuildKind;
use tank_core::components::{EntityId, SessionId, Team};
use tank_core::events::GameEvent;
use tank_core::input::{PlayerCommand, PlayerInput};
use tank_core::math::ratio;
use tank_core::sync::{WorldDelta, WorldSnapshot};
use tank_core::tilemap::TileCoord;

use crate::error::{Result, ServerError};

/// Largest payload accepted from a client.
pub const MAX_CLIENT_FRAME: usize = 64 * 1024;

/// Largest payload a client accepts from the server.
pub const MAX_SERVER_FRAME: usize = 16 * 1024 * 1024;

/// Chat message length limit, in characters.
pub const MAX_CHAT_CHARS: usize = 100;

/// An encoded, length-prefixed frame shared between writers.
pub type Frame = Arc<[u8]>;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Ask for a tank.
    Join {
        /// Display name.
        name: String,
    },
    /// Latest controls.
    Input {
        /// Steering in `[-1, 1]`.
        turn_rate: f32,
        /// Throttle.
        up: bool,
        /// Trigger.
        fire: bool,
        /// Client tick the input was sampled at.
        tick: u64,
    },
    /// Queue construction or harvesting.
    Build {
        /// 2x2 selection.
        tiles: Vec<TileCoord>,
        /// What to do.
        kind: BuildKind,
    },
    /// Put down a carried pillbox.
    PlacePillbox {
        /// 2x2 selection.
        tiles: Vec<TileCoord>,
    },
    /// Spend steel on a pillbox.
    BuildPillbox,
    /// Drop a queued build item.
    CancelBuild {
        /// Queue position.
        index: usize,
    },
    /// Say something.
    Chat {
        /// Text, 1 to 100 characters.
        message: String,
        /// Everyone, or only the sender's team.
        is_all_chat: bool,
    },
}

impl ClientMessage {
    /// The world command this message carries, if any.
    #[must_use]
    pub fn command(&self) -> Option<PlayerCommand> {
        match self {
            Self::Build { tiles, kind } => Some(PlayerCommand::Build {
                tiles: tiles.clone(),
                kind: *kind,
            }),
            Self::PlacePillbox { tiles } => Some(PlayerCommand::PlacePillbox { tiles: tiles.clone() }),
            Self::BuildPillbox => Some(PlayerCommand::BuildPillbox),
            Self::CancelBuild { index } => Some(PlayerCommand::CancelBuild { index: *index }),
            Self::Join { .. } | Self::Input { .. } | Self::Chat { .. } => None,
        }
    }
}

/// Convert wire controls into a simulation input.
///
/// The turn rate is clamped to `[-1, 1]` and quantised to thousandths so the
/// simulation only ever sees fixed-point values. Non-finite rates count as 0.
#[must_use]
pub fn input_from_wire(turn_rate: f32, up: bool, fire: bool, tick: u64) -> PlayerInput {
    let turn = if turn_rate.is_finite() {
        turn_rate.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let milli = (turn * 1000.0).round() as i32;
    PlayerInput::new(ratio(milli, 1000), up, fire, tick)
}

/// Audience of a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatScope {
    /// Every session.
    All,
    /// Sessions on the sender's team.
    Team,
}

/// A chat line as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRelay {
    /// Text.
    pub message: String,
    /// Sender's display name.
    pub sender: String,
    /// Sender's team.
    pub team: Team,
    /// Audience.
    pub scope: ChatScope,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join accepted.
    Welcome {
        /// Session id.
        session: SessionId,
        /// The session's tank.
        tank: EntityId,
        /// The tank's team.
        team: Team,
        /// Current simulation tick.
        tick: u64,
    },
    /// Full world state.
    Snapshot(WorldSnapshot),
    /// Changes since the previous tick and what happened during it.
    Update {
        /// State changes.
        delta: WorldDelta,
        /// Events of the tick.
        events: Vec<GameEvent>,
    },
    /// Chat line.
    Chat(ChatRelay),
    /// Informational notice, such as a refused command.
    Advisory {
        /// Text.
        message: String,
    },
    /// Join refused; the connection closes after this.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Encode a message as a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Frame> {
    let payload = bincode::serialize(message)?;
    let len = u32::try_from(payload.len()).map_err(|_| ServerError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame.into())
}

/// Decode a frame payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(payload)?)
}

/// Read one frame payload.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_len {
        return Err(ServerError::FrameTooLarge { size: len, max: max_len });
    }
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write an encoded frame.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    Ok(())
}
