//! Player input records and per-session input queues.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::build_queue::BuildKind;
use crate::math::Fixed;
use crate::tilemap::TileCoord;

/// Default number of input records buffered per session between ticks.
pub const DEFAULT_INPUT_BUFFER: usize = 64;

/// One control sample from a client. Applied atomically, never field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Steering in `[-1, 1]`; positive turns toward increasing angle.
    pub turn_rate: Fixed,
    /// Throttle.
    pub up: bool,
    /// Trigger.
    pub fire: bool,
    /// Client tick the sample was taken on.
    pub tick: u64,
}

impl PlayerInput {
    /// Build an input, clamping `turn_rate` into `[-1, 1]`.
    #[must_use]
    pub fn new(turn_rate: Fixed, up: bool, fire: bool, tick: u64) -> Self {
        Self {
            turn_rate: turn_rate.clamp(-Fixed::ONE, Fixed::ONE),
            up,
            fire,
            tick,
        }
    }
}

/// Commands that change the world rather than steer a tank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerCommand {
    /// Queue construction or harvesting on a 2x2 selection.
    Build {
        /// Selected tiles.
        tiles: Vec<TileCoord>,
        /// What to do with them.
        kind: BuildKind,
    },
    /// Put down a carried pillbox on a 2x2 selection.
    PlacePillbox {
        /// Selected tiles.
        tiles: Vec<TileCoord>,
    },
    /// Spend steel on a new pillbox, dropped next to the tank.
    BuildPillbox,
    /// Remove a queued build item and refund its unspent wood.
    CancelBuild {
        /// Position in the queue; 0 is the item in progress.
        index: usize,
    },
}

/// FIFO of inputs received since the last tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputQueue {
    pending: VecDeque<PlayerInput>,
    capacity: usize,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_BUFFER)
    }
}

impl InputQueue {
    /// Create a queue holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an input. The oldest record is dropped when full.
    pub fn push(&mut self, input: PlayerInput) {
        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(input);
    }

    /// Empty the queue and return the most recent record.
    pub fn drain_latest(&mut self) -> Option<PlayerInput> {
        let latest = self.pending.pop_back();
        self.pending.clear();
        latest
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
