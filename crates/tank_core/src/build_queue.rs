//! Per-tank construction queue.
//!
//! Only the item at the head of the queue progresses. When it completes it
//! is popped and the next item starts on the following tick. Wood for roads
//! and walls is reserved when an item is queued; harvested wood is paid out
//! when a harvest item completes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::components::EntityId;
use crate::math::Fixed;
use crate::tilemap::TileCoord;

/// What a build item does to its tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildKind {
    /// Lay a road.
    Road,
    /// Raise a wall.
    Wall,
    /// Cut down forest for wood.
    Harvest,
}

/// One tile of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildItem {
    /// Tank that queued it.
    pub owner: EntityId,
    /// Target tile.
    pub tile: TileCoord,
    /// Kind of work.
    pub kind: BuildKind,
    /// Seconds needed.
    pub build_time: Fixed,
    /// Completion fraction in `[0, 1]`.
    pub progress: Fixed,
    /// Wood reserved when queued.
    pub wood_cost: u32,
}

impl BuildItem {
    /// A not-yet-started item.
    #[must_use]
    pub fn new(owner: EntityId, tile: TileCoord, kind: BuildKind, build_time: Fixed, wood_cost: u32) -> Self {
        Self {
            owner,
            tile,
            kind,
            build_time,
            progress: Fixed::ZERO,
            wood_cost,
        }
    }

    /// Check if the work is done.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= Fixed::ONE
    }

    /// Progress as a percentage (0-100).
    #[must_use]
    pub fn percentage(&self) -> u32 {
        (self.progress * Fixed::from_num(100)).floor().to_num::<u32>().min(100)
    }

    /// Advance by `dt` seconds. A zero build time completes immediately.
    pub fn tick(&mut self, dt: Fixed) {
        if self.build_time <= Fixed::ZERO {
            self.progress = Fixed::ONE;
            return;
        }
        self.progress = (self.progress + dt / self.build_time).min(Fixed::ONE);
    }

    /// Wood returned if this item is cancelled now.
    #[must_use]
    pub fn refund(&self) -> u32 {
        self.wood_cost * (100 - self.percentage()) / 100
    }
}

/// Result of advancing a queue by one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    /// The head item moved forward.
    Progress {
        /// Tile being worked.
        tile: TileCoord,
        /// Kind of work.
        kind: BuildKind,
        /// New completion fraction.
        progress: Fixed,
    },
    /// The head item finished and was removed.
    Complete(BuildItem),
}

/// FIFO of build items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildQueue {
    /// Items in order; the front is in progress.
    pub items: VecDeque<BuildItem>,
    /// Maximum number of items allowed in the queue.
    pub max_size: usize,
}

impl BuildQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Check if the queue is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    /// Room for `count` more items.
    #[must_use]
    pub fn has_room_for(&self, count: usize) -> bool {
        self.items.len() + count <= self.max_size
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Item in progress.
    #[must_use]
    pub fn current(&self) -> Option<&BuildItem> {
        self.items.front()
    }

    /// True if any queued item targets `tile`.
    #[must_use]
    pub fn targets(&self, tile: TileCoord) -> bool {
        self.items.iter().any(|item| item.tile == tile)
    }

    /// Append an item. Returns it back if the queue is full.
    pub fn push(&mut self, item: BuildItem) -> Result<(), BuildItem> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Cancel and remove an item at the given index.
    pub fn cancel(&mut self, index: usize) -> Option<BuildItem> {
        self.items.remove(index)
    }

    /// Advance the head item by `dt` seconds.
    ///
    /// Returns `None` when the queue is empty.
    pub fn advance(&mut self, dt: Fixed) -> Option<BuildStep> {
        let head = self.items.front_mut()?;
        head.tick(dt);
        if head.is_complete() {
            return self.items.pop_front().map(BuildStep::Complete);
        }
        Some(BuildStep::Progress {
            tile: head.tile,
            kind: head.kind,
            progress: head.progress,
        })
    }

    /// Clear all items from the queue.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
