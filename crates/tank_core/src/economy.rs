//! Carried resources and dropped steel pickups.
//!
//! Tanks carry three capped stockpiles: ammunition, wood and steel.
//! Wood is earned by harvesting forest and spent on roads and walls;
//! steel is dropped by destroyed tanks and spent on new pillboxes.
//!
//! All calculations use integer math for deterministic simulation.

use serde::{Deserialize, Serialize};

use crate::components::EntityId;
use crate::math::Vec2Fixed;

/// A capped, never-negative resource counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stockpile {
    /// Amount held.
    pub amount: u32,
    /// Maximum amount.
    pub capacity: u32,
}

impl Stockpile {
    /// Create a stockpile holding `amount` (clamped to `capacity`).
    #[must_use]
    pub fn new(amount: u32, capacity: u32) -> Self {
        Self {
            amount: amount.min(capacity),
            capacity,
        }
    }

    /// A full stockpile.
    #[must_use]
    pub const fn full(capacity: u32) -> Self {
        Self {
            amount: capacity,
            capacity,
        }
    }

    /// Room left before hitting capacity.
    #[must_use]
    pub const fn headroom(&self) -> u32 {
        self.capacity.saturating_sub(self.amount)
    }

    /// Add up to `amount`, returning how much was accepted.
    pub fn deposit(&mut self, amount: u32) -> u32 {
        let accepted = amount.min(self.headroom());
        self.amount += accepted;
        accepted
    }

    /// Spend `amount` if available. Spends nothing otherwise.
    pub fn try_spend(&mut self, amount: u32) -> bool {
        if self.amount < amount {
            return false;
        }
        self.amount -= amount;
        true
    }

    /// Check if at least `amount` is held.
    #[must_use]
    pub const fn can_afford(&self, amount: u32) -> bool {
        self.amount >= amount
    }

    /// Refill to capacity.
    pub fn fill(&mut self) {
        self.amount = self.capacity;
    }
}

/// Steel lying on the ground, waiting to be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePickup {
    /// Entity id.
    pub id: EntityId,
    /// World position.
    pub position: Vec2Fixed,
    /// Steel granted on collection.
    pub value: u32,
    /// Tick the pickup was dropped on.
    pub created_at: u64,
}

impl ResourcePickup {
    /// Create a pickup.
    #[must_use]
    pub const fn new(id: EntityId, position: Vec2Fixed, value: u32, created_at: u64) -> Self {
        Self {
            id,
            position,
            value,
            created_at,
        }
    }

    /// True once the pickup has lived for `lifetime_ticks`.
    #[must_use]
    pub fn is_expired(&self, now: u64, lifetime_ticks: u64) -> bool {
        now.saturating_sub(self.created_at) >= lifetime_ticks
    }
}
