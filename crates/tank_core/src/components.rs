//! Shared component types used by every entity model.

use serde::{Deserialize, Serialize};

/// Unique identifier for entities.
pub type EntityId = u64;

/// Identifier of a connected client session.
pub type SessionId = u64;

/// Team affiliation. Stations and map pillboxes start neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Team {
    /// Owned by nobody.
    #[default]
    Neutral = 0,
    /// First team.
    Red = 1,
    /// Second team.
    Blue = 2,
}

impl Team {
    /// Teams a player can join.
    pub const PLAYABLE: [Team; 2] = [Team::Red, Team::Blue];

    /// Numeric id used on the wire and in map files.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// True for the neutral team.
    #[must_use]
    pub const fn is_neutral(self) -> bool {
        matches!(self, Team::Neutral)
    }
}

/// Health component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Check if health is depleted.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.current == 0
    }

    /// Apply damage, returning actual damage dealt.
    /// Uses saturating subtraction so health never goes below zero.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.current);
        self.current = self.current.saturating_sub(actual);
        actual
    }

    /// Restore to full.
    pub fn restore(&mut self) {
        self.current = self.max;
    }

    /// Set current health, clamped to max.
    pub fn set(&mut self, value: u32) {
        self.current = value.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_saturates_at_zero() {
        let mut health = Health::new(3);
        assert_eq!(health.apply_damage(2), 2);
        assert_eq!(health.apply_damage(5), 1);
        assert_eq!(health.current, 0);
        assert!(health.is_dead());
        assert_eq!(health.apply_damage(1), 0);
    }

    #[test]
    fn test_health_set_clamps() {
        let mut health = Health::new(4);
        health.set(10);
        assert_eq!(health.current, 4);
        health.set(1);
        assert_eq!(health.current, 1);
        health.restore();
        assert_eq!(health.current, 4);
    }

    #[test]
    fn test_team_ids() {
        assert_eq!(Team::Neutral.id(), 0);
        assert_eq!(Team::Blue.id(), 2);
        assert!(Team::default().is_neutral());
    }
}
