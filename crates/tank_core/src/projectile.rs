//! Shells fired by tanks and pillboxes.

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, Team};
use crate::data::ProjectileRules;
use crate::math::{Fixed, Vec2Fixed};
use crate::spatial::BodyHandle;

/// Who fired a projectile. A projectile never hits its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectileOwner {
    /// Fired by a tank.
    Tank(EntityId),
    /// Fired by a pillbox.
    Pillbox(EntityId),
}

/// A shell in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    /// Entity id.
    pub id: EntityId,
    /// Shooter.
    pub owner: ProjectileOwner,
    /// Shooter's team.
    pub team: Team,
    /// World position.
    pub position: Vec2Fixed,
    /// Direction of travel.
    pub heading: Fixed,
    /// Distance covered per tick.
    pub speed: Fixed,
    /// Distance after which the shell expires.
    pub max_range: Fixed,
    /// Distance covered so far.
    pub distance_traveled: Fixed,
    #[serde(skip)]
    pub(crate) body: Option<BodyHandle>,
}

impl Projectile {
    /// A shell leaving `origin` along `heading`.
    #[must_use]
    pub fn new(
        id: EntityId,
        owner: ProjectileOwner,
        team: Team,
        origin: Vec2Fixed,
        heading: Fixed,
        rules: &ProjectileRules,
    ) -> Self {
        Self {
            id,
            owner,
            team,
            position: origin,
            heading,
            speed: Fixed::from_num(rules.speed_per_tick),
            max_range: Fixed::from_num(rules.max_range),
            distance_traveled: Fixed::ZERO,
            body: None,
        }
    }

    /// Per-tick displacement.
    #[must_use]
    pub fn velocity(&self) -> Vec2Fixed {
        Vec2Fixed::from_angle(self.heading, self.speed)
    }

    /// Count one tick of travel. Returns true once the shell has reached its range.
    pub fn advance(&mut self) -> bool {
        self.distance_traveled += self.speed;
        self.is_spent()
    }

    /// True when the shell has covered its full range.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.distance_traveled >= self.max_range
    }

    /// True if `owner` fired this shell.
    #[must_use]
    pub fn is_owned_by(&self, owner: ProjectileOwner) -> bool {
        self.owner == owner
    }
}
