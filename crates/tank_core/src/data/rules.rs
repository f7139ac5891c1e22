//! Gameplay tuning rules.

use serde::{Deserialize, Serialize};

use crate::clock::millis_to_fixed;
use crate::math::{ratio, Fixed};

/// Every tuning constant of a match.
///
/// # Example RON
///
/// ```ron
/// GameRules(
///     tick_rate: 60,
///     tile_size: 32,
///     tank: TankRules(max_health: 8, max_speed: 96, /* ... */),
///     // remaining sections fall back to their defaults
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    /// Simulation steps per second.
    pub tick_rate: u32,
    /// Edge length of a tile in world units.
    pub tile_size: u32,
    /// Tank tuning.
    pub tank: TankRules,
    /// Projectile tuning.
    pub projectile: ProjectileRules,
    /// Pillbox tuning.
    pub pillbox: PillboxRules,
    /// Station tuning.
    pub station: StationRules,
    /// Construction and harvesting.
    pub build: BuildRules,
    /// Steel pickups.
    pub pickup: PickupRules,
    /// Match flow.
    #[serde(rename = "match")]
    pub match_rules: MatchRules,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            tick_rate: crate::clock::TICK_RATE,
            tile_size: 32,
            tank: TankRules::default(),
            projectile: ProjectileRules::default(),
            pillbox: PillboxRules::default(),
            station: StationRules::default(),
            build: BuildRules::default(),
            pickup: PickupRules::default(),
            match_rules: MatchRules::default(),
        }
    }
}

impl GameRules {
    /// Tile edge length as a fixed-point value.
    #[must_use]
    pub fn tile_size_fixed(&self) -> Fixed {
        Fixed::from_num(self.tile_size.max(1))
    }

    /// Convert a duration in milliseconds to whole ticks (rounded up).
    #[must_use]
    pub fn millis_to_ticks(&self, millis: u32) -> u64 {
        let rate = u64::from(self.tick_rate.max(1));
        (u64::from(millis) * rate).div_ceil(1000)
    }
}

/// Tank tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TankRules {
    /// Health on spawn.
    pub max_health: u32,
    /// Ammunition capacity.
    pub max_ammo: u32,
    /// Wood capacity.
    pub max_wood: u32,
    /// Steel capacity.
    pub max_steel: u32,
    /// Wood carried on spawn.
    pub starting_wood: u32,
    /// Collision radius in world units.
    pub radius: u32,
    /// Top speed on full-speed terrain, units per second.
    pub max_speed: u32,
    /// Speed change per second, units per second squared.
    pub acceleration: u32,
    /// Turn rate at full input, milliradians per second.
    pub rotation_speed_mrad: u32,
    /// Minimum time between shots.
    pub fire_cooldown_ms: u32,
    /// Ammunition spent per shot.
    pub ammo_per_shot: u32,
    /// Time spent respawning after destruction.
    pub respawn_ms: u32,
}

impl Default for TankRules {
    fn default() -> Self {
        Self {
            max_health: 8,
            max_ammo: 40,
            max_wood: 40,
            max_steel: 20,
            starting_wood: 0,
            radius: 12,
            max_speed: 96,
            acceleration: 160,
            rotation_speed_mrad: 3000,
            fire_cooldown_ms: 400,
            ammo_per_shot: 1,
            respawn_ms: 3000,
        }
    }
}

impl TankRules {
    /// Radius as a fixed-point value.
    #[must_use]
    pub fn radius(&self) -> Fixed {
        Fixed::from_num(self.radius)
    }

    /// Top speed in units per second.
    #[must_use]
    pub fn max_speed(&self) -> Fixed {
        Fixed::from_num(self.max_speed)
    }

    /// Acceleration in units per second squared.
    #[must_use]
    pub fn acceleration(&self) -> Fixed {
        Fixed::from_num(self.acceleration)
    }

    /// Turn rate in radians per second.
    #[must_use]
    pub fn rotation_speed(&self) -> Fixed {
        ratio(self.rotation_speed_mrad as i32, 1000)
    }

    /// Fire cooldown in seconds.
    #[must_use]
    pub fn fire_cooldown(&self) -> Fixed {
        millis_to_fixed(self.fire_cooldown_ms)
    }

    /// Respawn duration in seconds.
    #[must_use]
    pub fn respawn_time(&self) -> Fixed {
        millis_to_fixed(self.respawn_ms)
    }
}

/// Projectile tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileRules {
    /// Distance covered per tick, in world units.
    pub speed_per_tick: u32,
    /// Distance after which the projectile expires.
    pub max_range: u32,
    /// Collision radius.
    pub radius: u32,
    /// Damage dealt to tanks and placed pillboxes.
    pub damage: u32,
}

impl Default for ProjectileRules {
    fn default() -> Self {
        Self {
            speed_per_tick: 8,
            max_range: 384,
            radius: 2,
            damage: 1,
        }
    }
}

/// Pillbox tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PillboxRules {
    /// Health when placed.
    pub max_health: u32,
    /// Targeting radius.
    pub detection_range: u32,
    /// Minimum time between shots.
    pub fire_cooldown_ms: u32,
    /// Collider radius while placed.
    pub placed_radius: u32,
    /// Collider radius while lying on the ground as a pickup.
    pub pickup_radius: u32,
    /// Distance at which a tank collects a pickup-state pillbox.
    pub pickup_proximity: u32,
    /// Steel spent by a tank to build a fresh pillbox.
    pub steel_cost: u32,
}

impl Default for PillboxRules {
    fn default() -> Self {
        Self {
            max_health: 8,
            detection_range: 256,
            fire_cooldown_ms: 800,
            placed_radius: 14,
            pickup_radius: 8,
            pickup_proximity: 24,
            steel_cost: 4,
        }
    }
}

impl PillboxRules {
    /// Fire cooldown in seconds.
    #[must_use]
    pub fn fire_cooldown(&self) -> Fixed {
        millis_to_fixed(self.fire_cooldown_ms)
    }
}

/// Station tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationRules {
    /// Radius within which a tank captures the station and refills ammo.
    pub capture_range: u32,
    /// Sensor radius.
    pub radius: u32,
    /// Ammunition restored per second to nearby tanks.
    pub ammo_refill_per_second: u32,
}

impl Default for StationRules {
    fn default() -> Self {
        Self {
            capture_range: 48,
            radius: 16,
            ammo_refill_per_second: 4,
        }
    }
}

/// Time and wood cost of one construction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCost {
    /// Build time per tile.
    pub time_ms: u32,
    /// Wood reserved per tile at enqueue time.
    pub wood: u32,
}

impl BuildCost {
    /// Build time in seconds.
    #[must_use]
    pub fn time(&self) -> Fixed {
        millis_to_fixed(self.time_ms)
    }
}

/// Construction and harvesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildRules {
    /// Max distance from tank to the centre of the selection.
    pub max_distance: u32,
    /// Max queued items per tank.
    pub max_queue: usize,
    /// Road construction.
    pub road: BuildCost,
    /// Wall construction.
    pub wall: BuildCost,
    /// Time to harvest one forest tile.
    pub harvest_time_ms: u32,
    /// Wood awarded per harvested tile.
    pub harvest_wood: u32,
}

impl Default for BuildRules {
    fn default() -> Self {
        Self {
            max_distance: 192,
            max_queue: 16,
            road: BuildCost {
                time_ms: 1000,
                wood: 2,
            },
            wall: BuildCost {
                time_ms: 1500,
                wood: 4,
            },
            harvest_time_ms: 1200,
            harvest_wood: 4,
        }
    }
}

/// Steel pickups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupRules {
    /// Collider radius.
    pub radius: u32,
    /// Steel dropped by a destroyed tank.
    pub steel_value: u32,
    /// Lifetime before the pickup decays.
    pub lifetime_ms: u32,
}

impl Default for PickupRules {
    fn default() -> Self {
        Self {
            radius: 8,
            steel_value: 2,
            lifetime_ms: 30_000,
        }
    }
}

/// Match flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    /// Delay between a win and the automatic reset.
    pub reset_delay_ms: u32,
    /// Seed for every random choice the simulation makes.
    pub seed: u64,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            reset_delay_ms: 10_000,
            seed: 0x7a4c_5eed,
        }
    }
}
