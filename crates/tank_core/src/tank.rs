//! Player tanks.
//!
//! A tank is either active or respawning. Destruction happens when health
//! reaches zero; the tank then sits out the respawn delay with no collider
//! and ignores its input, and comes back at full health and ammunition.

use serde::{Deserialize, Serialize};

use crate::build_queue::BuildQueue;
use crate::components::{EntityId, Health, SessionId, Team};
use crate::data::GameRules;
use crate::economy::Stockpile;
use crate::input::PlayerInput;
use crate::math::{wrap_angle, Fixed, Vec2Fixed};
use crate::spatial::BodyHandle;

/// Lifecycle of a tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankState {
    /// Driving and shooting.
    Active,
    /// Destroyed, waiting to come back.
    Respawning {
        /// Seconds left.
        remaining: Fixed,
    },
}

/// A shot the tank just took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireOrder {
    /// Muzzle position, just outside the hull.
    pub origin: Vec2Fixed,
    /// Direction of travel.
    pub heading: Fixed,
}

/// A player-controlled tank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    /// Entity id.
    pub id: EntityId,
    /// Owning session.
    pub session: SessionId,
    /// Team.
    pub team: Team,
    /// World position.
    pub position: Vec2Fixed,
    /// Facing, radians.
    pub heading: Fixed,
    /// Forward speed, units per second.
    pub speed: Fixed,
    /// Hull points.
    pub health: Health,
    /// Shells.
    pub ammo: Stockpile,
    /// Harvested wood.
    pub wood: Stockpile,
    /// Collected steel.
    pub steel: Stockpile,
    /// Pillboxes being carried.
    pub pillbox_count: u32,
    /// Latest applied input.
    pub input: PlayerInput,
    /// Seconds until the gun can fire again.
    pub fire_cooldown: Fixed,
    /// Lifecycle state.
    pub state: TankState,
    /// Construction queue.
    pub build_queue: BuildQueue,
    refill_progress: Fixed,
    #[serde(skip)]
    pub(crate) body: Option<BodyHandle>,
}

impl Tank {
    /// A fresh, fully loaded tank.
    #[must_use]
    pub fn new(id: EntityId, session: SessionId, team: Team, position: Vec2Fixed, rules: &GameRules) -> Self {
        let tank = &rules.tank;
        Self {
            id,
            session,
            team,
            position,
            heading: Fixed::ZERO,
            speed: Fixed::ZERO,
            health: Health::new(tank.max_health),
            ammo: Stockpile::full(tank.max_ammo),
            wood: Stockpile::new(tank.starting_wood, tank.max_wood),
            steel: Stockpile::new(0, tank.max_steel),
            pillbox_count: 0,
            input: PlayerInput::default(),
            fire_cooldown: Fixed::ZERO,
            state: TankState::Active,
            build_queue: BuildQueue::new(rules.build.max_queue),
            refill_progress: Fixed::ZERO,
            body: None,
        }
    }

    /// True while destroyed.
    #[must_use]
    pub fn is_respawning(&self) -> bool {
        matches!(self.state, TankState::Respawning { .. })
    }

    /// Seconds until respawn, zero when active.
    #[must_use]
    pub fn respawn_timer(&self) -> Fixed {
        match self.state {
            TankState::Active => Fixed::ZERO,
            TankState::Respawning { remaining } => remaining,
        }
    }

    /// Physics body.
    #[must_use]
    pub fn body_handle(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Integrate steering and throttle for one tick.
    ///
    /// `tile_speed` is the terrain multiplier under the tank. Returns the
    /// displacement to apply this tick. A respawning tank does not move.
    pub fn drive(&mut self, dt: Fixed, rules: &GameRules, tile_speed: Fixed) -> Vec2Fixed {
        if self.is_respawning() {
            self.speed = Fixed::ZERO;
            return Vec2Fixed::ZERO;
        }
        let tank = &rules.tank;

        let turn = self.input.turn_rate * tank.rotation_speed() * tile_speed * dt;
        self.heading = wrap_angle(self.heading + turn);

        let target = if self.input.up {
            tank.max_speed() * tile_speed
        } else {
            Fixed::ZERO
        };
        let step = tank.acceleration() * dt;
        self.speed = if self.speed < target {
            (self.speed + step).min(target)
        } else {
            (self.speed - step).max(target)
        };

        Vec2Fixed::from_angle(self.heading, self.speed * dt)
    }

    /// Count the fire cooldown down, stopping at zero.
    pub fn cool_down(&mut self, dt: Fixed) {
        self.fire_cooldown = (self.fire_cooldown - dt).max(Fixed::ZERO);
    }

    /// Fire if the gun is ready and there is ammunition.
    ///
    /// Spends ammunition and resets the cooldown on success; otherwise
    /// nothing changes.
    pub fn try_fire(&mut self, rules: &GameRules) -> Option<FireOrder> {
        if self.is_respawning() || self.fire_cooldown > Fixed::ZERO {
            return None;
        }
        if !self.ammo.try_spend(rules.tank.ammo_per_shot) {
            return None;
        }
        self.fire_cooldown = rules.tank.fire_cooldown();
        let clearance = rules.tank.radius() + Fixed::from_num(rules.projectile.radius) + Fixed::ONE;
        Some(FireOrder {
            origin: self.position + Vec2Fixed::from_angle(self.heading, clearance),
            heading: self.heading,
        })
    }

    /// Restore ammunition at `per_second`, carrying fractions between ticks.
    pub fn refill_ammo(&mut self, dt: Fixed, per_second: u32) {
        if self.ammo.headroom() == 0 {
            self.refill_progress = Fixed::ZERO;
            return;
        }
        self.refill_progress += Fixed::from_num(per_second) * dt;
        let whole: u32 = self.refill_progress.floor().to_num();
        if whole > 0 {
            self.ammo.deposit(whole);
            self.refill_progress -= Fixed::from_num(whole);
        }
    }

    /// Apply damage. Returns true if this hit destroyed the tank.
    ///
    /// Damage to a respawning tank is ignored.
    pub fn apply_damage(&mut self, amount: u32, rules: &GameRules) -> bool {
        if self.is_respawning() {
            return false;
        }
        self.health.apply_damage(amount);
        if !self.health.is_dead() {
            return false;
        }
        self.state = TankState::Respawning {
            remaining: rules.tank.respawn_time(),
        };
        self.speed = Fixed::ZERO;
        self.refill_progress = Fixed::ZERO;
        true
    }

    /// Count the respawn timer down. Returns true once it has elapsed.
    pub fn tick_respawn(&mut self, dt: Fixed) -> bool {
        match &mut self.state {
            TankState::Active => false,
            TankState::Respawning { remaining } => {
                *remaining -= dt;
                *remaining <= Fixed::ZERO
            }
        }
    }

    /// Bring the tank back at `position`, fully repaired and loaded.
    pub fn respawn(&mut self, position: Vec2Fixed) {
        self.state = TankState::Active;
        self.position = position;
        self.heading = Fixed::ZERO;
        self.speed = Fixed::ZERO;
        self.fire_cooldown = Fixed::ZERO;
        self.health.restore();
        self.ammo.fill();
        self.input = PlayerInput::default();
    }
}
