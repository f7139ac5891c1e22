//! Pillboxes: automated turrets that can be knocked out, carried and re-placed.
//!
//! ```text
//!   Placed --(health depleted)--> Pickup --(tank in reach)--> Held
//!     ^                                                        |
//!     +------------------(place command)-----------------------+
//! ```
//!
//! Every other transition is refused and leaves the pillbox untouched.

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, Health, Team};
use crate::data::GameRules;
use crate::error::{GameError, Result};
use crate::math::{Fixed, Vec2Fixed};
use crate::spatial::{category, BodyDesc, BodyHandle, BodyTag, CollisionFilter, Shape};

/// Discriminant of [`PillboxState`], used in errors and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PillboxPhase {
    /// Standing and firing.
    Placed,
    /// Knocked out, lying on the ground.
    Pickup,
    /// Carried by a tank.
    Held,
}

/// Where a pillbox is and who has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PillboxState {
    /// Standing at a position.
    Placed {
        /// World position.
        position: Vec2Fixed,
    },
    /// Lying on the ground, waiting to be collected.
    Pickup {
        /// World position.
        position: Vec2Fixed,
    },
    /// Carried.
    Held {
        /// Carrying tank.
        owner: EntityId,
    },
}

/// An automated turret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pillbox {
    /// Entity id.
    pub id: EntityId,
    /// Team whose tanks it ignores; neutral pillboxes shoot everyone.
    pub team: Team,
    /// Structure points.
    pub health: Health,
    /// Lifecycle state.
    pub state: PillboxState,
    /// Seconds until it can fire again.
    pub fire_cooldown: Fixed,
    #[serde(skip)]
    pub(crate) body: Option<BodyHandle>,
}

impl Pillbox {
    /// A standing pillbox at full health.
    #[must_use]
    pub fn placed(id: EntityId, team: Team, position: Vec2Fixed, rules: &GameRules) -> Self {
        Self {
            id,
            team,
            health: Health::new(rules.pillbox.max_health),
            state: PillboxState::Placed { position },
            fire_cooldown: Fixed::ZERO,
            body: None,
        }
    }

    /// A pillbox lying on the ground, as built from steel or knocked out.
    #[must_use]
    pub fn pickup(id: EntityId, team: Team, position: Vec2Fixed, rules: &GameRules) -> Self {
        let mut health = Health::new(rules.pillbox.max_health);
        health.set(1);
        Self {
            id,
            team,
            health,
            state: PillboxState::Pickup { position },
            fire_cooldown: Fixed::ZERO,
            body: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> PillboxPhase {
        match self.state {
            PillboxState::Placed { .. } => PillboxPhase::Placed,
            PillboxState::Pickup { .. } => PillboxPhase::Pickup,
            PillboxState::Held { .. } => PillboxPhase::Held,
        }
    }

    /// World position, if on the ground.
    #[must_use]
    pub fn position(&self) -> Option<Vec2Fixed> {
        match self.state {
            PillboxState::Placed { position } | PillboxState::Pickup { position } => Some(position),
            PillboxState::Held { .. } => None,
        }
    }

    /// Carrying tank, if held.
    #[must_use]
    pub fn holder(&self) -> Option<EntityId> {
        match self.state {
            PillboxState::Held { owner } => Some(owner),
            _ => None,
        }
    }

    fn refuse(&self, to: PillboxPhase) -> GameError {
        GameError::InvalidTransition {
            id: self.id,
            from: self.phase(),
            to,
        }
    }

    /// Apply damage to a placed pillbox.
    ///
    /// Returns true if the hit knocked it out (it is now in the pickup
    /// phase). Damage to a pillbox that is not placed is ignored.
    pub fn apply_damage(&mut self, amount: u32) -> Result<bool> {
        if self.phase() != PillboxPhase::Placed {
            return Ok(false);
        }
        self.health.apply_damage(amount);
        if !self.health.is_dead() {
            return Ok(false);
        }
        self.knock_out()?;
        Ok(true)
    }

    /// `Placed -> Pickup`. Health is left at a minimum positive value.
    pub fn knock_out(&mut self) -> Result<()> {
        let PillboxState::Placed { position } = self.state else {
            return Err(self.refuse(PillboxPhase::Pickup));
        };
        self.state = PillboxState::Pickup { position };
        self.health.set(1);
        self.fire_cooldown = Fixed::ZERO;
        Ok(())
    }

    /// `Pickup -> Held`.
    pub fn pick_up(&mut self, owner: EntityId) -> Result<()> {
        if self.phase() != PillboxPhase::Pickup {
            return Err(self.refuse(PillboxPhase::Held));
        }
        self.state = PillboxState::Held { owner };
        Ok(())
    }

    /// `Held -> Placed`, at full health, for `team`.
    pub fn place(&mut self, position: Vec2Fixed, team: Team) -> Result<()> {
        if self.phase() != PillboxPhase::Held {
            return Err(self.refuse(PillboxPhase::Placed));
        }
        self.state = PillboxState::Placed { position };
        self.team = team;
        self.health.restore();
        self.fire_cooldown = Fixed::ZERO;
        Ok(())
    }

    /// Collider required by the current phase; none while held.
    ///
    /// Placed pillboxes are static and block walls, tanks and shells.
    /// Knocked-out ones are small dynamic bodies only tanks can touch.
    #[must_use]
    pub fn collider(&self, rules: &GameRules) -> Option<BodyDesc> {
        let tag = BodyTag::Pillbox(self.id);
        match self.state {
            PillboxState::Placed { position } => Some(BodyDesc {
                tag,
                shape: Shape::circle(Fixed::from_num(rules.pillbox.placed_radius)),
                position,
                filter: CollisionFilter::new(
                    category::PILLBOX,
                    category::WALL | category::PLAYER | category::PROJECTILE,
                ),
                is_static: true,
                is_sensor: false,
            }),
            PillboxState::Pickup { position } => Some(BodyDesc {
                tag,
                shape: Shape::circle(Fixed::from_num(rules.pillbox.pickup_radius)),
                position,
                filter: CollisionFilter::new(category::PILLBOX, category::PLAYER),
                is_static: false,
                is_sensor: false,
            }),
            PillboxState::Held { .. } => None,
        }
    }

    /// Physics body, if the current phase has one.
    #[must_use]
    pub fn body_handle(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Count the fire cooldown down, stopping at zero.
    pub fn cool_down(&mut self, dt: Fixed) {
        self.fire_cooldown = (self.fire_cooldown - dt).max(Fixed::ZERO);
    }

    /// True if placed and the gun is ready.
    #[must_use]
    pub fn can_fire(&self) -> bool {
        self.phase() == PillboxPhase::Placed && self.fire_cooldown <= Fixed::ZERO
    }

    /// True if this pillbox shoots at `team`.
    #[must_use]
    pub fn is_hostile_to(&self, team: Team) -> bool {
        self.team.is_neutral() || self.team != team
    }
}

/// A tank the targeting logic may consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCandidate {
    /// Tank id.
    pub id: EntityId,
    /// Tank team.
    pub team: Team,
    /// Tank position.
    pub position: Vec2Fixed,
    /// Tank displacement per tick.
    pub velocity: Vec2Fixed,
    /// False while respawning.
    pub active: bool,
}

/// Nearest hostile, active candidate within `range` of `pillbox`.
///
/// Ties keep the first candidate encountered.
#[must_use]
pub fn select_target<I>(pillbox: &Pillbox, origin: Vec2Fixed, range: Fixed, candidates: I) -> Option<TargetCandidate>
where
    I: IntoIterator<Item = TargetCandidate>,
{
    let range_sq = range.saturating_mul(range);
    let mut best: Option<(Fixed, TargetCandidate)> = None;
    for candidate in candidates {
        if !candidate.active || !pillbox.is_hostile_to(candidate.team) {
            continue;
        }
        let dist_sq = origin.distance_squared(candidate.position);
        if dist_sq > range_sq {
            continue;
        }
        if best.map_or(true, |(d, _)| dist_sq < d) {
            best = Some((dist_sq, candidate));
        }
    }
    best.map(|(_, c)| c)
}

/// Heading that leads a moving target.
///
/// The target is extrapolated by its per-tick velocity for the number of
/// ticks a shell at `shell_speed` (units per tick) needs to cover the
/// current distance.
#[must_use]
pub fn lead_heading(origin: Vec2Fixed, target: Vec2Fixed, target_velocity: Vec2Fixed, shell_speed: Fixed) -> Fixed {
    let travel_ticks = if shell_speed > Fixed::ZERO {
        origin.distance(target) / shell_speed
    } else {
        Fixed::ZERO
    };
    let predicted = target + target_velocity.scale(travel_ticks);
    (predicted - origin).angle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{half_pi, ratio};

    fn rules() -> GameRules {
        GameRules::default()
    }

    fn candidate(id: EntityId, team: Team, x: i32, y: i32) -> TargetCandidate {
        TargetCandidate {
            id,
            team,
            position: Vec2Fixed::from_int(x, y),
            velocity: Vec2Fixed::ZERO,
            active: true,
        }
    }

    #[test]
    fn test_allowed_transition_cycle() {
        let rules = rules();
        let mut pillbox = Pillbox::placed(1, Team::Neutral, Vec2Fixed::from_int(50, 50), &rules);
        pillbox.knock_out().unwrap();
        assert_eq!(pillbox.phase(), PillboxPhase::Pickup);
        pillbox.pick_up(9).unwrap();
        assert_eq!(pillbox.holder(), Some(9));
        pillbox.place(Vec2Fixed::from_int(10, 10), Team::Blue).unwrap();
        assert_eq!(pillbox.phase(), PillboxPhase::Placed);
        assert_eq!(pillbox.team, Team::Blue);
        assert_eq!(pillbox.health.current, rules.pillbox.max_health);
    }

    #[test]
    fn test_forbidden_transitions_leave_state() {
        let rules = rules();
        let mut placed = Pillbox::placed(1, Team::Red, Vec2Fixed::ZERO, &rules);
        assert!(matches!(
            placed.pick_up(2),
            Err(GameError::InvalidTransition { from: PillboxPhase::Placed, to: PillboxPhase::Held, .. })
        ));
        assert!(placed.place(Vec2Fixed::ZERO, Team::Red).is_err());
        assert_eq!(placed.phase(), PillboxPhase::Placed);

        let mut lying = Pillbox::pickup(2, Team::Red, Vec2Fixed::ZERO, &rules);
        assert!(lying.knock_out().is_err());
        assert!(lying.place(Vec2Fixed::ZERO, Team::Red).is_err());
        assert_eq!(lying.phase(), PillboxPhase::Pickup);

        let mut carried = lying.clone();
        carried.pick_up(3).unwrap();
        assert!(carried.knock_out().is_err());
        assert!(carried.pick_up(4).is_err());
        assert_eq!(carried.holder(), Some(3));
    }

    #[test]
    fn test_last_hit_knocks_out_with_minimum_health() {
        let rules = rules();
        let mut pillbox = Pillbox::placed(1, Team::Neutral, Vec2Fixed::from_int(5, 5), &rules);
        pillbox.health.set(1);

        let placed_body = pillbox.collider(&rules).unwrap();
        assert!(pillbox.apply_damage(1).unwrap());
        assert_eq!(pillbox.phase(), PillboxPhase::Pickup);
        assert_eq!(pillbox.health.current, 1);

        let pickup_body = pillbox.collider(&rules).unwrap();
        assert!(placed_body.is_static);
        assert!(!pickup_body.is_static);
        assert_eq!(pickup_body.filter.mask, category::PLAYER);
        assert_ne!(placed_body.filter.mask, pickup_body.filter.mask);

        // Further damage while lying on the ground does nothing.
        assert!(!pillbox.apply_damage(5).unwrap());
        assert_eq!(pillbox.health.current, 1);
    }

    #[test]
    fn test_held_pillbox_has_no_collider() {
        let rules = rules();
        let mut pillbox = Pillbox::pickup(1, Team::Red, Vec2Fixed::ZERO, &rules);
        pillbox.pick_up(2).unwrap();
        assert!(pillbox.collider(&rules).is_none());
    }

    #[test]
    fn test_targets_nearest_hostile() {
        let rules = rules();
        let pillbox = Pillbox::placed(1, Team::Red, Vec2Fixed::ZERO, &rules);
        let range = Fixed::from_num(100);
        let found = select_target(
            &pillbox,
            Vec2Fixed::ZERO,
            range,
            [
                candidate(1, Team::Red, 5, 0),
                candidate(2, Team::Blue, 60, 0),
                candidate(3, Team::Blue, 30, 0),
                candidate(4, Team::Blue, 150, 0),
            ],
        );
        assert_eq!(found.map(|c| c.id), Some(3));
    }

    #[test]
    fn test_neutral_pillbox_targets_everyone_and_ties_keep_first() {
        let rules = rules();
        let pillbox = Pillbox::placed(1, Team::Neutral, Vec2Fixed::ZERO, &rules);
        let found = select_target(
            &pillbox,
            Vec2Fixed::ZERO,
            Fixed::from_num(100),
            [candidate(7, Team::Red, 0, 40), candidate(8, Team::Blue, 40, 0)],
        );
        assert_eq!(found.map(|c| c.id), Some(7));
    }

    #[test]
    fn test_respawning_tanks_ignored() {
        let rules = rules();
        let pillbox = Pillbox::placed(1, Team::Neutral, Vec2Fixed::ZERO, &rules);
        let mut ghost = candidate(1, Team::Red, 10, 0);
        ghost.active = false;
        assert!(select_target(&pillbox, Vec2Fixed::ZERO, Fixed::from_num(100), [ghost]).is_none());
    }

    #[test]
    fn test_lead_heading_accounts_for_motion() {
        let origin = Vec2Fixed::ZERO;
        let target = Vec2Fixed::from_int(80, 0);
        // Still target: straight ahead.
        let straight = lead_heading(origin, target, Vec2Fixed::ZERO, Fixed::from_num(8));
        assert!(straight.abs() < ratio(1, 10_000));
        // Target crossing at 8 units per tick ends up 80 units along y: 45 degrees.
        let led = lead_heading(origin, target, Vec2Fixed::from_int(0, 8), Fixed::from_num(8));
        let quarter = half_pi() / Fixed::from_num(2);
        assert!((led - quarter).abs() < ratio(1, 1_000));
    }
}
