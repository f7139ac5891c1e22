//! Collision resolution.
//!
//! The physics backend only reports which tagged bodies started touching.
//! This module turns those raw pairs into gameplay: shell hits, wall
//! cratering, station captures, pillbox and steel pickups. Pairs arrive in
//! either order and are classified first, then applied in report order.

use tracing::{info, warn};

use crate::components::EntityId;
use crate::events::{GameEvent, TickEvents};
use crate::math::Vec2Fixed;
use crate::projectile::ProjectileOwner;
use crate::simulation::Simulation;
use crate::spatial::{BodyTag, CollisionEvent, CollisionFilter};
use crate::tilemap::{Layer, TileCoord, TileFamily, TileIndex};

/// A collision pair the game cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    /// Shell reached a tank.
    ProjectileTank {
        /// Shell.
        projectile: EntityId,
        /// Tank.
        tank: EntityId,
    },
    /// Shell reached a placed pillbox.
    ProjectilePillbox {
        /// Shell.
        projectile: EntityId,
        /// Pillbox.
        pillbox: EntityId,
    },
    /// Shell reached solid terrain.
    ProjectileTerrain {
        /// Shell.
        projectile: EntityId,
        /// Tile.
        tile: TileCoord,
    },
    /// Tank entered a station.
    TankStation {
        /// Tank.
        tank: EntityId,
        /// Station.
        station: EntityId,
    },
    /// Tank touched a pillbox.
    TankPillbox {
        /// Tank.
        tank: EntityId,
        /// Pillbox.
        pillbox: EntityId,
    },
    /// Tank drove over dropped steel.
    TankPickup {
        /// Tank.
        tank: EntityId,
        /// Pickup.
        pickup: EntityId,
    },
}

impl Contact {
    /// Classify a raw pair. Returns `None` for pairs with no gameplay effect
    /// (tank against wall, for example).
    #[must_use]
    pub fn classify(event: &CollisionEvent) -> Option<Self> {
        Self::ordered(event.a, event.b).or_else(|| Self::ordered(event.b, event.a))
    }

    fn ordered(first: BodyTag, second: BodyTag) -> Option<Self> {
        use BodyTag as T;
        Some(match (first, second) {
            (T::Projectile(projectile), T::Tank(tank)) => Self::ProjectileTank { projectile, tank },
            (T::Projectile(projectile), T::Pillbox(pillbox)) => Self::ProjectilePillbox { projectile, pillbox },
            (T::Projectile(projectile), T::Tile(tile)) => Self::ProjectileTerrain { projectile, tile },
            (T::Tank(tank), T::Station(station)) => Self::TankStation { tank, station },
            (T::Tank(tank), T::Pillbox(pillbox)) => Self::TankPillbox { tank, pillbox },
            (T::Tank(tank), T::Pickup(pickup)) => Self::TankPickup { tank, pickup },
            _ => return None,
        })
    }
}

impl Simulation {
    /// Apply the gameplay effect of each collision, in order.
    ///
    /// A shell is consumed by its first hit, so later pairs naming it are
    /// ignored. Entities removed earlier in the batch are skipped.
    pub fn resolve_collisions(&mut self, contacts: &[CollisionEvent], events: &mut TickEvents) {
        for contact in contacts.iter().filter_map(Contact::classify) {
            match contact {
                Contact::ProjectileTank { projectile, tank } => self.shell_hits_tank(projectile, tank, events),
                Contact::ProjectilePillbox { projectile, pillbox } => {
                    self.shell_hits_pillbox(projectile, pillbox, events);
                }
                Contact::ProjectileTerrain { projectile, tile } => self.shell_hits_terrain(projectile, tile, events),
                Contact::TankStation { tank, station } => {
                    self.capture_station(station, tank, events);
                }
                Contact::TankPillbox { tank, pillbox } => {
                    self.collect_pillbox(pillbox, tank, events);
                }
                Contact::TankPickup { tank, pickup } => self.collect_steel(tank, pickup, events),
            }
        }
    }

    fn shell_hits_tank(&mut self, projectile_id: EntityId, tank_id: EntityId, events: &mut TickEvents) {
        let Some(projectile) = self.projectiles.get(&projectile_id) else {
            return;
        };
        let by = projectile.owner;
        if by == ProjectileOwner::Tank(tank_id) {
            return;
        }
        let Some(tank) = self.tanks.get_mut(&tank_id) else {
            return;
        };
        if tank.is_respawning() {
            return;
        }
        let destroyed = tank.apply_damage(self.rules.projectile.damage, &self.rules);
        self.remove_projectile(projectile_id);
        if destroyed {
            self.destroy_tank(tank_id, by, events);
        }
    }

    fn destroy_tank(&mut self, tank_id: EntityId, by: ProjectileOwner, events: &mut TickEvents) {
        let Some(tank) = self.tanks.get(&tank_id) else {
            return;
        };
        let (position, body) = (tank.position, tank.body);
        if let Some(body) = body {
            self.spatial.set_filter(body, CollisionFilter::NONE);
            self.spatial.set_velocity(body, Vec2Fixed::ZERO);
        }
        let steel = self.rules.pickup.steel_value;
        if steel > 0 {
            self.spawn_pickup(position, steel);
        }
        info!(tank = tank_id, ?by, "Tank destroyed");
        events.push(GameEvent::TankDestroyed { tank: tank_id, by });
    }

    fn shell_hits_pillbox(&mut self, projectile_id: EntityId, pillbox_id: EntityId, events: &mut TickEvents) {
        let Some(projectile) = self.projectiles.get(&projectile_id) else {
            return;
        };
        let by = projectile.owner;
        if by == ProjectileOwner::Pillbox(pillbox_id) {
            return;
        }
        let damage = self.rules.projectile.damage;
        let Some(pillbox) = self.pillboxes.get_mut(&pillbox_id) else {
            return;
        };
        let knocked_out = match pillbox.apply_damage(damage) {
            Ok(knocked_out) => knocked_out,
            Err(err) => {
                warn!(%err, pillbox = pillbox_id, "Pillbox hit ignored");
                return;
            }
        };
        self.remove_projectile(projectile_id);
        if knocked_out {
            self.rebuild_pillbox_body(pillbox_id);
            info!(pillbox = pillbox_id, ?by, "Pillbox knocked out");
            events.push(GameEvent::PillboxDestroyed { pillbox: pillbox_id, by });
        }
    }

    /// A shell striking a wall turns it into a crater with the same shape.
    fn shell_hits_terrain(&mut self, projectile_id: EntityId, tile: TileCoord, events: &mut TickEvents) {
        if !self.projectiles.contains_key(&projectile_id) {
            return;
        }
        let Some(index) = self.tiles.get(tile.x, tile.y, Layer::Ground) else {
            return;
        };
        if !index.properties().has_collision {
            return;
        }
        self.remove_projectile(projectile_id);
        let crater = TileIndex::new(TileFamily::Crater, index.mask());
        let changes = self.tiles.set_tile(tile.x, tile.y, Layer::Ground, crater);
        self.apply_tile_changes(changes, events);
    }

    fn collect_steel(&mut self, tank_id: EntityId, pickup_id: EntityId, events: &mut TickEvents) {
        let Some(value) = self.pickups.get(&pickup_id).map(|p| p.value) else {
            return;
        };
        let Some(tank) = self.tanks.get_mut(&tank_id) else {
            return;
        };
        if tank.is_respawning() || tank.steel.headroom() == 0 {
            return;
        }
        let amount = tank.steel.deposit(value);
        self.remove_pickup(pickup_id);
        events.push(GameEvent::SteelCollected { tank: tank_id, amount });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Team;
    use crate::data::{GameRules, MapData};
    use crate::math::Fixed;
    use crate::pillbox::PillboxPhase;
    use crate::spatial::SpatialWorld;
    use crate::tilemap::TileMap;

    fn sim() -> Simulation {
        Simulation::new(GameRules::default(), MapData::open_field("combat", 20, 20)).unwrap()
    }

    fn projectile_at(sim: &mut Simulation, owner: ProjectileOwner, position: Vec2Fixed) -> EntityId {
        sim.spawn_projectile(owner, Team::Red, position, Fixed::ZERO)
    }

    #[test]
    fn test_classify_is_order_independent() {
        let a = CollisionEvent::new(BodyTag::Projectile(1), BodyTag::Tank(2));
        let b = CollisionEvent::new(BodyTag::Tank(2), BodyTag::Projectile(1));
        assert_eq!(Contact::classify(&a), Contact::classify(&b));
        assert_eq!(
            Contact::classify(&a),
            Some(Contact::ProjectileTank { projectile: 1, tank: 2 })
        );
        let wall = CollisionEvent::new(BodyTag::Tank(2), BodyTag::Tile(TileCoord::new(0, 0)));
        assert_eq!(Contact::classify(&wall), None);
    }

    #[test]
    fn test_shell_damages_tank_once() {
        let mut sim = sim();
        let shooter = sim.join_team(1, Team::Red);
        let target = sim.join_team(2, Team::Blue);
        let shell = projectile_at(&mut sim, ProjectileOwner::Tank(shooter), Vec2Fixed::from_int(10, 10));

        let hit = CollisionEvent::new(BodyTag::Projectile(shell), BodyTag::Tank(target));
        let mut events = TickEvents::default();
        sim.resolve_collisions(&[hit, hit], &mut events);

        let max = sim.rules().tank.max_health;
        assert_eq!(sim.tank(target).unwrap().health.current, max - 1);
        assert!(sim.projectiles().is_empty());
    }

    #[test]
    fn test_own_shell_passes_through() {
        let mut sim = sim();
        let tank = sim.join_team(1, Team::Red);
        let shell = projectile_at(&mut sim, ProjectileOwner::Tank(tank), Vec2Fixed::from_int(10, 10));
        let mut events = TickEvents::default();
        sim.resolve_collisions(
            &[CollisionEvent::new(BodyTag::Tank(tank), BodyTag::Projectile(shell))],
            &mut events,
        );
        assert_eq!(sim.tank(tank).unwrap().health.current, sim.rules().tank.max_health);
        assert_eq!(sim.projectiles().len(), 1);
    }

    #[test]
    fn test_lethal_hit_drops_steel_and_disables_collider() {
        let mut sim = sim();
        let target = sim.join_team(2, Team::Blue);
        sim.tank_mut(target).unwrap().health.set(1);
        let shell = projectile_at(&mut sim, ProjectileOwner::Pillbox(77), Vec2Fixed::from_int(10, 10));

        let mut events = TickEvents::default();
        sim.resolve_collisions(
            &[CollisionEvent::new(BodyTag::Projectile(shell), BodyTag::Tank(target))],
            &mut events,
        );

        let tank = sim.tank(target).unwrap();
        assert!(tank.is_respawning());
        assert_eq!(sim.pickups().len(), 1);
        let body = sim.spatial().body(tank.body.unwrap()).unwrap();
        assert_eq!(body.filter, CollisionFilter::NONE);
        assert!(events.events.contains(&GameEvent::TankDestroyed {
            tank: target,
            by: ProjectileOwner::Pillbox(77),
        }));
    }

    #[test]
    fn test_wall_becomes_crater_with_same_mask() {
        let mut map = MapData::open_field("combat", 20, 20);
        map.paint(5, 5, TileFamily::Wall);
        map.paint(6, 5, TileFamily::Wall);
        let mut sim = Simulation::new(GameRules::default(), map).unwrap();
        let before = sim.tiles().get(5, 5, Layer::Ground).unwrap();
        let bodies = sim.spatial().body_count();
        let shell = projectile_at(&mut sim, ProjectileOwner::Tank(99), Vec2Fixed::from_int(10, 10));

        let mut events = TickEvents::default();
        sim.resolve_collisions(
            &[CollisionEvent::new(BodyTag::Tile(TileCoord::new(5, 5)), BodyTag::Projectile(shell))],
            &mut events,
        );

        let after = sim.tiles().get(5, 5, Layer::Ground).unwrap();
        assert_eq!(after.family(), TileFamily::Crater);
        assert_eq!(after.mask(), before.mask());
        assert!(!sim.tiles().has_collision(5, 5));
        // One wall body gone; the shell is gone too.
        assert_eq!(sim.spatial().body_count(), bodies - 1);
        assert!(events
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TileChanged { x: 5, y: 5, .. })));
    }

    #[test]
    fn test_pillbox_knockout_and_pickup() {
        let mut sim = sim();
        let tank = sim.join_team(1, Team::Red);
        let position = TileMap::tile_center(TileCoord::new(3, 3), sim.rules().tile_size_fixed());
        let pillbox = sim.spawn_pillbox(Team::Neutral, position);
        sim.pillbox_mut(pillbox).unwrap().health.set(1);
        let shell = projectile_at(&mut sim, ProjectileOwner::Tank(tank), Vec2Fixed::from_int(10, 10));

        let mut events = TickEvents::default();
        sim.resolve_collisions(
            &[CollisionEvent::new(BodyTag::Projectile(shell), BodyTag::Pillbox(pillbox))],
            &mut events,
        );
        assert_eq!(sim.pillbox(pillbox).unwrap().phase(), PillboxPhase::Pickup);

        sim.resolve_collisions(
            &[CollisionEvent::new(BodyTag::Pillbox(pillbox), BodyTag::Tank(tank))],
            &mut events,
        );
        assert_eq!(sim.pillbox(pillbox).unwrap().holder(), Some(tank));
        assert_eq!(sim.tank(tank).unwrap().pillbox_count, 1);
        assert!(sim.pillbox(pillbox).unwrap().body.is_none());
    }

    #[test]
    fn test_station_contact_respects_capture_range() {
        let mut sim = sim();
        let station = sim.add_station(Team::Neutral, Vec2Fixed::from_int(100, 100));
        let tank = sim.join_team(1, Team::Red);
        let range = sim.rules().station.capture_range as i32;
        sim.place_tank(tank, Vec2Fixed::from_int(100 + range + 1, 100)).unwrap();

        let contact = CollisionEvent::new(BodyTag::Station(station), BodyTag::Tank(tank));
        let mut events = TickEvents::default();
        sim.resolve_collisions(&[contact], &mut events);
        assert_eq!(sim.stations()[&station].team, Team::Neutral);
        assert!(events.is_empty());

        sim.place_tank(tank, Vec2Fixed::from_int(100 + range, 100)).unwrap();
        sim.resolve_collisions(&[contact, contact], &mut events);
        assert_eq!(sim.stations()[&station].team, Team::Red);
        assert_eq!(
            events.events,
            vec![GameEvent::StationCaptured {
                station,
                team: Team::Red,
                previous: Team::Neutral,
            }]
        );
    }

    #[test]
    fn test_full_tank_leaves_steel() {
        let mut sim = sim();
        let tank = sim.join_team(1, Team::Red);
        let pickup = sim.spawn_pickup(Vec2Fixed::from_int(50, 50), 2);
        let capacity = sim.tank(tank).unwrap().steel.capacity;
        sim.tank_mut(tank).unwrap().steel.amount = capacity;

        let contact = CollisionEvent::new(BodyTag::Tank(tank), BodyTag::Pickup(pickup));
        let mut events = TickEvents::default();
        sim.resolve_collisions(&[contact], &mut events);
        assert_eq!(sim.pickups().len(), 1);

        sim.tank_mut(tank).unwrap().steel.amount = capacity - 1;
        sim.resolve_collisions(&[contact], &mut events);
        assert!(sim.pickups().is_empty());
        assert_eq!(sim.tank(tank).unwrap().steel.amount, capacity);
    }
}
