//! Core simulation loop.
//!
//! [`Simulation`] is the explicit world context: it owns the terrain, every
//! entity, the physics backend and the seeded RNG, and every tick function
//! receives what it needs from it. Nothing here reads wall-clock time; all
//! timers advance by the `dt` handed to [`Simulation::tick`].
//!
//! # Determinism
//!
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - Seeded RNG only (respawn placement)
//! - Entities live in ordered maps, so iteration order is by id
//! - Collision events are resolved in the order the backend reports them
//!
//! # Tick order
//!
//! 1. Tanks: respawn timers, steering, firing
//! 2. Pillboxes: targeting and firing, proximity pickup
//! 3. Stations: capture, ammunition refill
//! 4. Projectiles: range bookkeeping
//! 5. Physics step, position read-back
//! 6. Collision resolution
//! 7. Steel pickup decay
//! 8. Build queues
//! 9. Win check and match reset
//!
//! # Example
//!
//! ```
//! use tank_core::data::{GameRules, MapData};
//! use tank_core::input::PlayerInput;
//! use tank_core::math::Fixed;
//! use tank_core::simulation::Simulation;
//!
//! let mut sim = Simulation::new(GameRules::default(), MapData::default_arena()).unwrap();
//! let tank = sim.join(1);
//! sim.set_input(tank, PlayerInput::new(Fixed::ZERO, true, false, 0)).unwrap();
//!
//! let dt = sim.fixed_step();
//! for _ in 0..10 {
//!     sim.tick(dt);
//! }
//! assert_eq!(sim.current_tick(), 10);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::build_queue::{BuildItem, BuildKind, BuildStep};
use crate::components::{EntityId, SessionId, Team};
use crate::data::{GameRules, MapData};
use crate::economy::ResourcePickup;
use crate::error::{GameError, Result};
use crate::events::{CommandOutcome, GameEvent, Rejection, TickEvents};
use crate::input::{PlayerCommand, PlayerInput};
use crate::math::{Fixed, Vec2Fixed};
use crate::pillbox::{lead_heading, select_target, Pillbox, PillboxPhase, PillboxState, TargetCandidate};
use crate::projectile::{Projectile, ProjectileOwner};
use crate::spatial::{
    category, BodyDesc, BodyHandle, BodyTag, CollisionFilter, GridSpatialWorld, Shape, SpatialWorld,
};
use crate::station::{sole_owner, Station};
use crate::tank::Tank;
use crate::tilemap::{Layer, TileChange, TileCoord, TileFamily, TileMap};

/// Whether the match is still being fought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Stations are contested.
    Running,
    /// A team holds every station; the match resets when the timer runs out.
    Over {
        /// Winning team.
        winner: Team,
        /// Seconds until reset.
        reset_in: Fixed,
    },
}

const TANK_FILTER: CollisionFilter = CollisionFilter::new(
    category::PLAYER,
    category::WALL | category::PROJECTILE | category::PILLBOX | category::STATION | category::PICKUP,
);

const PROJECTILE_FILTER: CollisionFilter =
    CollisionFilter::new(category::PROJECTILE, category::WALL | category::PLAYER | category::PILLBOX);

const WALL_FILTER: CollisionFilter = CollisionFilter::new(category::WALL, category::PLAYER | category::PROJECTILE);

const PICKUP_FILTER: CollisionFilter = CollisionFilter::new(category::PICKUP, category::PLAYER);

/// The authoritative game world.
#[derive(Debug)]
pub struct Simulation {
    tick: u64,
    pub(crate) rules: GameRules,
    map: MapData,
    pub(crate) tiles: TileMap,
    pub(crate) spatial: Box<dyn SpatialWorld>,
    pub(crate) tanks: BTreeMap<EntityId, Tank>,
    pub(crate) projectiles: BTreeMap<EntityId, Projectile>,
    pub(crate) pillboxes: BTreeMap<EntityId, Pillbox>,
    pub(crate) stations: BTreeMap<EntityId, Station>,
    pub(crate) pickups: BTreeMap<EntityId, ResourcePickup>,
    pickup_bodies: BTreeMap<EntityId, BodyHandle>,
    tile_bodies: BTreeMap<TileCoord, BodyHandle>,
    pending_events: Vec<GameEvent>,
    next_id: EntityId,
    rng: ChaCha8Rng,
    match_state: MatchState,
}

impl Simulation {
    /// Build a world from rules and a map, using the grid physics backend.
    pub fn new(rules: GameRules, map: MapData) -> Result<Self> {
        let cell = rules.tile_size_fixed() * Fixed::from_num(2);
        Self::with_spatial(rules, map, Box::new(GridSpatialWorld::new(cell)))
    }

    /// Build a world on a caller-supplied physics backend.
    pub fn with_spatial(rules: GameRules, map: MapData, spatial: Box<dyn SpatialWorld>) -> Result<Self> {
        let tiles = map.tilemap()?;
        let rng = ChaCha8Rng::seed_from_u64(rules.match_rules.seed);
        let mut sim = Self {
            tick: 0,
            rules,
            map,
            tiles,
            spatial,
            tanks: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            pillboxes: BTreeMap::new(),
            stations: BTreeMap::new(),
            pickups: BTreeMap::new(),
            pickup_bodies: BTreeMap::new(),
            tile_bodies: BTreeMap::new(),
            pending_events: Vec::new(),
            next_id: 1,
            rng,
            match_state: MatchState::Running,
        };
        sim.populate_world();
        info!(
            map = %sim.map.name,
            width = sim.tiles.width(),
            height = sim.tiles.height(),
            stations = sim.stations.len(),
            pillboxes = sim.pillboxes.len(),
            "Simulation created"
        );
        Ok(sim)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of ticks run so far.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Tuning rules.
    #[must_use]
    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Map the match was built from.
    #[must_use]
    pub fn map(&self) -> &MapData {
        &self.map
    }

    /// Terrain.
    #[must_use]
    pub fn tiles(&self) -> &TileMap {
        &self.tiles
    }

    /// Physics backend, for inspection.
    #[must_use]
    pub fn spatial(&self) -> &dyn SpatialWorld {
        self.spatial.as_ref()
    }

    /// All tanks by id.
    #[must_use]
    pub fn tanks(&self) -> &BTreeMap<EntityId, Tank> {
        &self.tanks
    }

    /// One tank.
    #[must_use]
    pub fn tank(&self, id: EntityId) -> Option<&Tank> {
        self.tanks.get(&id)
    }

    /// One tank, mutably.
    pub fn tank_mut(&mut self, id: EntityId) -> Option<&mut Tank> {
        self.tanks.get_mut(&id)
    }

    /// All projectiles by id.
    #[must_use]
    pub fn projectiles(&self) -> &BTreeMap<EntityId, Projectile> {
        &self.projectiles
    }

    /// All pillboxes by id.
    #[must_use]
    pub fn pillboxes(&self) -> &BTreeMap<EntityId, Pillbox> {
        &self.pillboxes
    }

    /// One pillbox.
    #[must_use]
    pub fn pillbox(&self, id: EntityId) -> Option<&Pillbox> {
        self.pillboxes.get(&id)
    }

    /// One pillbox, mutably.
    pub fn pillbox_mut(&mut self, id: EntityId) -> Option<&mut Pillbox> {
        self.pillboxes.get_mut(&id)
    }

    /// All stations by id.
    #[must_use]
    pub fn stations(&self) -> &BTreeMap<EntityId, Station> {
        &self.stations
    }

    /// One station, mutably.
    pub fn station_mut(&mut self, id: EntityId) -> Option<&mut Station> {
        self.stations.get_mut(&id)
    }

    /// All steel pickups by id.
    #[must_use]
    pub fn pickups(&self) -> &BTreeMap<EntityId, ResourcePickup> {
        &self.pickups
    }

    /// Match state.
    #[must_use]
    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    /// Winner, once the match is over.
    #[must_use]
    pub fn winner(&self) -> Option<Team> {
        match self.match_state {
            MatchState::Running => None,
            MatchState::Over { winner, .. } => Some(winner),
        }
    }

    /// True once a team holds every station.
    #[must_use]
    pub fn is_game_over(&self) -> bool {
        self.winner().is_some()
    }

    /// Length of one tick in seconds, from the rules' tick rate.
    #[must_use]
    pub fn fixed_step(&self) -> Fixed {
        Fixed::ONE / Fixed::from_num(self.rules.tick_rate.max(1))
    }

    fn tile_size(&self) -> Fixed {
        self.rules.tile_size_fixed()
    }

    fn alloc_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // World construction
    // ------------------------------------------------------------------

    /// Create terrain bodies, stations and map pillboxes.
    fn populate_world(&mut self) {
        for y in 0..self.tiles.height() {
            for x in 0..self.tiles.width() {
                self.sync_tile_body(TileCoord::new(x, y));
            }
        }
        let tile_size = self.tile_size();
        for spawn in self.map.stations.clone() {
            let position = TileMap::tile_center(TileCoord::new(spawn.x, spawn.y), tile_size);
            self.add_station(spawn.team, position);
        }
        for spawn in self.map.pillboxes.clone() {
            let position = TileMap::tile_center(TileCoord::new(spawn.x, spawn.y), tile_size);
            self.spawn_pillbox(spawn.team, position);
        }
    }

    /// Add a station.
    pub fn add_station(&mut self, team: Team, position: Vec2Fixed) -> EntityId {
        let id = self.alloc_id();
        let mut station = Station::new(id, position, team);
        station.body = Some(self.spatial.add_body(station.collider(&self.rules.station)));
        self.stations.insert(id, station);
        id
    }

    /// Add a placed pillbox at full health.
    pub fn spawn_pillbox(&mut self, team: Team, position: Vec2Fixed) -> EntityId {
        let id = self.alloc_id();
        let pillbox = Pillbox::placed(id, team, position, &self.rules);
        self.insert_pillbox(pillbox);
        id
    }

    fn insert_pillbox(&mut self, mut pillbox: Pillbox) {
        pillbox.body = pillbox.collider(&self.rules).map(|desc| self.spatial.add_body(desc));
        self.pillboxes.insert(pillbox.id, pillbox);
    }

    /// Replace a pillbox's collider with the one its current phase needs.
    pub(crate) fn rebuild_pillbox_body(&mut self, id: EntityId) {
        let Some(pillbox) = self.pillboxes.get_mut(&id) else {
            return;
        };
        if let Some(old) = pillbox.body.take() {
            self.spatial.remove_body(old);
        }
        pillbox.body = pillbox.collider(&self.rules).map(|desc| self.spatial.add_body(desc));
    }

    /// Keep the static body of a terrain cell in line with its collision flag.
    pub(crate) fn sync_tile_body(&mut self, coord: TileCoord) {
        let solid = self.tiles.has_collision(coord.x, coord.y);
        match (solid, self.tile_bodies.get(&coord).copied()) {
            (true, None) => {
                let tile_size = self.tile_size();
                let handle = self.spatial.add_body(BodyDesc {
                    tag: BodyTag::Tile(coord),
                    shape: Shape::square(tile_size),
                    position: TileMap::tile_center(coord, tile_size),
                    filter: WALL_FILTER,
                    is_static: true,
                    is_sensor: false,
                });
                self.tile_bodies.insert(coord, handle);
            }
            (false, Some(handle)) => {
                self.spatial.remove_body(handle);
                self.tile_bodies.remove(&coord);
            }
            _ => {}
        }
    }

    /// Record terrain changes as events and refresh their bodies.
    pub(crate) fn apply_tile_changes(&mut self, changes: Vec<TileChange>, events: &mut TickEvents) {
        for change in changes {
            self.sync_tile_body(TileCoord::new(change.x, change.y));
            events.push(GameEvent::TileChanged {
                x: change.x,
                y: change.y,
                layer: change.layer,
                index: change.index,
            });
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Team with fewer tanks; ties go to red.
    #[must_use]
    pub fn balanced_team(&self) -> Team {
        let count = |team: Team| self.tanks.values().filter(|t| t.team == team).count();
        let mut best = Team::PLAYABLE[0];
        for team in Team::PLAYABLE {
            if count(team) < count(best) {
                best = team;
            }
        }
        best
    }

    /// Spawn a tank for a new session on the smaller team.
    pub fn join(&mut self, session: SessionId) -> EntityId {
        let team = self.balanced_team();
        self.join_team(session, team)
    }

    /// Spawn a tank for a session on a given team.
    pub fn join_team(&mut self, session: SessionId, team: Team) -> EntityId {
        let id = self.alloc_id();
        let position = self.entry_point(team);
        let mut tank = Tank::new(id, session, team, position, &self.rules);
        tank.body = Some(self.spatial.add_body(self.tank_body(id, position)));
        self.tanks.insert(id, tank);
        info!(tank = id, session, ?team, "Tank joined");
        id
    }

    /// Remove a session's tank. Pillboxes it was carrying are lost with it.
    pub fn leave(&mut self, tank_id: EntityId) -> Result<()> {
        let tank = self.tanks.remove(&tank_id).ok_or(GameError::EntityNotFound(tank_id))?;
        if let Some(body) = tank.body {
            self.spatial.remove_body(body);
        }
        self.pillboxes.retain(|_, p| p.holder() != Some(tank_id));
        info!(tank = tank_id, session = tank.session, "Tank left");
        Ok(())
    }

    /// Move a tank and its collider to `position`.
    pub fn place_tank(&mut self, tank_id: EntityId, position: Vec2Fixed) -> Result<()> {
        let tank = self.tanks.get_mut(&tank_id).ok_or(GameError::EntityNotFound(tank_id))?;
        tank.position = position;
        if let Some(body) = tank.body {
            self.spatial.set_position(body, position);
        }
        Ok(())
    }

    /// Replace a tank's current input.
    pub fn set_input(&mut self, tank_id: EntityId, input: PlayerInput) -> Result<()> {
        let tank = self.tanks.get_mut(&tank_id).ok_or(GameError::EntityNotFound(tank_id))?;
        tank.input = input;
        Ok(())
    }

    fn tank_body(&self, id: EntityId, position: Vec2Fixed) -> BodyDesc {
        BodyDesc {
            tag: BodyTag::Tank(id),
            shape: Shape::circle(self.rules.tank.radius()),
            position,
            filter: TANK_FILTER,
            is_static: false,
            is_sensor: false,
        }
    }

    /// Random station owned by `team`, if it has any.
    fn owned_station_position(&mut self, team: Team) -> Option<Vec2Fixed> {
        let owned: Vec<Vec2Fixed> = self
            .stations
            .values()
            .filter(|s| s.team == team)
            .map(|s| s.position)
            .collect();
        if owned.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..owned.len());
        Some(owned[pick])
    }

    /// Where a new tank of `team` enters the map.
    fn entry_point(&mut self, team: Team) -> Vec2Fixed {
        if let Some(position) = self.owned_station_position(team) {
            return position;
        }
        let tile_size = self.tile_size();
        self.map
            .spawns
            .iter()
            .find(|s| s.team == team)
            .map(|s| TileMap::tile_center(TileCoord::new(s.x, s.y), tile_size))
            .unwrap_or_else(|| self.tiles.world_size(tile_size).scale(Fixed::ONE / Fixed::from_num(2)))
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Apply a player command. Expected refusals come back as
    /// [`CommandOutcome::Rejected`]; an unknown tank is an error.
    pub fn apply_command(&mut self, tank_id: EntityId, command: PlayerCommand) -> Result<CommandOutcome> {
        if !self.tanks.contains_key(&tank_id) {
            return Err(GameError::EntityNotFound(tank_id));
        }
        let outcome = match command {
            PlayerCommand::Build { tiles, kind } => self.queue_build(tank_id, &tiles, kind),
            PlayerCommand::PlacePillbox { tiles } => self.place_pillbox(tank_id, &tiles)?,
            PlayerCommand::BuildPillbox => self.build_pillbox(tank_id),
            PlayerCommand::CancelBuild { index } => self.cancel_build(tank_id, index),
        };
        if let CommandOutcome::Rejected(reason) = outcome {
            debug!(tank = tank_id, ?reason, "Command rejected");
        }
        Ok(outcome)
    }

    /// Top-left corner of a 2x2 selection, if `tiles` is exactly one.
    fn square_selection(&self, tiles: &[TileCoord]) -> Option<TileCoord> {
        if tiles.len() != 4 {
            return None;
        }
        if !tiles.iter().all(|t| self.tiles.in_bounds(i64::from(t.x), i64::from(t.y))) {
            return None;
        }
        let min_x = tiles.iter().map(|t| t.x).min()?;
        let min_y = tiles.iter().map(|t| t.y).min()?;
        let expected = [
            TileCoord::new(min_x, min_y),
            TileCoord::new(min_x + 1, min_y),
            TileCoord::new(min_x, min_y + 1),
            TileCoord::new(min_x + 1, min_y + 1),
        ];
        expected.iter().all(|e| tiles.contains(e)).then_some(expected[0])
    }

    fn selection_cells(origin: TileCoord) -> [TileCoord; 4] {
        [
            origin,
            TileCoord::new(origin.x + 1, origin.y),
            TileCoord::new(origin.x, origin.y + 1),
            TileCoord::new(origin.x + 1, origin.y + 1),
        ]
    }

    /// World position of the shared corner of a 2x2 selection.
    fn selection_center(&self, origin: TileCoord) -> Vec2Fixed {
        let tile_size = self.tile_size();
        Vec2Fixed::new(
            Fixed::from_num(origin.x + 1) * tile_size,
            Fixed::from_num(origin.y + 1) * tile_size,
        )
    }

    /// Validate a selection against a tank: shape, map bounds and reach.
    fn check_selection(&self, tank: &Tank, tiles: &[TileCoord]) -> std::result::Result<TileCoord, Rejection> {
        if tank.is_respawning() {
            return Err(Rejection::TankRespawning);
        }
        let origin = self.square_selection(tiles).ok_or(Rejection::InvalidSelection)?;
        let reach = Fixed::from_num(self.rules.build.max_distance);
        if !tank.position.within(self.selection_center(origin), reach) {
            return Err(Rejection::OutOfRange);
        }
        Ok(origin)
    }

    fn queue_build(&mut self, tank_id: EntityId, tiles: &[TileCoord], kind: BuildKind) -> CommandOutcome {
        let Some(tank) = self.tanks.get(&tank_id) else {
            return CommandOutcome::Rejected(Rejection::TankRespawning);
        };
        let origin = match self.check_selection(tank, tiles) {
            Ok(origin) => origin,
            Err(reason) => return CommandOutcome::Rejected(reason),
        };
        let build = &self.rules.build;

        let mut items = Vec::new();
        for cell in Self::selection_cells(origin) {
            if tank.build_queue.targets(cell) {
                continue;
            }
            let ground = self.tiles.family(cell.x, cell.y, Layer::Ground);
            let decoration = self.tiles.family(cell.x, cell.y, Layer::Decoration);
            match kind {
                BuildKind::Harvest => {
                    if decoration == Some(TileFamily::Forest) {
                        items.push(BuildItem::new(tank_id, cell, kind, crate::clock::millis_to_fixed(build.harvest_time_ms), 0));
                    }
                }
                BuildKind::Road | BuildKind::Wall => {
                    let Some(ground) = ground else {
                        return CommandOutcome::Rejected(Rejection::InvalidSelection);
                    };
                    if !ground.properties().buildable {
                        return CommandOutcome::Rejected(Rejection::BlockedTerrain);
                    }
                    let target = if kind == BuildKind::Road { TileFamily::Road } else { TileFamily::Wall };
                    if ground == target && decoration == Some(TileFamily::Empty) {
                        continue;
                    }
                    let cost = if kind == BuildKind::Road { build.road } else { build.wall };
                    items.push(BuildItem::new(tank_id, cell, kind, cost.time(), cost.wood));
                }
            }
        }

        if items.is_empty() {
            let reason = if kind == BuildKind::Harvest { Rejection::NoForest } else { Rejection::NothingToBuild };
            return CommandOutcome::Rejected(reason);
        }
        let total: u32 = items.iter().map(|i| i.wood_cost).sum();
        if !tank.wood.can_afford(total) {
            return CommandOutcome::Rejected(Rejection::InsufficientWood);
        }
        if !tank.build_queue.has_room_for(items.len()) {
            return CommandOutcome::Rejected(Rejection::QueueFull);
        }

        let Some(tank) = self.tanks.get_mut(&tank_id) else {
            return CommandOutcome::Rejected(Rejection::TankRespawning);
        };
        tank.wood.try_spend(total);
        for item in items {
            if tank.build_queue.push(item).is_err() {
                break;
            }
        }
        CommandOutcome::Accepted
    }

    fn place_pillbox(&mut self, tank_id: EntityId, tiles: &[TileCoord]) -> Result<CommandOutcome> {
        let tank = self.tanks.get(&tank_id).ok_or(GameError::EntityNotFound(tank_id))?;
        let origin = match self.check_selection(tank, tiles) {
            Ok(origin) => origin,
            Err(reason) => return Ok(CommandOutcome::Rejected(reason)),
        };
        if tank.pillbox_count == 0 {
            return Ok(CommandOutcome::Rejected(Rejection::NoPillbox));
        }
        let blocked = Self::selection_cells(origin)
            .iter()
            .any(|c| self.tiles.has_collision(c.x, c.y) || self.tiles.is_water(c.x, c.y));
        if blocked {
            return Ok(CommandOutcome::Rejected(Rejection::BlockedTerrain));
        }
        let center = self.selection_center(origin);
        let tile_size = self.tile_size();
        let occupied = self
            .pillboxes
            .values()
            .any(|p| p.phase() == PillboxPhase::Placed && p.position().is_some_and(|pos| pos.within(center, tile_size)));
        if occupied {
            return Ok(CommandOutcome::Rejected(Rejection::BlockedTerrain));
        }
        let Some(pillbox_id) = self.pillboxes.values().find(|p| p.holder() == Some(tank_id)).map(|p| p.id) else {
            return Ok(CommandOutcome::Rejected(Rejection::NoPillbox));
        };

        let team = tank.team;
        if let Some(pillbox) = self.pillboxes.get_mut(&pillbox_id) {
            pillbox.place(center, team)?;
        }
        self.rebuild_pillbox_body(pillbox_id);
        if let Some(tank) = self.tanks.get_mut(&tank_id) {
            tank.pillbox_count = tank.pillbox_count.saturating_sub(1);
        }
        info!(pillbox = pillbox_id, tank = tank_id, ?team, "Pillbox placed");
        self.pending_events.push(GameEvent::PillboxPlaced {
            pillbox: pillbox_id,
            tank: tank_id,
            team,
        });
        Ok(CommandOutcome::Accepted)
    }

    fn build_pillbox(&mut self, tank_id: EntityId) -> CommandOutcome {
        let cost = self.rules.pillbox.steel_cost;
        let Some(tank) = self.tanks.get_mut(&tank_id) else {
            return CommandOutcome::Rejected(Rejection::TankRespawning);
        };
        if tank.is_respawning() {
            return CommandOutcome::Rejected(Rejection::TankRespawning);
        }
        if !tank.steel.try_spend(cost) {
            return CommandOutcome::Rejected(Rejection::InsufficientSteel);
        }
        let (team, position) = (tank.team, tank.position);
        let id = self.alloc_id();
        self.insert_pillbox(Pillbox::pickup(id, team, position, &self.rules));
        self.pending_events.push(GameEvent::PillboxBuilt { pillbox: id, tank: tank_id });
        CommandOutcome::Accepted
    }

    fn cancel_build(&mut self, tank_id: EntityId, index: usize) -> CommandOutcome {
        let Some(tank) = self.tanks.get_mut(&tank_id) else {
            return CommandOutcome::Rejected(Rejection::UnknownBuildItem);
        };
        match tank.build_queue.cancel(index) {
            Some(item) => {
                tank.wood.deposit(item.refund());
                CommandOutcome::Accepted
            }
            None => CommandOutcome::Rejected(Rejection::UnknownBuildItem),
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the world by one fixed step of `dt` seconds.
    pub fn tick(&mut self, dt: Fixed) -> TickEvents {
        let mut events = TickEvents {
            tick: self.tick,
            events: std::mem::take(&mut self.pending_events),
        };

        self.update_tanks(dt, &mut events);
        self.update_pillboxes(dt, &mut events);
        self.update_stations(dt, &mut events);
        self.advance_projectiles();

        let contacts = self.spatial.step();
        self.read_back_positions();
        self.resolve_collisions(&contacts, &mut events);

        self.expire_pickups();
        self.update_build_queues(dt, &mut events);
        self.check_victory(dt, &mut events);

        self.tick += 1;

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        events
    }

    fn update_tanks(&mut self, dt: Fixed, events: &mut TickEvents) {
        let tile_size = self.tile_size();
        let mut shots = Vec::new();
        let mut ready = Vec::new();

        for tank in self.tanks.values_mut() {
            if tank.is_respawning() {
                if tank.tick_respawn(dt) {
                    ready.push(tank.id);
                }
                continue;
            }
            let tile_speed = self.tiles.speed_multiplier_at(tank.position, tile_size);
            let velocity = tank.drive(dt, &self.rules, tile_speed);
            if let Some(body) = tank.body {
                self.spatial.set_velocity(body, velocity);
            }
            tank.cool_down(dt);
            if tank.input.fire {
                if let Some(order) = tank.try_fire(&self.rules) {
                    shots.push((tank.id, tank.team, order));
                }
            }
        }

        for id in ready {
            self.respawn_tank(id, events);
        }
        for (id, team, order) in shots {
            self.spawn_projectile(ProjectileOwner::Tank(id), team, order.origin, order.heading);
        }
    }

    fn respawn_tank(&mut self, id: EntityId, events: &mut TickEvents) {
        let Some(team) = self.tanks.get(&id).map(|t| t.team) else {
            return;
        };
        let station = self.owned_station_position(team);
        let Some(tank) = self.tanks.get_mut(&id) else {
            return;
        };
        let position = station.unwrap_or(tank.position);
        tank.respawn(position);
        if let Some(body) = tank.body {
            self.spatial.set_position(body, position);
            self.spatial.set_velocity(body, Vec2Fixed::ZERO);
            self.spatial.set_filter(body, TANK_FILTER);
        }
        if station.is_none() {
            debug!(tank = id, ?team, "No station owned, respawning in place");
        }
        events.push(GameEvent::TankRespawned { tank: id });
    }

    pub(crate) fn spawn_projectile(&mut self, owner: ProjectileOwner, team: Team, origin: Vec2Fixed, heading: Fixed) -> EntityId {
        let id = self.alloc_id();
        let mut projectile = Projectile::new(id, owner, team, origin, heading, &self.rules.projectile);
        let body = self.spatial.add_body(BodyDesc {
            tag: BodyTag::Projectile(id),
            shape: Shape::circle(Fixed::from_num(self.rules.projectile.radius)),
            position: origin,
            filter: PROJECTILE_FILTER,
            is_static: false,
            is_sensor: true,
        });
        self.spatial.set_velocity(body, projectile.velocity());
        projectile.body = Some(body);
        self.projectiles.insert(id, projectile);
        id
    }

    pub(crate) fn remove_projectile(&mut self, id: EntityId) -> Option<Projectile> {
        let projectile = self.projectiles.remove(&id)?;
        if let Some(body) = projectile.body {
            self.spatial.remove_body(body);
        }
        Some(projectile)
    }

    fn update_pillboxes(&mut self, dt: Fixed, events: &mut TickEvents) {
        let candidates: Vec<TargetCandidate> = self
            .tanks
            .values()
            .map(|t| TargetCandidate {
                id: t.id,
                team: t.team,
                position: t.position,
                velocity: Vec2Fixed::from_angle(t.heading, t.speed * dt),
                active: !t.is_respawning(),
            })
            .collect();
        let range = Fixed::from_num(self.rules.pillbox.detection_range);
        let reach = Fixed::from_num(self.rules.pillbox.pickup_proximity);
        let shell_speed = Fixed::from_num(self.rules.projectile.speed_per_tick);
        let muzzle = Fixed::from_num(self.rules.pillbox.placed_radius + self.rules.projectile.radius + 1);

        let mut shots = Vec::new();
        let mut collected = Vec::new();
        for pillbox in self.pillboxes.values_mut() {
            pillbox.cool_down(dt);
            match pillbox.state {
                PillboxState::Placed { position } => {
                    if !pillbox.can_fire() {
                        continue;
                    }
                    let Some(target) = select_target(pillbox, position, range, candidates.iter().copied()) else {
                        continue;
                    };
                    let heading = lead_heading(position, target.position, target.velocity, shell_speed);
                    pillbox.fire_cooldown = self.rules.pillbox.fire_cooldown();
                    shots.push((pillbox.id, pillbox.team, position + Vec2Fixed::from_angle(heading, muzzle), heading));
                }
                PillboxState::Pickup { position } => {
                    if let Some(tank) = candidates.iter().find(|c| c.active && c.position.within(position, reach)) {
                        collected.push((pillbox.id, tank.id));
                    }
                }
                PillboxState::Held { .. } => {}
            }
        }

        for (pillbox, tank) in collected {
            self.collect_pillbox(pillbox, tank, events);
        }
        for (id, team, origin, heading) in shots {
            self.spawn_projectile(ProjectileOwner::Pillbox(id), team, origin, heading);
        }
    }

    /// `Pickup -> Held` for an active tank. Returns true if it happened.
    pub(crate) fn collect_pillbox(&mut self, pillbox_id: EntityId, tank_id: EntityId, events: &mut TickEvents) -> bool {
        if !self.tanks.get(&tank_id).is_some_and(|t| !t.is_respawning()) {
            return false;
        }
        let Some(pillbox) = self.pillboxes.get_mut(&pillbox_id) else {
            return false;
        };
        if pillbox.pick_up(tank_id).is_err() {
            return false;
        }
        self.rebuild_pillbox_body(pillbox_id);
        if let Some(tank) = self.tanks.get_mut(&tank_id) {
            tank.pillbox_count += 1;
        }
        events.push(GameEvent::PillboxPickedUp {
            pillbox: pillbox_id,
            tank: tank_id,
        });
        true
    }

    fn update_stations(&mut self, dt: Fixed, events: &mut TickEvents) {
        let range = Fixed::from_num(self.rules.station.capture_range);

        let mut captures = Vec::new();
        for station in self.stations.values() {
            let capturer = self
                .tanks
                .values()
                .find(|t| !t.is_respawning() && t.team != station.team && station.in_range(t.position, range));
            if let Some(tank) = capturer {
                captures.push((station.id, tank.id));
            }
        }
        for (station, tank) in captures {
            self.capture_station(station, tank, events);
        }

        let rate = self.rules.station.ammo_refill_per_second;
        for tank in self.tanks.values_mut() {
            if tank.is_respawning() {
                continue;
            }
            if self.stations.values().any(|s| s.in_range(tank.position, range)) {
                tank.refill_ammo(dt, rate);
            }
        }
    }

    /// Hand a station to an active tank's team if the tank is within capture
    /// range. Returns true if it changed owner.
    pub(crate) fn capture_station(&mut self, station_id: EntityId, tank_id: EntityId, events: &mut TickEvents) -> bool {
        let Some(tank) = self.tanks.get(&tank_id).filter(|t| !t.is_respawning()) else {
            return false;
        };
        let (team, position) = (tank.team, tank.position);
        let range = Fixed::from_num(self.rules.station.capture_range);
        let Some(station) = self.stations.get_mut(&station_id) else {
            return false;
        };
        if !station.in_range(position, range) {
            return false;
        }
        let Some(previous) = station.capture(team) else {
            return false;
        };
        info!(station = station_id, ?team, ?previous, "Station captured");
        events.push(GameEvent::StationCaptured {
            station: station_id,
            team,
            previous,
        });
        true
    }

    fn advance_projectiles(&mut self) {
        let spent: Vec<EntityId> = self
            .projectiles
            .values_mut()
            .filter_map(|p| p.advance().then_some(p.id))
            .collect();
        for id in spent {
            self.remove_projectile(id);
        }
    }

    /// Copy physics positions back into entities, clamping tanks to the map
    /// and dropping projectiles that left it.
    fn read_back_positions(&mut self) {
        let world = self.tiles.world_size(self.tile_size());
        let radius = self.rules.tank.radius();
        let low = Vec2Fixed::new(radius, radius);
        let high = Vec2Fixed::new((world.x - radius).max(radius), (world.y - radius).max(radius));

        for tank in self.tanks.values_mut() {
            let Some(body) = tank.body else { continue };
            let Some(position) = self.spatial.body(body).map(|b| b.position) else {
                continue;
            };
            let clamped = position.clamp(low, high);
            if clamped != position {
                self.spatial.set_position(body, clamped);
            }
            tank.position = clamped;
        }

        for pillbox in self.pillboxes.values_mut() {
            if let (PillboxState::Pickup { position }, Some(body)) = (&mut pillbox.state, pillbox.body) {
                if let Some(b) = self.spatial.body(body) {
                    *position = b.position;
                }
            }
        }

        let mut escaped = Vec::new();
        for projectile in self.projectiles.values_mut() {
            let Some(body) = projectile.body else { continue };
            if let Some(b) = self.spatial.body(body) {
                projectile.position = b.position;
            }
            let p = projectile.position;
            if p.x < Fixed::ZERO || p.y < Fixed::ZERO || p.x > world.x || p.y > world.y {
                escaped.push(projectile.id);
            }
        }
        for id in escaped {
            self.remove_projectile(id);
        }
    }

    pub(crate) fn spawn_pickup(&mut self, position: Vec2Fixed, value: u32) -> EntityId {
        let id = self.alloc_id();
        let pickup = ResourcePickup::new(id, position, value, self.tick);
        let body = self.spatial.add_body(BodyDesc {
            tag: BodyTag::Pickup(id),
            shape: Shape::circle(Fixed::from_num(self.rules.pickup.radius)),
            position,
            filter: PICKUP_FILTER,
            is_static: true,
            is_sensor: true,
        });
        self.pickups.insert(id, pickup);
        self.pickup_bodies.insert(id, body);
        id
    }

    pub(crate) fn remove_pickup(&mut self, id: EntityId) -> Option<ResourcePickup> {
        let pickup = self.pickups.remove(&id)?;
        if let Some(body) = self.pickup_bodies.remove(&id) {
            self.spatial.remove_body(body);
        }
        Some(pickup)
    }

    fn expire_pickups(&mut self) {
        let lifetime = self.rules.millis_to_ticks(self.rules.pickup.lifetime_ms);
        let now = self.tick;
        let expired: Vec<EntityId> = self
            .pickups
            .values()
            .filter(|p| p.is_expired(now, lifetime))
            .map(|p| p.id)
            .collect();
        for id in expired {
            self.remove_pickup(id);
        }
    }

    fn update_build_queues(&mut self, dt: Fixed, events: &mut TickEvents) {
        let mut finished = Vec::new();
        for tank in self.tanks.values_mut() {
            if tank.is_respawning() {
                continue;
            }
            match tank.build_queue.advance(dt) {
                Some(BuildStep::Progress { tile, kind, progress }) => events.push(GameEvent::BuildProgress {
                    tank: tank.id,
                    x: tile.x,
                    y: tile.y,
                    kind,
                    progress,
                }),
                Some(BuildStep::Complete(item)) => finished.push(item),
                None => {}
            }
        }
        for item in finished {
            self.complete_build(item, events);
        }
    }

    fn complete_build(&mut self, item: BuildItem, events: &mut TickEvents) {
        let BuildItem { owner, tile, kind, .. } = item;
        let mut changes = Vec::new();
        let mut wood_awarded = None;

        match kind {
            BuildKind::Harvest => {
                let forest = self.tiles.family(tile.x, tile.y, Layer::Decoration) == Some(TileFamily::Forest);
                let mut awarded = 0;
                if forest {
                    changes.extend(self.tiles.set_family(tile.x, tile.y, Layer::Decoration, TileFamily::Empty));
                    changes.extend(self.tiles.set_family(tile.x, tile.y, Layer::Ground, TileFamily::Grass));
                    if let Some(tank) = self.tanks.get_mut(&owner) {
                        awarded = tank.wood.deposit(self.rules.build.harvest_wood);
                    }
                }
                wood_awarded = Some(awarded);
            }
            BuildKind::Road | BuildKind::Wall => {
                let family = if kind == BuildKind::Road { TileFamily::Road } else { TileFamily::Wall };
                if self.tiles.family(tile.x, tile.y, Layer::Decoration) != Some(TileFamily::Empty) {
                    changes.extend(self.tiles.set_family(tile.x, tile.y, Layer::Decoration, TileFamily::Empty));
                }
                changes.extend(self.tiles.set_family(tile.x, tile.y, Layer::Ground, family));
            }
        }

        self.apply_tile_changes(changes, events);
        events.push(GameEvent::BuildComplete {
            tank: owner,
            x: tile.x,
            y: tile.y,
            kind,
            wood_awarded,
        });
    }

    fn check_victory(&mut self, dt: Fixed, events: &mut TickEvents) {
        match self.match_state {
            MatchState::Running => {
                if let Some(winner) = sole_owner(self.stations.values()) {
                    let reset_in = crate::clock::millis_to_fixed(self.rules.match_rules.reset_delay_ms);
                    self.match_state = MatchState::Over { winner, reset_in };
                    info!(?winner, tick = self.tick, "Match won");
                    events.push(GameEvent::GameWon { team: winner });
                }
            }
            MatchState::Over { winner, reset_in } => {
                let left = reset_in - dt;
                if left <= Fixed::ZERO {
                    self.reset_match();
                    events.push(GameEvent::MatchReset);
                } else {
                    self.match_state = MatchState::Over { winner, reset_in: left };
                }
            }
        }
    }

    /// Rebuild the map and respawn every connected tank on its team.
    pub fn reset_match(&mut self) {
        match self.map.tilemap() {
            Ok(tiles) => self.tiles = tiles,
            Err(err) => warn!(%err, "Map could not be rebuilt, keeping current terrain"),
        }
        self.spatial.clear();
        self.tile_bodies.clear();
        self.projectiles.clear();
        self.pickups.clear();
        self.pickup_bodies.clear();
        self.pillboxes.clear();
        self.stations.clear();
        self.pending_events.clear();
        self.populate_world();

        let roster: Vec<(EntityId, SessionId, Team)> =
            self.tanks.values().map(|t| (t.id, t.session, t.team)).collect();
        for (id, session, team) in roster {
            let position = self.entry_point(team);
            let mut tank = Tank::new(id, session, team, position, &self.rules);
            tank.body = Some(self.spatial.add_body(self.tank_body(id, position)));
            self.tanks.insert(id, tank);
        }
        self.match_state = MatchState::Running;
        info!(tick = self.tick, tanks = self.tanks.len(), "Match reset");
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Hash of the simulation state, for desync detection.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);

        self.tanks.len().hash(&mut hasher);
        for tank in self.tanks.values() {
            tank.id.hash(&mut hasher);
            tank.team.hash(&mut hasher);
            tank.position.x.to_bits().hash(&mut hasher);
            tank.position.y.to_bits().hash(&mut hasher);
            tank.heading.to_bits().hash(&mut hasher);
            tank.speed.to_bits().hash(&mut hasher);
            tank.health.current.hash(&mut hasher);
            tank.ammo.amount.hash(&mut hasher);
            tank.wood.amount.hash(&mut hasher);
            tank.steel.amount.hash(&mut hasher);
            tank.pillbox_count.hash(&mut hasher);
            tank.respawn_timer().to_bits().hash(&mut hasher);
            tank.build_queue.len().hash(&mut hasher);
        }

        self.projectiles.len().hash(&mut hasher);
        for projectile in self.projectiles.values() {
            projectile.id.hash(&mut hasher);
            projectile.owner.hash(&mut hasher);
            projectile.position.x.to_bits().hash(&mut hasher);
            projectile.position.y.to_bits().hash(&mut hasher);
            projectile.distance_traveled.to_bits().hash(&mut hasher);
        }

        self.pillboxes.len().hash(&mut hasher);
        for pillbox in self.pillboxes.values() {
            pillbox.id.hash(&mut hasher);
            pillbox.team.hash(&mut hasher);
            pillbox.phase().hash(&mut hasher);
            pillbox.health.current.hash(&mut hasher);
            pillbox.holder().hash(&mut hasher);
            if let Some(position) = pillbox.position() {
                position.x.to_bits().hash(&mut hasher);
                position.y.to_bits().hash(&mut hasher);
            }
        }

        for station in self.stations.values() {
            station.id.hash(&mut hasher);
            station.team.hash(&mut hasher);
        }

        for pickup in self.pickups.values() {
            pickup.id.hash(&mut hasher);
            pickup.value.hash(&mut hasher);
        }

        self.tiles.layer_values(Layer::Ground).hash(&mut hasher);
        self.tiles.layer_values(Layer::Decoration).hash(&mut hasher);
        hasher.finish()
    }
}
