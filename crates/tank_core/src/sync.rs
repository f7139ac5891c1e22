//! World snapshots and the deltas between them.
//!
//! After every tick the server captures a [`WorldSnapshot`] and diffs it
//! against the previous one. Entity collections are compared by id:
//! new ids are sent whole, vanished ids by id only, and surviving entities
//! as a list of the fields that changed. Terrain goes out as individual
//! tile changes. A [`SnapshotMirror`] applies deltas in order on top of a
//! full snapshot, the way a client holds the world.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::components::{EntityId, SessionId, Team};
use crate::error::{GameError, Result};
use crate::math::{Fixed, Vec2Fixed};
use crate::pillbox::PillboxPhase;
use crate::projectile::ProjectileOwner;
use crate::simulation::Simulation;
use crate::tilemap::{Layer, TileChange, TileCoord, TileIndex};

/// An entity view that can be diffed field by field.
pub trait Schema: Clone + PartialEq + Debug + Serialize + DeserializeOwned {
    /// One changed field with its new value.
    type Field: Clone + PartialEq + Debug + Serialize + DeserializeOwned;

    /// Entity id.
    fn id(&self) -> EntityId;

    /// Fields of `newer` that differ from `self`.
    fn diff(&self, newer: &Self) -> Vec<Self::Field>;

    /// Overwrite one field.
    fn apply(&mut self, field: Self::Field);
}

fn push_if_changed<T: PartialEq + Clone, F>(changes: &mut Vec<F>, old: &T, new: &T, wrap: impl FnOnce(T) -> F) {
    if old != new {
        changes.push(wrap(new.clone()));
    }
}

/// Client-visible tank state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankView {
    /// Entity id.
    pub id: EntityId,
    /// Owning session.
    pub session: SessionId,
    /// Team.
    pub team: Team,
    /// Position.
    pub position: Vec2Fixed,
    /// Facing.
    pub heading: Fixed,
    /// Forward speed.
    pub speed: Fixed,
    /// Hull points.
    pub health: u32,
    /// Shells.
    pub ammo: u32,
    /// Wood.
    pub wood: u32,
    /// Steel.
    pub steel: u32,
    /// Carried pillboxes.
    pub pillboxes: u32,
    /// Destroyed and waiting to respawn.
    pub respawning: bool,
    /// Tile being worked on, if any.
    pub building: Option<TileCoord>,
    /// Items in the build queue.
    pub queued: u32,
}

/// A changed [`TankView`] field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TankField {
    Team(Team),
    Position(Vec2Fixed),
    Heading(Fixed),
    Speed(Fixed),
    Health(u32),
    Ammo(u32),
    Wood(u32),
    Steel(u32),
    Pillboxes(u32),
    Respawning(bool),
    Building(Option<TileCoord>),
    Queued(u32),
}

impl Schema for TankView {
    type Field = TankField;

    fn id(&self) -> EntityId {
        self.id
    }

    fn diff(&self, newer: &Self) -> Vec<TankField> {
        let mut changes = Vec::new();
        push_if_changed(&mut changes, &self.team, &newer.team, TankField::Team);
        push_if_changed(&mut changes, &self.position, &newer.position, TankField::Position);
        push_if_changed(&mut changes, &self.heading, &newer.heading, TankField::Heading);
        push_if_changed(&mut changes, &self.speed, &newer.speed, TankField::Speed);
        push_if_changed(&mut changes, &self.health, &newer.health, TankField::Health);
        push_if_changed(&mut changes, &self.ammo, &newer.ammo, TankField::Ammo);
        push_if_changed(&mut changes, &self.wood, &newer.wood, TankField::Wood);
        push_if_changed(&mut changes, &self.steel, &newer.steel, TankField::Steel);
        push_if_changed(&mut changes, &self.pillboxes, &newer.pillboxes, TankField::Pillboxes);
        push_if_changed(&mut changes, &self.respawning, &newer.respawning, TankField::Respawning);
        push_if_changed(&mut changes, &self.building, &newer.building, TankField::Building);
        push_if_changed(&mut changes, &self.queued, &newer.queued, TankField::Queued);
        changes
    }

    fn apply(&mut self, field: TankField) {
        match field {
            TankField::Team(v) => self.team = v,
            TankField::Position(v) => self.position = v,
            TankField::Heading(v) => self.heading = v,
            TankField::Speed(v) => self.speed = v,
            TankField::Health(v) => self.health = v,
            TankField::Ammo(v) => self.ammo = v,
            TankField::Wood(v) => self.wood = v,
            TankField::Steel(v) => self.steel = v,
            TankField::Pillboxes(v) => self.pillboxes = v,
            TankField::Respawning(v) => self.respawning = v,
            TankField::Building(v) => self.building = v,
            TankField::Queued(v) => self.queued = v,
        }
    }
}

/// Client-visible shell state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectileView {
    /// Entity id.
    pub id: EntityId,
    /// Shooter.
    pub owner: ProjectileOwner,
    /// Team.
    pub team: Team,
    /// Position.
    pub position: Vec2Fixed,
    /// Direction of travel.
    pub heading: Fixed,
}

/// A changed [`ProjectileView`] field. Shells only ever move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ProjectileField {
    Position(Vec2Fixed),
}

impl Schema for ProjectileView {
    type Field = ProjectileField;

    fn id(&self) -> EntityId {
        self.id
    }

    fn diff(&self, newer: &Self) -> Vec<ProjectileField> {
        let mut changes = Vec::new();
        push_if_changed(&mut changes, &self.position, &newer.position, ProjectileField::Position);
        changes
    }

    fn apply(&mut self, field: ProjectileField) {
        match field {
            ProjectileField::Position(v) => self.position = v,
        }
    }
}

/// Client-visible pillbox state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillboxView {
    /// Entity id.
    pub id: EntityId,
    /// Team.
    pub team: Team,
    /// Lifecycle phase.
    pub phase: PillboxPhase,
    /// Position while on the ground.
    pub position: Option<Vec2Fixed>,
    /// Carrier while held.
    pub holder: Option<EntityId>,
    /// Health.
    pub health: u32,
}

/// A changed [`PillboxView`] field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum PillboxField {
    Team(Team),
    Phase(PillboxPhase),
    Position(Option<Vec2Fixed>),
    Holder(Option<EntityId>),
    Health(u32),
}

impl Schema for PillboxView {
    type Field = PillboxField;

    fn id(&self) -> EntityId {
        self.id
    }

    fn diff(&self, newer: &Self) -> Vec<PillboxField> {
        let mut changes = Vec::new();
        push_if_changed(&mut changes, &self.team, &newer.team, PillboxField::Team);
        push_if_changed(&mut changes, &self.phase, &newer.phase, PillboxField::Phase);
        push_if_changed(&mut changes, &self.position, &newer.position, PillboxField::Position);
        push_if_changed(&mut changes, &self.holder, &newer.holder, PillboxField::Holder);
        push_if_changed(&mut changes, &self.health, &newer.health, PillboxField::Health);
        changes
    }

    fn apply(&mut self, field: PillboxField) {
        match field {
            PillboxField::Team(v) => self.team = v,
            PillboxField::Phase(v) => self.phase = v,
            PillboxField::Position(v) => self.position = v,
            PillboxField::Holder(v) => self.holder = v,
            PillboxField::Health(v) => self.health = v,
        }
    }
}

/// Client-visible station state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationView {
    /// Entity id.
    pub id: EntityId,
    /// Position.
    pub position: Vec2Fixed,
    /// Owner.
    pub team: Team,
}

/// A changed [`StationView`] field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum StationField {
    Team(Team),
}

impl Schema for StationView {
    type Field = StationField;

    fn id(&self) -> EntityId {
        self.id
    }

    fn diff(&self, newer: &Self) -> Vec<StationField> {
        let mut changes = Vec::new();
        push_if_changed(&mut changes, &self.team, &newer.team, StationField::Team);
        changes
    }

    fn apply(&mut self, field: StationField) {
        match field {
            StationField::Team(v) => self.team = v,
        }
    }
}

/// Client-visible steel pickup. Pickups never change once dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupView {
    /// Entity id.
    pub id: EntityId,
    /// Position.
    pub position: Vec2Fixed,
    /// Steel it holds.
    pub value: u32,
}

/// Pickups have no mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickupField {}

impl Schema for PickupView {
    type Field = PickupField;

    fn id(&self) -> EntityId {
        self.id
    }

    fn diff(&self, _newer: &Self) -> Vec<PickupField> {
        Vec::new()
    }

    fn apply(&mut self, field: PickupField) {
        match field {}
    }
}

/// Both terrain layers, as raw tile indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileMapView {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Ground layer, row-major.
    pub ground: Vec<u16>,
    /// Decoration layer, row-major.
    pub decoration: Vec<u16>,
}

impl TileMapView {
    fn layer(&self, layer: Layer) -> &[u16] {
        match layer {
            Layer::Ground => &self.ground,
            Layer::Decoration => &self.decoration,
        }
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut Vec<u16> {
        match layer {
            Layer::Ground => &mut self.ground,
            Layer::Decoration => &mut self.decoration,
        }
    }

    /// Cells that differ between `self` and `newer`. Both must share dimensions.
    fn diff(&self, newer: &Self) -> Vec<TileChange> {
        let mut changes = Vec::new();
        for layer in [Layer::Ground, Layer::Decoration] {
            let old = self.layer(layer);
            let new = newer.layer(layer);
            for (i, (a, b)) in old.iter().zip(new).enumerate() {
                if a != b {
                    let i = i as u32;
                    changes.push(TileChange {
                        x: i % self.width,
                        y: i / self.width,
                        layer,
                        index: TileIndex(*b),
                    });
                }
            }
        }
        changes
    }

    fn apply(&mut self, change: &TileChange) -> Result<()> {
        if change.x >= self.width || change.y >= self.height {
            return Err(GameError::InvalidState(format!(
                "tile change ({}, {}) outside {}x{} map",
                change.x, change.y, self.width, self.height
            )));
        }
        let i = (change.y * self.width + change.x) as usize;
        if let Some(cell) = self.layer_mut(change.layer).get_mut(i) {
            *cell = change.index.0;
        }
        Ok(())
    }
}

/// Changes to one entity collection between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EntityChanges<S: Schema> {
    /// Entities that appeared, in full.
    pub added: Vec<S>,
    /// Entities that survived, with their changed fields.
    pub changed: Vec<(EntityId, Vec<S::Field>)>,
    /// Entities that disappeared.
    pub removed: Vec<EntityId>,
}

impl<S: Schema> Default for EntityChanges<S> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            changed: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<S: Schema> EntityChanges<S> {
    /// Compare two id-keyed collections.
    #[must_use]
    pub fn between(previous: &BTreeMap<EntityId, S>, current: &BTreeMap<EntityId, S>) -> Self {
        let mut changes = Self::default();
        for (id, state) in current {
            match previous.get(id) {
                None => changes.added.push(state.clone()),
                Some(prev) => {
                    let fields = prev.diff(state);
                    if !fields.is_empty() {
                        changes.changed.push((*id, fields));
                    }
                }
            }
        }
        changes.removed = previous.keys().filter(|id| !current.contains_key(id)).copied().collect();
        changes
    }

    /// True if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Apply to a collection. A field change for an unknown id is an error.
    pub fn apply_to(&self, collection: &mut BTreeMap<EntityId, S>) -> Result<()> {
        for id in &self.removed {
            collection.remove(id);
        }
        for state in &self.added {
            collection.insert(state.id(), state.clone());
        }
        for (id, fields) in &self.changed {
            let entry = collection.get_mut(id).ok_or(GameError::EntityNotFound(*id))?;
            for field in fields {
                entry.apply(field.clone());
            }
        }
        Ok(())
    }
}

/// Full client-visible state of the world after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Ticks completed.
    pub tick: u64,
    /// Tanks by id.
    pub tanks: BTreeMap<EntityId, TankView>,
    /// Shells by id.
    pub projectiles: BTreeMap<EntityId, ProjectileView>,
    /// Pillboxes by id.
    pub pillboxes: BTreeMap<EntityId, PillboxView>,
    /// Stations by id.
    pub stations: BTreeMap<EntityId, StationView>,
    /// Steel pickups by id.
    pub pickups: BTreeMap<EntityId, PickupView>,
    /// Terrain.
    pub tiles: TileMapView,
    /// Winner, once the match is over.
    pub winner: Option<Team>,
}

impl WorldSnapshot {
    /// Capture the client-visible state of a simulation.
    #[must_use]
    pub fn capture(sim: &Simulation) -> Self {
        let tanks = sim
            .tanks()
            .values()
            .map(|t| {
                let view = TankView {
                    id: t.id,
                    session: t.session,
                    team: t.team,
                    position: t.position,
                    heading: t.heading,
                    speed: t.speed,
                    health: t.health.current,
                    ammo: t.ammo.amount,
                    wood: t.wood.amount,
                    steel: t.steel.amount,
                    pillboxes: t.pillbox_count,
                    respawning: t.is_respawning(),
                    building: t.build_queue.current().map(|item| item.tile),
                    queued: t.build_queue.len() as u32,
                };
                (t.id, view)
            })
            .collect();
        let projectiles = sim
            .projectiles()
            .values()
            .map(|p| {
                let view = ProjectileView {
                    id: p.id,
                    owner: p.owner,
                    team: p.team,
                    position: p.position,
                    heading: p.heading,
                };
                (p.id, view)
            })
            .collect();
        let pillboxes = sim
            .pillboxes()
            .values()
            .map(|p| {
                let view = PillboxView {
                    id: p.id,
                    team: p.team,
                    phase: p.phase(),
                    position: p.position(),
                    holder: p.holder(),
                    health: p.health.current,
                };
                (p.id, view)
            })
            .collect();
        let stations = sim
            .stations()
            .values()
            .map(|s| {
                let view = StationView {
                    id: s.id,
                    position: s.position,
                    team: s.team,
                };
                (s.id, view)
            })
            .collect();
        let pickups = sim
            .pickups()
            .values()
            .map(|p| {
                let view = PickupView {
                    id: p.id,
                    position: p.position,
                    value: p.value,
                };
                (p.id, view)
            })
            .collect();
        let map = sim.tiles();
        Self {
            tick: sim.current_tick(),
            tanks,
            projectiles,
            pillboxes,
            stations,
            pickups,
            tiles: TileMapView {
                width: map.width(),
                height: map.height(),
                ground: map.layer_values(Layer::Ground),
                decoration: map.layer_values(Layer::Decoration),
            },
            winner: sim.winner(),
        }
    }

    /// Everything that changed between `self` and `newer`.
    #[must_use]
    pub fn diff(&self, newer: &Self) -> WorldDelta {
        WorldDelta {
            base_tick: self.tick,
            tick: newer.tick,
            tanks: EntityChanges::between(&self.tanks, &newer.tanks),
            projectiles: EntityChanges::between(&self.projectiles, &newer.projectiles),
            pillboxes: EntityChanges::between(&self.pillboxes, &newer.pillboxes),
            stations: EntityChanges::between(&self.stations, &newer.stations),
            pickups: EntityChanges::between(&self.pickups, &newer.pickups),
            tiles: self.tiles.diff(&newer.tiles),
            winner: (self.winner != newer.winner).then_some(newer.winner),
        }
    }

    /// Apply a delta computed against this snapshot's tick.
    pub fn apply(&mut self, delta: &WorldDelta) -> Result<()> {
        if delta.base_tick != self.tick {
            return Err(GameError::StaleDelta {
                base_tick: delta.base_tick,
                mirror_tick: self.tick,
            });
        }
        delta.tanks.apply_to(&mut self.tanks)?;
        delta.projectiles.apply_to(&mut self.projectiles)?;
        delta.pillboxes.apply_to(&mut self.pillboxes)?;
        delta.stations.apply_to(&mut self.stations)?;
        delta.pickups.apply_to(&mut self.pickups)?;
        for change in &delta.tiles {
            self.tiles.apply(change)?;
        }
        if let Some(winner) = delta.winner {
            self.winner = winner;
        }
        self.tick = delta.tick;
        Ok(())
    }

    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode bytes produced by [`WorldSnapshot::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Changes from one snapshot to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDelta {
    /// Tick of the snapshot this delta applies to.
    pub base_tick: u64,
    /// Tick of the snapshot it produces.
    pub tick: u64,
    /// Tank changes.
    pub tanks: EntityChanges<TankView>,
    /// Shell changes.
    pub projectiles: EntityChanges<ProjectileView>,
    /// Pillbox changes.
    pub pillboxes: EntityChanges<PillboxView>,
    /// Station changes.
    pub stations: EntityChanges<StationView>,
    /// Pickup changes.
    pub pickups: EntityChanges<PickupView>,
    /// Terrain changes.
    pub tiles: Vec<TileChange>,
    /// New game-over state, if it changed.
    pub winner: Option<Option<Team>>,
}

impl WorldDelta {
    /// True if applying this delta only advances the tick.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
            && self.projectiles.is_empty()
            && self.pillboxes.is_empty()
            && self.stations.is_empty()
            && self.pickups.is_empty()
            && self.tiles.is_empty()
            && self.winner.is_none()
    }
}

/// Read-only copy of the world kept up to date from snapshots and deltas.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMirror {
    snapshot: Option<WorldSnapshot>,
}

impl SnapshotMirror {
    /// An empty mirror waiting for its first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mirrored state with a full snapshot.
    pub fn load(&mut self, snapshot: WorldSnapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Apply the next delta.
    ///
    /// Returns `Ok(false)` for a delta that is not newer than the mirror
    /// (already applied), and [`GameError::StaleDelta`] when the delta was
    /// computed against a different tick. Nothing changes on error.
    pub fn apply(&mut self, delta: &WorldDelta) -> Result<bool> {
        let Some(current) = self.snapshot.as_mut() else {
            return Err(GameError::InvalidState("mirror has no snapshot yet".to_string()));
        };
        if delta.tick <= current.tick {
            return Ok(false);
        }
        if delta.base_tick != current.tick {
            return Err(GameError::StaleDelta {
                base_tick: delta.base_tick,
                mirror_tick: current.tick,
            });
        }
        let mut next = current.clone();
        next.apply(delta)?;
        *current = next;
        Ok(true)
    }

    /// Mirrored state.
    #[must_use]
    pub fn snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshot.as_ref()
    }

    /// Tick of the mirrored state.
    #[must_use]
    pub fn tick(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.tick)
    }
}
