//! Events produced by a tick and outcomes of player commands.

use serde::{Deserialize, Serialize};

use crate::build_queue::BuildKind;
use crate::components::{EntityId, Team};
use crate::math::Fixed;
use crate::projectile::ProjectileOwner;
use crate::tilemap::{Layer, TileIndex};

/// Something clients should hear about, broadcast after the tick it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// A tile value changed.
    TileChanged {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Layer.
        layer: Layer,
        /// New value.
        index: TileIndex,
    },
    /// The head of a build queue moved forward.
    BuildProgress {
        /// Builder.
        tank: EntityId,
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Kind of work.
        kind: BuildKind,
        /// Completion fraction.
        progress: Fixed,
    },
    /// A build item finished.
    BuildComplete {
        /// Builder.
        tank: EntityId,
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Kind of work.
        kind: BuildKind,
        /// Wood paid out, for harvests.
        wood_awarded: Option<u32>,
    },
    /// A station changed hands.
    StationCaptured {
        /// Station.
        station: EntityId,
        /// New owner.
        team: Team,
        /// Previous owner.
        previous: Team,
    },
    /// A placed pillbox was knocked out.
    PillboxDestroyed {
        /// Pillbox.
        pillbox: EntityId,
        /// Shooter.
        by: ProjectileOwner,
    },
    /// A tank collected a pillbox.
    PillboxPickedUp {
        /// Pillbox.
        pillbox: EntityId,
        /// Tank.
        tank: EntityId,
    },
    /// A tank put down a pillbox.
    PillboxPlaced {
        /// Pillbox.
        pillbox: EntityId,
        /// Tank.
        tank: EntityId,
        /// Team it now fights for.
        team: Team,
    },
    /// A tank spent steel on a new pillbox.
    PillboxBuilt {
        /// Pillbox.
        pillbox: EntityId,
        /// Tank.
        tank: EntityId,
    },
    /// A tank was destroyed.
    TankDestroyed {
        /// Victim.
        tank: EntityId,
        /// Shooter.
        by: ProjectileOwner,
    },
    /// A tank came back.
    TankRespawned {
        /// Tank.
        tank: EntityId,
    },
    /// A tank picked up steel.
    SteelCollected {
        /// Tank.
        tank: EntityId,
        /// Steel gained.
        amount: u32,
    },
    /// One team holds every station.
    GameWon {
        /// Winner.
        team: Team,
    },
    /// The match restarted.
    MatchReset,
}

/// Everything a tick produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Tick number the events belong to.
    pub tick: u64,
    /// Events in the order they happened.
    pub events: Vec<GameEvent>,
}

impl TickEvents {
    /// Record an event.
    pub fn push(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    /// Check if the tick was quiet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Why a command was refused. Refusals are normal gameplay, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// Not enough wood.
    InsufficientWood,
    /// Not enough steel.
    InsufficientSteel,
    /// Build queue cannot take the items.
    QueueFull,
    /// Selection is too far from the tank.
    OutOfRange,
    /// Selection is not a 2x2 block on the map.
    InvalidSelection,
    /// Terrain forbids this work.
    BlockedTerrain,
    /// Harvest selection contains no forest.
    NoForest,
    /// Nothing left to change on the selection.
    NothingToBuild,
    /// No pillbox is being carried.
    NoPillbox,
    /// The tank is respawning.
    TankRespawning,
    /// No queued item at that index.
    UnknownBuildItem,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientWood => write!(f, "Not enough wood"),
            Self::InsufficientSteel => write!(f, "Not enough steel"),
            Self::QueueFull => write!(f, "Build queue is full"),
            Self::OutOfRange => write!(f, "Too far away"),
            Self::InvalidSelection => write!(f, "Select a 2x2 area"),
            Self::BlockedTerrain => write!(f, "Cannot build there"),
            Self::NoForest => write!(f, "No forest to harvest"),
            Self::NothingToBuild => write!(f, "Nothing to build"),
            Self::NoPillbox => write!(f, "No pillbox carried"),
            Self::TankRespawning => write!(f, "Tank is respawning"),
            Self::UnknownBuildItem => write!(f, "No such build item"),
        }
    }
}

/// Result of a player command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command took effect.
    Accepted,
    /// The command was refused and changed nothing.
    Rejected(Rejection),
}

impl CommandOutcome {
    /// Check if the command took effect.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}
