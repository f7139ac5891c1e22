//! Map descriptions.

use serde::{Deserialize, Serialize};

use crate::components::Team;
use crate::error::{GameError, Result};
use crate::tilemap::{TileFamily, TileIndex, TileMap};

/// A station placed by the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSpawn {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Initial owner.
    #[serde(default)]
    pub team: Team,
}

/// A pillbox placed by the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillboxSpawn {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Initial owner.
    #[serde(default)]
    pub team: Team,
}

/// Where a team's tanks enter the map when it owns no station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// Tile column.
    pub x: u32,
    /// Tile row.
    pub y: u32,
    /// Team using this spawn.
    pub team: Team,
}

/// Complete description of a map.
///
/// Layers are row-major tile indices (`family * 16 + mask`). Masks in the
/// file are ignored; they are recomputed when the map is loaded.
///
/// # Example RON
///
/// ```ron
/// MapData(
///     name: "duel",
///     width: 2,
///     height: 1,
///     ground: [16, 16],
///     decoration: [0, 80],
///     stations: [(x: 0, y: 0, team: Red)],
///     pillboxes: [],
///     spawns: [],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapData {
    /// Display name.
    pub name: String,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Ground layer.
    pub ground: Vec<u16>,
    /// Decoration layer.
    pub decoration: Vec<u16>,
    /// Stations.
    #[serde(default)]
    pub stations: Vec<StationSpawn>,
    /// Pillboxes.
    #[serde(default)]
    pub pillboxes: Vec<PillboxSpawn>,
    /// Fallback spawn points.
    #[serde(default)]
    pub spawns: Vec<SpawnPoint>,
}

impl MapData {
    /// An all-grass map with nothing on it.
    #[must_use]
    pub fn open_field(name: &str, width: u32, height: u32) -> Self {
        let cells = (width * height) as usize;
        Self {
            name: name.to_string(),
            width,
            height,
            ground: vec![TileIndex::new(TileFamily::Grass, 0).0; cells],
            decoration: vec![TileIndex::EMPTY.0; cells],
            stations: Vec::new(),
            pillboxes: Vec::new(),
            spawns: Vec::new(),
        }
    }

    /// The built-in map used when no map file is available.
    ///
    /// A walled 32x24 arena split by a river with a road bridge, two forests,
    /// one home station per team and two neutral stations guarded by
    /// neutral pillboxes.
    #[must_use]
    pub fn default_arena() -> Self {
        let mut map = Self::open_field("arena", 32, 24);

        for x in 0..map.width {
            map.paint(x, 0, TileFamily::Wall);
            map.paint(x, map.height - 1, TileFamily::Wall);
        }
        for y in 0..map.height {
            map.paint(0, y, TileFamily::Wall);
            map.paint(map.width - 1, y, TileFamily::Wall);
        }
        for y in 3..21 {
            map.paint(15, y, TileFamily::Water);
            map.paint(16, y, TileFamily::Water);
        }
        for x in 1..31 {
            map.paint(x, 11, TileFamily::Road);
            map.paint(x, 12, TileFamily::Road);
        }
        for y in 4..8 {
            for x in 5..9 {
                map.paint(x, y, TileFamily::Forest);
                map.paint(x + 18, y + 12, TileFamily::Forest);
            }
        }
        for x in 10..13 {
            map.paint(x, 17, TileFamily::Wall);
            map.paint(x + 9, 6, TileFamily::Wall);
        }

        map.stations = vec![
            StationSpawn { x: 3, y: 3, team: Team::Red },
            StationSpawn { x: 28, y: 20, team: Team::Blue },
            StationSpawn { x: 8, y: 19, team: Team::Neutral },
            StationSpawn { x: 23, y: 4, team: Team::Neutral },
        ];
        map.pillboxes = vec![
            PillboxSpawn { x: 10, y: 19, team: Team::Neutral },
            PillboxSpawn { x: 21, y: 4, team: Team::Neutral },
        ];
        map.spawns = vec![
            SpawnPoint { x: 3, y: 5, team: Team::Red },
            SpawnPoint { x: 28, y: 18, team: Team::Blue },
        ];
        map
    }

    /// Overwrite one cell with `family` on the family's own layer.
    ///
    /// Out-of-range cells are ignored.
    pub fn paint(&mut self, x: u32, y: u32, family: TileFamily) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y * self.width + x) as usize;
        let value = TileIndex::new(family, 0).0;
        match family.properties().layer {
            crate::tilemap::Layer::Ground => self.ground[i] = value,
            crate::tilemap::Layer::Decoration => self.decoration[i] = value,
        }
    }

    /// Check structural consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| GameError::InvalidMap {
            name: self.name.clone(),
            reason,
        };
        if self.width == 0 || self.height == 0 {
            return Err(invalid("map has no tiles".into()));
        }
        let cells = (self.width as usize) * (self.height as usize);
        if self.ground.len() != cells || self.decoration.len() != cells {
            return Err(invalid(format!(
                "layers hold {}/{} tiles, expected {cells}",
                self.ground.len(),
                self.decoration.len()
            )));
        }
        if let Some(bad) = self
            .ground
            .iter()
            .chain(&self.decoration)
            .find(|&&i| TileFamily::from_id(i / 16).is_none())
        {
            return Err(invalid(format!("unknown tile index {bad}")));
        }
        let places = self
            .stations
            .iter()
            .map(|s| (s.x, s.y))
            .chain(self.pillboxes.iter().map(|p| (p.x, p.y)))
            .chain(self.spawns.iter().map(|s| (s.x, s.y)));
        for (x, y) in places {
            if x >= self.width || y >= self.height {
                return Err(invalid(format!("object at ({x}, {y}) is off the map")));
            }
        }
        Ok(())
    }

    /// Validate and build the terrain grid.
    pub fn tilemap(&self) -> Result<TileMap> {
        self.validate()?;
        TileMap::from_layers(self.width, self.height, &self.ground, &self.decoration)
    }
}
