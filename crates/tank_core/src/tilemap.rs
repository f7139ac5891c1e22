//! Two-layer auto-tiled terrain grid.
//!
//! Every cell stores a [`TileIndex`] that packs a [`TileFamily`] and a
//! four-bit adjacency mask (`family * 16 + mask`). All gameplay properties
//! derive from the family alone. Masks are recomputed for a tile and its
//! orthogonal neighbours whenever a tile changes, and a neighbour outside
//! the grid counts as matching.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::math::{Fixed, Vec2Fixed};

/// Mask bit set when the northern neighbour matches.
pub const NORTH: u8 = 1;
/// Mask bit set when the eastern neighbour matches.
pub const EAST: u8 = 2;
/// Mask bit set when the southern neighbour matches.
pub const SOUTH: u8 = 4;
/// Mask bit set when the western neighbour matches.
pub const WEST: u8 = 8;

const NEIGHBOURS: [(u8, i64, i64); 4] = [(NORTH, 0, -1), (EAST, 1, 0), (SOUTH, 0, 1), (WEST, -1, 0)];

/// Terrain layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    /// Base terrain.
    Ground,
    /// Vegetation drawn over the ground.
    Decoration,
}

/// Terrain family. Determines every derived property of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileFamily {
    /// Nothing (empty decoration cell).
    Empty = 0,
    /// Open ground.
    Grass = 1,
    /// Impassable for construction, slow to cross.
    Water = 2,
    /// Fast ground.
    Road = 3,
    /// Left behind when a wall is shot.
    Crater = 4,
    /// Harvestable vegetation.
    Forest = 5,
    /// Solid wall.
    Wall = 6,
}

/// Properties looked up from a tile's family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileProperties {
    /// Blocks movement and stops projectiles.
    pub has_collision: bool,
    /// Movement speed multiplier in percent.
    pub speed_percent: u32,
    /// Layer this family lives on.
    pub layer: Layer,
    /// Mask follows matching neighbours.
    pub affected_by_neighbors: bool,
    /// Roads and walls may be built on this ground.
    pub buildable: bool,
}

impl TileFamily {
    /// Decode a family from its numeric id.
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0 => Self::Empty,
            1 => Self::Grass,
            2 => Self::Water,
            3 => Self::Road,
            4 => Self::Crater,
            5 => Self::Forest,
            6 => Self::Wall,
            _ => return None,
        })
    }

    /// Gameplay properties of this family.
    #[must_use]
    pub fn properties(self) -> TileProperties {
        let (has_collision, speed_percent, layer, affected_by_neighbors, buildable) = match self {
            Self::Empty => (false, 100, Layer::Decoration, false, false),
            Self::Grass => (false, 100, Layer::Ground, false, true),
            Self::Water => (false, 40, Layer::Ground, true, false),
            Self::Road => (false, 125, Layer::Ground, true, true),
            Self::Crater => (false, 60, Layer::Ground, false, true),
            Self::Forest => (false, 50, Layer::Decoration, true, false),
            Self::Wall => (true, 0, Layer::Ground, true, false),
        };
        TileProperties {
            has_collision,
            speed_percent,
            layer,
            affected_by_neighbors,
            buildable,
        }
    }
}

/// Packed `family * 16 + mask` tile value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileIndex(pub u16);

impl TileIndex {
    /// Empty decoration cell.
    pub const EMPTY: Self = Self(0);

    /// Pack a family and mask.
    #[must_use]
    pub fn new(family: TileFamily, mask: u8) -> Self {
        Self(u16::from(family as u8) * 16 + u16::from(mask & 0x0f))
    }

    /// Family of this tile; unknown ids decode as `Empty`.
    #[must_use]
    pub fn family(self) -> TileFamily {
        TileFamily::from_id(self.0 / 16).unwrap_or(TileFamily::Empty)
    }

    /// Adjacency mask.
    #[must_use]
    pub fn mask(self) -> u8 {
        (self.0 % 16) as u8
    }

    /// Properties of this tile's family.
    #[must_use]
    pub fn properties(self) -> TileProperties {
        self.family().properties()
    }
}

/// Grid coordinate of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl TileCoord {
    /// Construct a coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// One changed cell, as broadcast to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileChange {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Layer that changed.
    pub layer: Layer,
    /// New value.
    pub index: TileIndex,
}

/// The terrain grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMap {
    width: u32,
    height: u32,
    ground: Vec<TileIndex>,
    decoration: Vec<TileIndex>,
}

impl TileMap {
    /// An all-grass map with an empty decoration layer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let cells = (width * height) as usize;
        Self {
            width,
            height,
            ground: vec![TileIndex::new(TileFamily::Grass, 0); cells],
            decoration: vec![TileIndex::EMPTY; cells],
        }
    }

    /// Build a map from raw layer data and recompute every adjacency mask.
    pub fn from_layers(width: u32, height: u32, ground: &[u16], decoration: &[u16]) -> Result<Self> {
        let cells = (width as usize) * (height as usize);
        if width == 0 || height == 0 || ground.len() != cells || decoration.len() != cells {
            return Err(GameError::InvalidState(format!(
                "tile layers do not match {width}x{height}"
            )));
        }
        let mut map = Self {
            width,
            height,
            ground: ground.iter().map(|&i| TileIndex(i)).collect(),
            decoration: decoration.iter().map(|&i| TileIndex(i)).collect(),
        };
        for y in 0..height {
            for x in 0..width {
                map.refresh_mask(x, y, Layer::Ground);
                map.refresh_mask(x, y, Layer::Decoration);
            }
        }
        Ok(map)
    }

    /// Width in tiles.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in tiles.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// True if `(x, y)` lies on the grid.
    #[must_use]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| (y * self.width + x) as usize)
    }

    fn layer(&self, layer: Layer) -> &[TileIndex] {
        match layer {
            Layer::Ground => &self.ground,
            Layer::Decoration => &self.decoration,
        }
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut Vec<TileIndex> {
        match layer {
            Layer::Ground => &mut self.ground,
            Layer::Decoration => &mut self.decoration,
        }
    }

    /// Tile value at a cell.
    #[must_use]
    pub fn get(&self, x: u32, y: u32, layer: Layer) -> Option<TileIndex> {
        self.offset(x, y).map(|i| self.layer(layer)[i])
    }

    /// Family at a cell, if in bounds.
    #[must_use]
    pub fn family(&self, x: u32, y: u32, layer: Layer) -> Option<TileFamily> {
        self.get(x, y, layer).map(TileIndex::family)
    }

    /// Raw layer values in row-major order.
    #[must_use]
    pub fn layer_values(&self, layer: Layer) -> Vec<u16> {
        self.layer(layer).iter().map(|t| t.0).collect()
    }

    /// True if either layer at the cell blocks movement. Out of bounds is solid.
    #[must_use]
    pub fn has_collision(&self, x: u32, y: u32) -> bool {
        match (self.get(x, y, Layer::Ground), self.get(x, y, Layer::Decoration)) {
            (Some(g), Some(d)) => g.properties().has_collision || d.properties().has_collision,
            _ => true,
        }
    }

    /// True if the ground at the cell is water.
    #[must_use]
    pub fn is_water(&self, x: u32, y: u32) -> bool {
        self.family(x, y, Layer::Ground) == Some(TileFamily::Water)
    }

    /// Movement multiplier in percent. Decoration overrides the ground.
    #[must_use]
    pub fn speed_percent(&self, x: u32, y: u32) -> u32 {
        match self.get(x, y, Layer::Decoration) {
            Some(d) if d.family() != TileFamily::Empty => d.properties().speed_percent,
            Some(_) => self
                .get(x, y, Layer::Ground)
                .map_or(100, |g| g.properties().speed_percent),
            None => 100,
        }
    }

    /// Tile containing a world position.
    #[must_use]
    pub fn world_to_tile(&self, position: Vec2Fixed, tile_size: Fixed) -> Option<TileCoord> {
        if position.x < Fixed::ZERO || position.y < Fixed::ZERO {
            return None;
        }
        let x: i64 = (position.x / tile_size).floor().to_num();
        let y: i64 = (position.y / tile_size).floor().to_num();
        self.in_bounds(x, y)
            .then(|| TileCoord::new(x as u32, y as u32))
    }

    /// Speed multiplier at a world position as a fixed-point fraction.
    #[must_use]
    pub fn speed_multiplier_at(&self, position: Vec2Fixed, tile_size: Fixed) -> Fixed {
        let percent = self
            .world_to_tile(position, tile_size)
            .map_or(100, |c| self.speed_percent(c.x, c.y));
        Fixed::from_num(percent) / Fixed::from_num(100)
    }

    /// World position of a tile's centre.
    #[must_use]
    pub fn tile_center(coord: TileCoord, tile_size: Fixed) -> Vec2Fixed {
        let half = tile_size / Fixed::from_num(2);
        Vec2Fixed::new(
            Fixed::from_num(coord.x) * tile_size + half,
            Fixed::from_num(coord.y) * tile_size + half,
        )
    }

    /// Map extent in world units.
    #[must_use]
    pub fn world_size(&self, tile_size: Fixed) -> Vec2Fixed {
        Vec2Fixed::new(
            Fixed::from_num(self.width) * tile_size,
            Fixed::from_num(self.height) * tile_size,
        )
    }

    /// Replace a cell with `family`, recomputing masks around it.
    ///
    /// Returns every cell whose stored value changed.
    pub fn set_family(&mut self, x: u32, y: u32, layer: Layer, family: TileFamily) -> Vec<TileChange> {
        self.set_tile(x, y, layer, TileIndex::new(family, 0))
    }

    /// Write a raw tile value, then recompute the masks of the cell (if its
    /// family follows neighbours) and of its four neighbours.
    ///
    /// A family that ignores neighbours keeps the mask it was written with.
    pub fn set_tile(&mut self, x: u32, y: u32, layer: Layer, index: TileIndex) -> Vec<TileChange> {
        let Some(offset) = self.offset(x, y) else {
            return Vec::new();
        };
        let mut changes = Vec::new();
        let before = self.layer(layer)[offset];
        self.layer_mut(layer)[offset] = index;
        self.refresh_mask(x, y, layer);
        let after = self.layer(layer)[offset];
        if after != before {
            changes.push(TileChange { x, y, layer, index: after });
        }

        for &(_, dx, dy) in &NEIGHBOURS {
            let nx = i64::from(x) + dx;
            let ny = i64::from(y) + dy;
            if !self.in_bounds(nx, ny) {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if let Some(change) = self.refresh_mask(nx, ny, layer) {
                changes.push(change);
            }
        }
        changes
    }

    /// Recompute one cell's mask. Returns the change if the value moved.
    fn refresh_mask(&mut self, x: u32, y: u32, layer: Layer) -> Option<TileChange> {
        let offset = self.offset(x, y)?;
        let current = self.layer(layer)[offset];
        let family = current.family();
        if !family.properties().affected_by_neighbors {
            return None;
        }
        let updated = TileIndex::new(family, self.neighbour_mask(x, y, layer, family));
        if updated == current {
            return None;
        }
        self.layer_mut(layer)[offset] = updated;
        Some(TileChange {
            x,
            y,
            layer,
            index: updated,
        })
    }

    /// Adjacency mask of `family` at a cell. Out-of-bounds counts as a match.
    #[must_use]
    pub fn neighbour_mask(&self, x: u32, y: u32, layer: Layer, family: TileFamily) -> u8 {
        let mut mask = 0;
        for &(bit, dx, dy) in &NEIGHBOURS {
            let nx = i64::from(x) + dx;
            let ny = i64::from(y) + dy;
            let matches = if self.in_bounds(nx, ny) {
                self.family(nx as u32, ny as u32, layer) == Some(family)
            } else {
                true
            };
            if matches {
                mask |= bit;
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_packing() {
        let index = TileIndex::new(TileFamily::Wall, EAST | SOUTH);
        assert_eq!(index.0, 6 * 16 + 6);
        assert_eq!(index.family(), TileFamily::Wall);
        assert_eq!(index.mask(), EAST | SOUTH);
        assert!(index.properties().has_collision);
    }

    #[test]
    fn test_edges_count_as_matching() {
        let mut map = TileMap::new(3, 3);
        map.set_family(0, 0, Layer::Ground, TileFamily::Wall);
        // North and west are off-grid, east and south are grass.
        let tile = map.get(0, 0, Layer::Ground).unwrap();
        assert_eq!(tile.mask(), NORTH | WEST);
    }

    #[test]
    fn test_set_tile_updates_neighbours() {
        let mut map = TileMap::new(3, 3);
        map.set_family(1, 1, Layer::Ground, TileFamily::Wall);
        let changes = map.set_family(2, 1, Layer::Ground, TileFamily::Wall);

        assert_eq!(map.get(1, 1, Layer::Ground).unwrap().mask(), EAST);
        // (2,1) sits on the east edge: east off-grid plus west neighbour.
        assert_eq!(map.get(2, 1, Layer::Ground).unwrap().mask(), EAST | WEST);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_crater_keeps_wall_mask() {
        let mut map = TileMap::new(4, 1);
        map.set_family(1, 0, Layer::Ground, TileFamily::Wall);
        map.set_family(2, 0, Layer::Ground, TileFamily::Wall);
        let wall = map.get(1, 0, Layer::Ground).unwrap();

        let changes = map.set_tile(1, 0, Layer::Ground, TileIndex::new(TileFamily::Crater, wall.mask()));
        let crater = map.get(1, 0, Layer::Ground).unwrap();
        assert_eq!(crater.family(), TileFamily::Crater);
        assert_eq!(crater.mask(), wall.mask());
        // Neighbouring wall lost its western match.
        let neighbour = map.get(2, 0, Layer::Ground).unwrap();
        assert_eq!(neighbour.mask() & WEST, 0);
        assert!(changes.iter().any(|c| c.x == 2));
        assert!(!map.has_collision(1, 0));
    }

    #[test]
    fn test_from_layers_recomputes_masks() {
        let wall = TileIndex::new(TileFamily::Wall, 0).0;
        let grass = TileIndex::new(TileFamily::Grass, 0).0;
        let map = TileMap::from_layers(2, 1, &[wall, wall], &[0, 0]).unwrap();
        assert_eq!(map.get(0, 0, Layer::Ground).unwrap().mask(), NORTH | EAST | SOUTH | WEST);
        assert!(TileMap::from_layers(2, 1, &[grass], &[0, 0]).is_err());
    }

    #[test]
    fn test_world_to_tile_and_speed() {
        let mut map = TileMap::new(4, 4);
        map.set_family(1, 2, Layer::Decoration, TileFamily::Forest);
        let size = Fixed::from_num(32);
        let pos = Vec2Fixed::from_int(40, 70);
        assert_eq!(map.world_to_tile(pos, size), Some(TileCoord::new(1, 2)));
        assert_eq!(map.speed_multiplier_at(pos, size), Fixed::from_num(1) / Fixed::from_num(2));
        assert_eq!(map.world_to_tile(Vec2Fixed::from_int(-1, 0), size), None);
        assert_eq!(map.world_to_tile(Vec2Fixed::from_int(128, 0), size), None);
    }

    #[test]
    fn test_out_of_bounds_is_solid() {
        let map = TileMap::new(2, 2);
        assert!(map.has_collision(5, 0));
        assert!(!map.has_collision(1, 1));
    }
}
