//! Physics-world seam.
//!
//! The simulation only talks to physics through [`SpatialWorld`]: it adds
//! and removes bodies, sets velocities and collision filters, steps the
//! world once per tick and reads back the collision-begin events.
//!
//! [`GridSpatialWorld`] is the built-in backend. Dynamic bodies integrate
//! their velocity (displacement per step) and are pushed out of solid
//! static bodies. Static bodies are bucketed in a uniform grid so the
//! broadphase only visits nearby cells. Begin events are reported once per
//! new contact, sorted by body-handle pair, which makes the processing order
//! depend only on body creation order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::components::EntityId;
use crate::math::{fixed_sqrt, Fixed, Vec2Fixed};
use crate::tilemap::TileCoord;

/// Collision categories.
pub mod category {
    /// Terrain with collision.
    pub const WALL: u32 = 1;
    /// Tanks.
    pub const PLAYER: u32 = 1 << 1;
    /// Shells.
    pub const PROJECTILE: u32 = 1 << 2;
    /// Pillboxes, placed or lying on the ground.
    pub const PILLBOX: u32 = 1 << 3;
    /// Refuelling stations.
    pub const STATION: u32 = 1 << 4;
    /// Dropped steel.
    pub const PICKUP: u32 = 1 << 5;
}

/// Opaque handle of a body inside a [`SpatialWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyHandle(pub u32);

/// What a body stands for in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BodyTag {
    /// A tank.
    Tank(EntityId),
    /// A projectile.
    Projectile(EntityId),
    /// A pillbox.
    Pillbox(EntityId),
    /// A station.
    Station(EntityId),
    /// A steel pickup.
    Pickup(EntityId),
    /// A solid terrain tile.
    Tile(TileCoord),
}

/// Collider shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Circle centred on the body position.
    Circle {
        /// Radius.
        radius: Fixed,
    },
    /// Axis-aligned rectangle centred on the body position.
    Rect {
        /// Half of the width.
        half_width: Fixed,
        /// Half of the height.
        half_height: Fixed,
    },
}

impl Shape {
    /// Circle of the given radius.
    #[must_use]
    pub fn circle(radius: Fixed) -> Self {
        Self::Circle { radius }
    }

    /// Square with the given edge length.
    #[must_use]
    pub fn square(size: Fixed) -> Self {
        let half = size / Fixed::from_num(2);
        Self::Rect {
            half_width: half,
            half_height: half,
        }
    }

    fn half_extents(self) -> Vec2Fixed {
        match self {
            Self::Circle { radius } => Vec2Fixed::new(radius, radius),
            Self::Rect {
                half_width,
                half_height,
            } => Vec2Fixed::new(half_width, half_height),
        }
    }
}

/// Category/mask pair. Two bodies interact only if each one's category is
/// in the other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollisionFilter {
    /// What this body is.
    pub category: u32,
    /// What this body collides with.
    pub mask: u32,
}

impl CollisionFilter {
    /// Collides with nothing.
    pub const NONE: Self = Self {
        category: 0,
        mask: 0,
    };

    /// Construct a filter.
    #[must_use]
    pub const fn new(category: u32, mask: u32) -> Self {
        Self { category, mask }
    }

    /// True when the two filters accept each other.
    #[must_use]
    pub const fn interacts(self, other: Self) -> bool {
        self.category & other.mask != 0 && other.category & self.mask != 0
    }
}

/// Everything needed to create a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyDesc {
    /// Owning entity.
    pub tag: BodyTag,
    /// Collider.
    pub shape: Shape,
    /// Initial position.
    pub position: Vec2Fixed,
    /// Collision filter.
    pub filter: CollisionFilter,
    /// Never moves; pushes dynamic bodies out.
    pub is_static: bool,
    /// Reports contacts but never pushes or is pushed.
    pub is_sensor: bool,
}

/// A live body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Body {
    /// Owning entity.
    pub tag: BodyTag,
    /// Collider.
    pub shape: Shape,
    /// Current position.
    pub position: Vec2Fixed,
    /// Displacement applied on every step.
    pub velocity: Vec2Fixed,
    /// Collision filter.
    pub filter: CollisionFilter,
    /// Static flag.
    pub is_static: bool,
    /// Sensor flag.
    pub is_sensor: bool,
}

impl From<BodyDesc> for Body {
    fn from(desc: BodyDesc) -> Self {
        Self {
            tag: desc.tag,
            shape: desc.shape,
            position: desc.position,
            velocity: Vec2Fixed::ZERO,
            filter: desc.filter,
            is_static: desc.is_static,
            is_sensor: desc.is_sensor,
        }
    }
}

/// Two bodies started touching during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEvent {
    /// Body with the lower handle.
    pub a: BodyTag,
    /// Body with the higher handle.
    pub b: BodyTag,
}

impl CollisionEvent {
    /// Construct an event.
    #[must_use]
    pub const fn new(a: BodyTag, b: BodyTag) -> Self {
        Self { a, b }
    }
}

/// The physics collaborator used by the simulation.
pub trait SpatialWorld: Send + std::fmt::Debug {
    /// Add a body and return its handle.
    fn add_body(&mut self, desc: BodyDesc) -> BodyHandle;

    /// Remove a body. Returns false if the handle was unknown.
    fn remove_body(&mut self, handle: BodyHandle) -> bool;

    /// Set the per-step displacement of a dynamic body.
    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2Fixed);

    /// Teleport a body.
    fn set_position(&mut self, handle: BodyHandle, position: Vec2Fixed);

    /// Replace a body's collision filter.
    fn set_filter(&mut self, handle: BodyHandle, filter: CollisionFilter);

    /// Inspect a body.
    fn body(&self, handle: BodyHandle) -> Option<&Body>;

    /// Advance one step and return the contacts that began during it.
    fn step(&mut self) -> Vec<CollisionEvent>;

    /// Remove every body.
    fn clear(&mut self);

    /// Number of live bodies.
    fn body_count(&self) -> usize;
}

type Cell = (i64, i64);

/// Uniform-grid backend for [`SpatialWorld`].
#[derive(Debug, Clone)]
pub struct GridSpatialWorld {
    cell_size: Fixed,
    bodies: BTreeMap<BodyHandle, Body>,
    next_handle: u32,
    static_cells: HashMap<Cell, Vec<BodyHandle>>,
    contacts: BTreeSet<(BodyHandle, BodyHandle)>,
}

impl Default for GridSpatialWorld {
    fn default() -> Self {
        Self::new(Fixed::from_num(64))
    }
}

impl GridSpatialWorld {
    /// Create an empty world bucketing static bodies into `cell_size` cells.
    #[must_use]
    pub fn new(cell_size: Fixed) -> Self {
        let cell_size = if cell_size > Fixed::ZERO {
            cell_size
        } else {
            Fixed::from_num(64)
        };
        Self {
            cell_size,
            bodies: BTreeMap::new(),
            next_handle: 0,
            static_cells: HashMap::new(),
            contacts: BTreeSet::new(),
        }
    }

    fn cell_of(&self, x: Fixed, y: Fixed) -> Cell {
        (
            (x / self.cell_size).floor().to_num(),
            (y / self.cell_size).floor().to_num(),
        )
    }

    /// Cells overlapped by a body's bounding box.
    fn cells_for(&self, position: Vec2Fixed, shape: Shape) -> Vec<Cell> {
        let half = shape.half_extents();
        let (x0, y0) = self.cell_of(position.x - half.x, position.y - half.y);
        let (x1, y1) = self.cell_of(position.x + half.x, position.y + half.y);
        let mut cells = Vec::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                cells.push((cx, cy));
            }
        }
        cells
    }

    fn index_static(&mut self, handle: BodyHandle, body: &Body) {
        for cell in self.cells_for(body.position, body.shape) {
            self.static_cells.entry(cell).or_default().push(handle);
        }
    }

    fn unindex_static(&mut self, handle: BodyHandle, body: &Body) {
        for cell in self.cells_for(body.position, body.shape) {
            if let Some(entries) = self.static_cells.get_mut(&cell) {
                entries.retain(|&h| h != handle);
                if entries.is_empty() {
                    self.static_cells.remove(&cell);
                }
            }
        }
    }

    /// Static bodies whose cells overlap `body`, in handle order.
    fn static_candidates(&self, body: &Body) -> BTreeSet<BodyHandle> {
        self.cells_for(body.position, body.shape)
            .into_iter()
            .filter_map(|cell| self.static_cells.get(&cell))
            .flatten()
            .copied()
            .collect()
    }

    fn pair(a: BodyHandle, b: BodyHandle) -> (BodyHandle, BodyHandle) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl SpatialWorld for GridSpatialWorld {
    fn add_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        let body = Body::from(desc);
        if body.is_static {
            self.index_static(handle, &body);
        }
        self.bodies.insert(handle, body);
        handle
    }

    fn remove_body(&mut self, handle: BodyHandle) -> bool {
        let Some(body) = self.bodies.remove(&handle) else {
            return false;
        };
        if body.is_static {
            self.unindex_static(handle, &body);
        }
        self.contacts.retain(|&(a, b)| a != handle && b != handle);
        true
    }

    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2Fixed) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            if !body.is_static {
                body.velocity = velocity;
            }
        }
    }

    fn set_position(&mut self, handle: BodyHandle, position: Vec2Fixed) {
        let Some(body) = self.bodies.get(&handle).copied() else {
            return;
        };
        if body.is_static {
            self.unindex_static(handle, &body);
        }
        let moved = Body { position, ..body };
        if moved.is_static {
            self.index_static(handle, &moved);
        }
        self.bodies.insert(handle, moved);
    }

    fn set_filter(&mut self, handle: BodyHandle, filter: CollisionFilter) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.filter = filter;
        }
    }

    fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(&handle)
    }

    fn step(&mut self) -> Vec<CollisionEvent> {
        let dynamic: Vec<BodyHandle> = self
            .bodies
            .iter()
            .filter(|(_, b)| !b.is_static)
            .map(|(&h, _)| h)
            .collect();

        for handle in &dynamic {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.position += body.velocity;
            }
        }

        // Contacts are gathered before any push-out so resting contacts count.
        let mut current = BTreeSet::new();
        for (i, &handle) in dynamic.iter().enumerate() {
            let Some(body) = self.bodies.get(&handle).copied() else {
                continue;
            };
            for other in self.static_candidates(&body) {
                if let Some(other_body) = self.bodies.get(&other) {
                    if body.filter.interacts(other_body.filter) && overlaps(&body, other_body) {
                        current.insert(Self::pair(handle, other));
                    }
                }
            }
            for &other in &dynamic[i + 1..] {
                if let Some(other_body) = self.bodies.get(&other) {
                    if body.filter.interacts(other_body.filter) && overlaps(&body, other_body) {
                        current.insert(Self::pair(handle, other));
                    }
                }
            }
        }

        for &handle in &dynamic {
            let Some(mut body) = self.bodies.get(&handle).copied() else {
                continue;
            };
            if body.is_sensor {
                continue;
            }
            for other in self.static_candidates(&body) {
                let Some(solid) = self.bodies.get(&other) else {
                    continue;
                };
                if solid.is_sensor || !body.filter.interacts(solid.filter) {
                    continue;
                }
                if let Some(push) = separation(&body, solid) {
                    body.position += push;
                }
            }
            self.bodies.insert(handle, body);
        }

        let events = current
            .difference(&self.contacts)
            .filter_map(|(a, b)| {
                let a = self.bodies.get(a)?.tag;
                let b = self.bodies.get(b)?.tag;
                Some(CollisionEvent::new(a, b))
            })
            .collect();
        self.contacts = current;
        events
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.static_cells.clear();
        self.contacts.clear();
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

/// Closest point of an axis-aligned box to `point`.
fn closest_on_rect(point: Vec2Fixed, center: Vec2Fixed, half: Vec2Fixed) -> Vec2Fixed {
    point.clamp(center - half, center + half)
}

/// Strict overlap test; touching edges do not count.
fn overlaps(a: &Body, b: &Body) -> bool {
    match (a.shape, b.shape) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            let reach = ra + rb;
            a.position.distance_squared(b.position) < reach * reach
        }
        (Shape::Circle { radius }, Shape::Rect { .. }) => {
            let closest = closest_on_rect(a.position, b.position, b.shape.half_extents());
            a.position.distance_squared(closest) < radius * radius
        }
        (Shape::Rect { .. }, Shape::Circle { .. }) => overlaps(b, a),
        (Shape::Rect { .. }, Shape::Rect { .. }) => {
            let ha = a.shape.half_extents();
            let hb = b.shape.half_extents();
            (a.position.x - b.position.x).abs() < ha.x + hb.x
                && (a.position.y - b.position.y).abs() < ha.y + hb.y
        }
    }
}

/// Displacement that moves circular `body` out of `solid`, if they overlap.
fn separation(body: &Body, solid: &Body) -> Option<Vec2Fixed> {
    let Shape::Circle { radius } = body.shape else {
        return None;
    };
    match solid.shape {
        Shape::Circle { radius: other } => {
            let reach = radius + other;
            let delta = body.position - solid.position;
            let dist = fixed_sqrt(delta.dot(delta));
            if dist >= reach {
                return None;
            }
            if dist == Fixed::ZERO {
                return Some(Vec2Fixed::new(reach, Fixed::ZERO));
            }
            Some(delta.scale((reach - dist) / dist))
        }
        Shape::Rect { .. } => {
            let half = solid.shape.half_extents();
            let closest = closest_on_rect(body.position, solid.position, half);
            let delta = body.position - closest;
            let dist_sq = delta.dot(delta);
            if dist_sq >= radius * radius {
                return None;
            }
            if dist_sq > Fixed::ZERO {
                let dist = fixed_sqrt(dist_sq);
                if dist == Fixed::ZERO {
                    return None;
                }
                return Some(delta.scale((radius - dist) / dist));
            }
            // Centre inside the box: leave through the nearest face.
            let min = solid.position - half;
            let max = solid.position + half;
            let exits = [
                (body.position.x - min.x + radius, Vec2Fixed::new(-Fixed::ONE, Fixed::ZERO)),
                (max.x - body.position.x + radius, Vec2Fixed::new(Fixed::ONE, Fixed::ZERO)),
                (body.position.y - min.y + radius, Vec2Fixed::new(Fixed::ZERO, -Fixed::ONE)),
                (max.y - body.position.y + radius, Vec2Fixed::new(Fixed::ZERO, Fixed::ONE)),
            ];
            exits
                .into_iter()
                .min_by_key(|(depth, _)| *depth)
                .map(|(depth, dir)| dir.scale(depth))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(tag: BodyTag, x: i32, y: i32, r: i32, filter: CollisionFilter) -> BodyDesc {
        BodyDesc {
            tag,
            shape: Shape::circle(Fixed::from_num(r)),
            position: Vec2Fixed::from_int(x, y),
            filter,
            is_static: false,
            is_sensor: false,
        }
    }

    fn wall(x: u32, y: u32) -> BodyDesc {
        BodyDesc {
            tag: BodyTag::Tile(TileCoord::new(x, y)),
            shape: Shape::square(Fixed::from_num(32)),
            position: Vec2Fixed::from_int(x as i32 * 32 + 16, y as i32 * 32 + 16),
            filter: CollisionFilter::new(category::WALL, category::PLAYER | category::PROJECTILE),
            is_static: true,
            is_sensor: false,
        }
    }

    fn tank_filter() -> CollisionFilter {
        CollisionFilter::new(category::PLAYER, category::WALL | category::PROJECTILE)
    }

    #[test]
    fn test_velocity_integrates_per_step() {
        let mut world = GridSpatialWorld::default();
        let h = world.add_body(circle(BodyTag::Tank(1), 0, 0, 4, tank_filter()));
        world.set_velocity(h, Vec2Fixed::from_int(3, -1));
        world.step();
        world.step();
        assert_eq!(world.body(h).unwrap().position, Vec2Fixed::from_int(6, -2));
    }

    #[test]
    fn test_begin_event_reported_once() {
        let mut world = GridSpatialWorld::default();
        world.add_body(wall(1, 0));
        let tank = world.add_body(circle(BodyTag::Tank(1), 10, 16, 8, tank_filter()));
        world.set_velocity(tank, Vec2Fixed::from_int(4, 0));

        // Edge of the wall is at x = 32; the tank reaches it after 4 steps.
        let mut events = Vec::new();
        for _ in 0..4 {
            events.extend(world.step());
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].a, BodyTag::Tile(TileCoord::new(1, 0)));
        assert_eq!(events[0].b, BodyTag::Tank(1));
    }

    #[test]
    fn test_dynamic_pushed_out_of_static() {
        let mut world = GridSpatialWorld::default();
        world.add_body(wall(1, 0));
        let tank = world.add_body(circle(BodyTag::Tank(1), 20, 16, 8, tank_filter()));
        world.set_velocity(tank, Vec2Fixed::from_int(8, 0));
        world.step();
        let pos = world.body(tank).unwrap().position;
        assert_eq!(pos.x, Fixed::from_num(24));
    }

    #[test]
    fn test_filters_must_match_both_ways() {
        let mut world = GridSpatialWorld::default();
        world.add_body(wall(0, 0));
        let ghost = world.add_body(circle(BodyTag::Tank(1), 16, 16, 8, CollisionFilter::NONE));
        assert!(world.step().is_empty());
        assert_eq!(world.body(ghost).unwrap().position, Vec2Fixed::from_int(16, 16));
    }

    #[test]
    fn test_events_sorted_by_handle() {
        let mut world = GridSpatialWorld::default();
        let shell_filter = CollisionFilter::new(category::PROJECTILE, category::PLAYER);
        let target_filter = CollisionFilter::new(category::PLAYER, category::PROJECTILE);
        world.add_body(circle(BodyTag::Tank(7), 0, 0, 8, target_filter));
        world.add_body(circle(BodyTag::Projectile(3), 100, 0, 2, shell_filter));
        world.add_body(circle(BodyTag::Projectile(2), 2, 0, 2, shell_filter));
        world.add_body(circle(BodyTag::Tank(9), 100, 2, 8, target_filter));

        let events = world.step();
        assert_eq!(
            events,
            vec![
                CollisionEvent::new(BodyTag::Tank(7), BodyTag::Projectile(2)),
                CollisionEvent::new(BodyTag::Projectile(3), BodyTag::Tank(9)),
            ]
        );
    }

    #[test]
    fn test_removed_body_leaves_index() {
        let mut world = GridSpatialWorld::default();
        let w = world.add_body(wall(0, 0));
        assert!(world.remove_body(w));
        assert!(!world.remove_body(w));
        let tank = world.add_body(circle(BodyTag::Tank(1), 16, 16, 8, tank_filter()));
        assert!(world.step().is_empty());
        assert_eq!(world.body(tank).unwrap().position, Vec2Fixed::from_int(16, 16));
    }
}
