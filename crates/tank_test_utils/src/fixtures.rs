//! Test fixtures and helpers.
//!
//! Pre-built worlds and small conveniences for consistent testing.

use fixed::types::I32F32;
use tank_core::components::{EntityId, Team};
use tank_core::data::{GameRules, MapData};
use tank_core::events::GameEvent;
use tank_core::math::Vec2Fixed;
use tank_core::simulation::Simulation;
use tank_core::tilemap::{TileCoord, TileMap};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Stock rules with a tweak applied.
#[must_use]
pub fn rules_with(tweak: impl FnOnce(&mut GameRules)) -> GameRules {
    let mut rules = GameRules::default();
    tweak(&mut rules);
    rules
}

/// An all-grass world with nothing on it.
///
/// # Panics
///
/// Panics if the map is rejected, which only happens for zero dimensions.
#[must_use]
pub fn open_sim(width: u32, height: u32) -> Simulation {
    Simulation::new(GameRules::default(), MapData::open_field("fixture", width, height))
        .expect("open field is always valid")
}

/// The built-in arena with stock rules.
///
/// # Panics
///
/// Panics if the built-in map stops validating.
#[must_use]
pub fn arena_sim() -> Simulation {
    Simulation::new(GameRules::default(), MapData::default_arena()).expect("built-in arena is valid")
}

/// Join one red and one blue tank. Returns `(red, blue)`.
pub fn duel(sim: &mut Simulation) -> (EntityId, EntityId) {
    let red = sim.join_team(1, Team::Red);
    let blue = sim.join_team(2, Team::Blue);
    (red, blue)
}

/// World position of a tile's centre under the simulation's rules.
#[must_use]
pub fn tile_center(sim: &Simulation, x: u32, y: u32) -> Vec2Fixed {
    TileMap::tile_center(TileCoord::new(x, y), sim.rules().tile_size_fixed())
}

/// The 2x2 block of tiles whose top-left corner is `(x, y)`.
#[must_use]
pub fn square(x: u32, y: u32) -> Vec<TileCoord> {
    vec![
        TileCoord::new(x, y),
        TileCoord::new(x + 1, y),
        TileCoord::new(x, y + 1),
        TileCoord::new(x + 1, y + 1),
    ]
}

/// Run `ticks` fixed steps and collect every event.
pub fn run_ticks(sim: &mut Simulation, ticks: u32) -> Vec<GameEvent> {
    let dt = sim.fixed_step();
    let mut events = Vec::new();
    for _ in 0..ticks {
        events.extend(sim.tick(dt).events);
    }
    events
}
