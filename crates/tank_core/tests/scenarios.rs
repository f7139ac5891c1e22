//! End-to-end scenarios driven through the public simulation API and the
//! grid physics backend.

use std::collections::BTreeSet;

use tank_core::build_queue::BuildKind;
use tank_core::clock::SimulationClock;
use tank_core::components::Team;
use tank_core::data::{GameRules, MapData, StationSpawn};
use tank_core::events::{CommandOutcome, GameEvent};
use tank_core::input::{PlayerCommand, PlayerInput};
use tank_core::math::{Fixed, Vec2Fixed};
use tank_core::pillbox::PillboxPhase;
use tank_core::projectile::ProjectileOwner;
use tank_core::simulation::Simulation;
use tank_core::spatial::{category, CollisionFilter};
use tank_core::sync::WorldSnapshot;
use tank_core::tank::Tank;
use tank_core::tilemap::{Layer, TileFamily, TileIndex};
use tank_test_utils::determinism::{find_first_divergence, run_script, strategies, verify_simulation_determinism};
use tank_test_utils::fixtures::{arena_sim, duel, open_sim, rules_with, run_ticks, square, tile_center};
use tank_test_utils::proptest::prelude::*;

fn fire() -> PlayerInput {
    PlayerInput::new(Fixed::ZERO, false, true, 0)
}

fn forward() -> PlayerInput {
    PlayerInput::new(Fixed::ZERO, true, false, 0)
}

fn sim_with(map: MapData) -> Simulation {
    Simulation::new(GameRules::default(), map).unwrap()
}

/// Tick until `done` holds, returning every event seen. Panics after `limit` ticks.
fn run_until(sim: &mut Simulation, limit: u32, mut done: impl FnMut(&Simulation) -> bool) -> Vec<GameEvent> {
    let mut events = Vec::new();
    for _ in 0..limit {
        events.extend(run_ticks(sim, 1));
        if done(sim) {
            return events;
        }
    }
    panic!("condition not reached within {limit} ticks");
}

fn road_tiles(sim: &Simulation) -> usize {
    sim.tiles()
        .layer_values(Layer::Ground)
        .into_iter()
        .filter(|&v| TileIndex(v).family() == TileFamily::Road)
        .count()
}

// ============================================================================
// Clock
// ============================================================================

#[test]
fn clock_drives_whole_ticks_only() {
    let mut sim = open_sim(10, 10);
    let mut clock = SimulationClock::new(60);
    let two_and_a_half = clock.step() * 5 / 2;

    assert_eq!(clock.advance(two_and_a_half, |dt| { sim.tick(dt); }), 2);
    assert_eq!(clock.advance(two_and_a_half, |dt| { sim.tick(dt); }), 3);
    assert_eq!(sim.current_tick(), 5);

    assert_eq!(clock.advance(clock.step() / 2, |dt| { sim.tick(dt); }), 0);
    assert_eq!(sim.current_tick(), 5);
}

// ============================================================================
// Firing
// ============================================================================

#[test]
fn firing_without_ammo_does_nothing() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    sim.tank_mut(tank).unwrap().ammo.amount = 0;
    sim.set_input(tank, fire()).unwrap();

    run_ticks(&mut sim, 30);
    assert!(sim.projectiles().is_empty());
    assert_eq!(sim.tank(tank).unwrap().ammo.amount, 0);
    assert_eq!(sim.tank(tank).unwrap().fire_cooldown, Fixed::ZERO);
}

#[test]
fn last_shell_fires_exactly_once() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    sim.tank_mut(tank).unwrap().ammo.amount = 1;
    sim.set_input(tank, fire()).unwrap();

    let mut seen = BTreeSet::new();
    for _ in 0..90 {
        run_ticks(&mut sim, 1);
        seen.extend(sim.projectiles().keys().copied());
    }
    assert_eq!(seen.len(), 1);
    assert_eq!(sim.tank(tank).unwrap().ammo.amount, 0);
}

#[test]
fn shell_expires_on_the_tick_it_reaches_range() {
    let rules = rules_with(|r| {
        r.projectile.speed_per_tick = 10;
        r.projectile.max_range = 100;
    });
    let mut sim = Simulation::new(rules, MapData::open_field("range", 40, 20)).unwrap();
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 2, 10)).unwrap();
    sim.set_input(tank, fire()).unwrap();
    run_ticks(&mut sim, 1);
    sim.set_input(tank, PlayerInput::default()).unwrap();

    let shell = *sim.projectiles().keys().next().unwrap();
    assert_eq!(sim.projectiles()[&shell].distance_traveled, Fixed::from_num(10));
    run_ticks(&mut sim, 8);
    assert_eq!(sim.projectiles()[&shell].distance_traveled, Fixed::from_num(90));
    run_ticks(&mut sim, 1);
    assert!(!sim.projectiles().contains_key(&shell));
}

// ============================================================================
// Terrain
// ============================================================================

#[test]
fn tank_stops_against_wall() {
    let mut map = MapData::open_field("wall", 20, 20);
    for y in 0..20 {
        map.paint(10, y, TileFamily::Wall);
    }
    let mut sim = sim_with(map);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 10)).unwrap();
    sim.set_input(tank, forward()).unwrap();

    run_ticks(&mut sim, 240);
    let x = sim.tank(tank).unwrap().position.x;
    let wall_face = Fixed::from_num(10 * 32) - sim.rules().tank.radius();
    assert!(x <= wall_face + Fixed::ONE, "tank at {x} passed wall face {wall_face}");
    assert!(x >= wall_face - Fixed::from_num(8));
}

#[test]
fn shell_turns_wall_into_crater() {
    let mut map = MapData::open_field("crater", 20, 20);
    map.paint(10, 10, TileFamily::Wall);
    map.paint(10, 11, TileFamily::Wall);
    let mut sim = sim_with(map);
    let wall_mask = sim.tiles().get(10, 10, Layer::Ground).unwrap().mask();

    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 10)).unwrap();
    sim.set_input(tank, fire()).unwrap();
    run_ticks(&mut sim, 1);
    sim.set_input(tank, PlayerInput::default()).unwrap();

    let events = run_until(&mut sim, 40, |s| !s.tiles().has_collision(10, 10));
    let crater = sim.tiles().get(10, 10, Layer::Ground).unwrap();
    assert_eq!(crater.family(), TileFamily::Crater);
    assert_eq!(crater.mask(), wall_mask);
    assert!(sim.tiles().has_collision(10, 11));
    assert!(sim.projectiles().is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::TileChanged { x: 10, y: 10, layer: Layer::Ground, .. }
    )));
}

// ============================================================================
// Pillboxes
// ============================================================================

#[test]
fn pillbox_knocked_out_collected_and_redeployed() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 3, 10)).unwrap();
    let pillbox = sim.spawn_pillbox(Team::Neutral, tile_center(&sim, 8, 10));
    sim.pillbox_mut(pillbox).unwrap().health.set(1);

    // Knock it out.
    sim.set_input(tank, fire()).unwrap();
    let events = run_until(&mut sim, 60, |s| s.pillbox(pillbox).unwrap().phase() == PillboxPhase::Pickup);
    assert!(events.iter().any(|e| matches!(
        e,
        GameEvent::PillboxDestroyed { pillbox: p, by: ProjectileOwner::Tank(t) } if *p == pillbox && *t == tank
    )));
    let downed = sim.pillbox(pillbox).unwrap();
    assert_eq!(downed.health.current, 1);
    let body = sim.spatial().body(downed.body_handle().unwrap()).unwrap();
    assert!(!body.is_static);
    assert_eq!(body.filter, CollisionFilter::new(category::PILLBOX, category::PLAYER));

    // Drive over it.
    sim.set_input(tank, forward()).unwrap();
    run_until(&mut sim, 240, |s| s.pillbox(pillbox).unwrap().holder() == Some(tank));
    sim.set_input(tank, PlayerInput::default()).unwrap();
    assert_eq!(sim.tank(tank).unwrap().pillbox_count, 1);
    assert!(sim.pillbox(pillbox).unwrap().body_handle().is_none());

    // Put it down for our side.
    run_ticks(&mut sim, 60);
    let tile_size = sim.rules().tile_size_fixed();
    let here = sim.tiles().world_to_tile(sim.tank(tank).unwrap().position, tile_size).unwrap();
    let outcome = sim
        .apply_command(tank, PlayerCommand::PlacePillbox { tiles: square(here.x - 3, here.y - 1) })
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Accepted);

    let placed = sim.pillbox(pillbox).unwrap();
    assert_eq!(placed.phase(), PillboxPhase::Placed);
    assert_eq!(placed.team, Team::Red);
    assert_eq!(placed.health.current, sim.rules().pillbox.max_health);
    assert_eq!(sim.tank(tank).unwrap().pillbox_count, 0);

    // It does not shoot its own side.
    for _ in 0..120 {
        run_ticks(&mut sim, 1);
        assert!(sim
            .projectiles()
            .values()
            .all(|p| p.owner != ProjectileOwner::Pillbox(pillbox)));
    }
}

#[test]
fn placing_without_a_pillbox_is_rejected() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 5)).unwrap();
    let outcome = sim
        .apply_command(tank, PlayerCommand::PlacePillbox { tiles: square(6, 6) })
        .unwrap();
    assert!(!outcome.is_accepted());
    assert!(sim.pillboxes().is_empty());
}

#[test]
fn steel_buys_a_pillbox() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    let cost = sim.rules().pillbox.steel_cost;

    sim.tank_mut(tank).unwrap().steel.amount = cost - 1;
    assert!(!sim.apply_command(tank, PlayerCommand::BuildPillbox).unwrap().is_accepted());

    sim.tank_mut(tank).unwrap().steel.amount = cost;
    assert!(sim.apply_command(tank, PlayerCommand::BuildPillbox).unwrap().is_accepted());
    assert_eq!(sim.tank(tank).unwrap().steel.amount, 0);

    let events = run_ticks(&mut sim, 1);
    assert!(events.iter().any(|e| matches!(e, GameEvent::PillboxBuilt { .. })));
    assert!(events.iter().any(|e| matches!(e, GameEvent::PillboxPickedUp { .. })));
    assert_eq!(sim.tank(tank).unwrap().pillbox_count, 1);
}

// ============================================================================
// Tanks
// ============================================================================

#[test]
fn destroyed_tank_drops_steel_and_respawns_at_station() {
    let mut map = MapData::open_field("duel", 20, 20);
    map.stations = vec![
        StationSpawn { x: 2, y: 2, team: Team::Blue },
        StationSpawn { x: 17, y: 17, team: Team::Red },
    ];
    let mut sim = sim_with(map);
    let (red, blue) = duel(&mut sim);
    let blue_home = tile_center(&sim, 2, 2);
    assert_eq!(sim.tank(blue).unwrap().position, blue_home);

    sim.place_tank(red, tile_center(&sim, 3, 10)).unwrap();
    sim.place_tank(blue, tile_center(&sim, 8, 10)).unwrap();
    sim.tank_mut(blue).unwrap().health.set(1);

    sim.set_input(red, fire()).unwrap();
    run_ticks(&mut sim, 1);
    sim.set_input(red, PlayerInput::default()).unwrap();
    let events = run_until(&mut sim, 40, |s| s.tank(blue).unwrap().is_respawning());
    assert!(events.contains(&GameEvent::TankDestroyed {
        tank: blue,
        by: ProjectileOwner::Tank(red),
    }));
    assert_eq!(sim.pickups().len(), 1);
    let wreck = sim.tank(blue).unwrap();
    let body = sim.spatial().body(wreck.body_handle().unwrap()).unwrap();
    assert_eq!(body.filter, CollisionFilter::NONE);

    // Collect the steel.
    sim.set_input(red, forward()).unwrap();
    let events = run_until(&mut sim, 200, |s| s.pickups().is_empty());
    assert!(events.contains(&GameEvent::SteelCollected { tank: red, amount: 2 }));
    assert_eq!(sim.tank(red).unwrap().steel.amount, 2);

    // Blue comes back home.
    let events = run_until(&mut sim, 240, |s| !s.tank(blue).unwrap().is_respawning());
    assert!(events.contains(&GameEvent::TankRespawned { tank: blue }));
    let back = sim.tank(blue).unwrap();
    assert_eq!(back.position, blue_home);
    assert_eq!(back.health.current, sim.rules().tank.max_health);
}

#[test]
fn stations_refill_ammunition() {
    let mut map = MapData::open_field("refill", 20, 20);
    map.stations = vec![StationSpawn { x: 5, y: 5, team: Team::Red }];
    let mut sim = sim_with(map);
    let tank = sim.join_team(1, Team::Red);
    sim.tank_mut(tank).unwrap().ammo.amount = 0;

    run_ticks(&mut sim, 60);
    let per_second = sim.rules().station.ammo_refill_per_second;
    let ammo = sim.tank(tank).unwrap().ammo.amount;
    assert!(ammo + 1 >= per_second && ammo <= per_second);
}

// ============================================================================
// Stations and the match
// ============================================================================

#[test]
fn station_capture_happens_once() {
    let mut map = MapData::open_field("capture", 20, 20);
    map.stations = vec![StationSpawn { x: 5, y: 5, team: Team::Neutral }];
    let mut sim = sim_with(map);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 5)).unwrap();

    let events = run_ticks(&mut sim, 30);
    let captures = events
        .iter()
        .filter(|e| matches!(e, GameEvent::StationCaptured { .. }))
        .count();
    assert_eq!(captures, 1);
    assert_eq!(sim.stations().values().next().unwrap().team, Team::Red);
}

#[test]
fn holding_every_station_wins_and_resets() {
    let mut map = MapData::open_field("win", 20, 20);
    map.stations = vec![
        StationSpawn { x: 3, y: 3, team: Team::Neutral },
        StationSpawn { x: 16, y: 16, team: Team::Neutral },
    ];
    let rules = rules_with(|r| r.match_rules.reset_delay_ms = 500);
    let mut sim = Simulation::new(rules, map).unwrap();
    let tank = sim.join_team(1, Team::Red);
    sim.tank_mut(tank).unwrap().ammo.amount = 3;
    let ids: Vec<_> = sim.stations().keys().copied().collect();

    sim.station_mut(ids[0]).unwrap().team = Team::Red;
    let events = run_ticks(&mut sim, 1);
    assert!(!events.iter().any(|e| matches!(e, GameEvent::GameWon { .. })));
    assert!(!sim.is_game_over());

    sim.station_mut(ids[1]).unwrap().team = Team::Red;
    let events = run_ticks(&mut sim, 1);
    assert!(events.contains(&GameEvent::GameWon { team: Team::Red }));
    assert_eq!(sim.winner(), Some(Team::Red));

    let events = run_ticks(&mut sim, 40);
    assert!(events.contains(&GameEvent::MatchReset));
    assert!(!sim.is_game_over());
    assert!(sim.stations().values().all(|s| s.team == Team::Neutral));
    let tank = sim.tank(tank).unwrap();
    assert_eq!(tank.ammo.amount, sim.rules().tank.max_ammo);
    assert_eq!(tank.team, Team::Red);
}

// ============================================================================
// Building
// ============================================================================

#[test]
fn build_queue_works_head_first_one_tile_at_a_time() {
    let mut sim = open_sim(20, 20);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 5)).unwrap();
    sim.tank_mut(tank).unwrap().wood.amount = 10;
    let outcome = sim
        .apply_command(tank, PlayerCommand::Build { tiles: square(6, 5), kind: BuildKind::Road })
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Accepted);

    run_ticks(&mut sim, 30);
    let queue = &sim.tank(tank).unwrap().build_queue;
    assert!(queue.items[0].progress > Fixed::ZERO);
    assert!(queue.items.iter().skip(1).all(|item| item.progress == Fixed::ZERO));

    let mut completions = 0;
    for _ in 0..400 {
        let roads = road_tiles(&sim);
        let queued = sim.tank(tank).unwrap().build_queue.len();
        let events = run_ticks(&mut sim, 1);
        let done = events
            .iter()
            .filter(|e| matches!(e, GameEvent::BuildComplete { .. }))
            .count();
        if done > 0 {
            assert_eq!(done, 1);
            assert_eq!(road_tiles(&sim), roads + 1);
            assert_eq!(sim.tank(tank).unwrap().build_queue.len(), queued - 1);
            completions += 1;
        }
    }
    assert_eq!(completions, 4);
    assert_eq!(road_tiles(&sim), 4);
}

#[test]
fn harvesting_pays_out_on_completion_only() {
    let mut map = MapData::open_field("woods", 20, 20);
    for (x, y) in [(6, 6), (7, 6), (6, 7), (7, 7)] {
        map.paint(x, y, TileFamily::Forest);
    }
    let mut sim = sim_with(map);
    let tank = sim.join_team(1, Team::Red);
    sim.place_tank(tank, tile_center(&sim, 5, 5)).unwrap();

    let outcome = sim
        .apply_command(tank, PlayerCommand::Build { tiles: square(6, 6), kind: BuildKind::Harvest })
        .unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(sim.tank(tank).unwrap().wood.amount, 0);

    run_ticks(&mut sim, 40);
    assert_eq!(sim.tank(tank).unwrap().wood.amount, 0);

    run_ticks(&mut sim, 400);
    let per_tile = sim.rules().build.harvest_wood;
    assert_eq!(sim.tank(tank).unwrap().wood.amount, per_tile * 4);
    assert_eq!(sim.tiles().family(6, 6, Layer::Decoration), Some(TileFamily::Empty));
}

// ============================================================================
// Sessions and sync
// ============================================================================

#[test]
fn leaving_tank_shows_up_as_removed() {
    let mut sim = arena_sim();
    let (red, _blue) = duel(&mut sim);
    let before = WorldSnapshot::capture(&sim);
    sim.leave(red).unwrap();
    run_ticks(&mut sim, 1);
    let delta = before.diff(&WorldSnapshot::capture(&sim));
    assert_eq!(delta.tanks.removed, vec![red]);
}

#[test]
fn arena_duel_is_deterministic() {
    let setup = || {
        let mut sim = arena_sim();
        let (red, blue) = duel(&mut sim);
        sim.set_input(red, PlayerInput::new(Fixed::ONE / Fixed::from_num(3), true, true, 0))
            .unwrap();
        sim.set_input(blue, PlayerInput::new(-Fixed::ONE, true, true, 0)).unwrap();
        sim
    };
    assert!(verify_simulation_determinism(setup, 600));
    assert_eq!(find_first_divergence(setup, 200), None);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn health_never_exceeds_max_or_wraps(hits in prop::collection::vec(strategies::arb_damage(), 0..20)) {
        let rules = GameRules::default();
        let mut tank = Tank::new(1, 1, Team::Red, Vec2Fixed::ZERO, &rules);
        let mut total = 0u32;
        for hit in hits {
            tank.apply_damage(hit, &rules);
            total = total.saturating_add(hit);
            prop_assert!(tank.health.current <= rules.tank.max_health);
            prop_assert_eq!(tank.is_respawning(), total >= rules.tank.max_health);
        }
    }

    #[test]
    fn ammo_stays_within_capacity(shots in 0u32..80, refill_ticks in 0usize..600) {
        let rules = GameRules::default();
        let mut tank = Tank::new(1, 1, Team::Red, Vec2Fixed::ZERO, &rules);
        for _ in 0..shots {
            tank.fire_cooldown = Fixed::ZERO;
            tank.try_fire(&rules);
        }
        prop_assert_eq!(tank.ammo.amount, rules.tank.max_ammo.saturating_sub(shots));
        let dt = Fixed::ONE / Fixed::from_num(60);
        for _ in 0..refill_ticks {
            tank.refill_ammo(dt, rules.station.ammo_refill_per_second);
        }
        prop_assert!(tank.ammo.amount <= rules.tank.max_ammo);
    }

    #[test]
    fn refused_builds_change_nothing(
        orders in prop::collection::vec((strategies::arb_tile(11, 11), strategies::arb_build_kind()), 1..12)
    ) {
        let mut map = MapData::open_field("yard", 12, 12);
        for (x, y) in [(2, 2), (3, 2), (8, 8), (9, 9)] {
            map.paint(x, y, TileFamily::Forest);
        }
        let mut sim = sim_with(map);
        let tank = sim.join_team(1, Team::Red);
        sim.place_tank(tank, tile_center(&sim, 6, 6)).unwrap();
        sim.tank_mut(tank).unwrap().wood.amount = 12;

        for (corner, kind) in orders {
            let before = sim.tank(tank).unwrap().clone();
            let outcome = sim
                .apply_command(tank, PlayerCommand::Build { tiles: square(corner.x, corner.y), kind })
                .unwrap();
            let after = sim.tank(tank).unwrap();
            prop_assert!(after.build_queue.len() <= after.build_queue.max_size);
            if outcome.is_accepted() {
                prop_assert!(after.build_queue.len() > before.build_queue.len());
                prop_assert!(after.wood.amount <= before.wood.amount);
            } else {
                prop_assert_eq!(&after.build_queue, &before.build_queue);
                prop_assert_eq!(after.wood.amount, before.wood.amount);
            }
            run_ticks(&mut sim, 5);
        }
    }

    #[test]
    fn tanks_stay_on_the_map(script in strategies::arb_input_script(2, 300, 30)) {
        let mut sim = arena_sim();
        let (red, blue) = duel(&mut sim);
        run_script(&mut sim, &[red, blue], &script, 300);

        let world = sim.tiles().world_size(sim.rules().tile_size_fixed());
        let radius = sim.rules().tank.radius();
        for tank in sim.tanks().values() {
            prop_assert!(tank.position.x >= radius && tank.position.x <= world.x - radius);
            prop_assert!(tank.position.y >= radius && tank.position.y <= world.y - radius);
        }
    }
}
