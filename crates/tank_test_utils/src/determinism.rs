//! Replay harness for the simulation.
//!
//! Runs the same setup and inputs more than once and compares
//! [`Simulation::state_hash`] values. A mismatch means the core read
//! something outside its own state: wall-clock time, float rounding,
//! hash-map order or an unseeded RNG.

use std::thread;

use tank_core::components::EntityId;
use tank_core::input::PlayerInput;
use tank_core::simulation::Simulation;
use tank_core::sync::WorldSnapshot;

/// Final hashes of several runs of the same setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// True when every run ended on the same hash.
    pub is_deterministic: bool,
    /// Final hash per run, in run order.
    pub hashes: Vec<u64>,
    /// Ticks per run.
    pub ticks: u64,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>, ticks: u64) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|pair| pair[0] == pair[1]),
            hashes,
            ticks,
        }
    }

    /// Distinct final hashes, sorted.
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// # Panics
    ///
    /// Panics with every run's hash if the runs disagree.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic,
            "{} runs of {} ticks ended on {} different hashes: {:?}",
            self.hashes.len(),
            self.ticks,
            self.unique_hashes().len(),
            self.hashes
        );
    }
}

/// Build `runs` fresh states, step each `ticks` times and compare `hash`.
///
/// Generic over the state so the harness itself can be tested with plain
/// counters.
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            (0..ticks).for_each(|_| step(&mut state));
            hash(&state)
        })
        .collect();
    DeterminismResult::from_hashes(hashes, ticks)
}

/// One input change in a scripted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedInput {
    /// Tick at which the input takes effect.
    pub tick: u64,
    /// Index into the tank list returned by the setup function.
    pub tank: usize,
    /// The input.
    pub input: PlayerInput,
}

/// Drive `sim` for `ticks` ticks under `script` and return the final hash.
///
/// Entries whose tick has already passed apply immediately. Entries naming
/// a tank index outside `tanks` are skipped.
pub fn run_script(sim: &mut Simulation, tanks: &[EntityId], script: &[ScriptedInput], ticks: u64) -> u64 {
    let dt = sim.fixed_step();
    let mut pending: Vec<&ScriptedInput> = script.iter().collect();
    pending.sort_by_key(|entry| entry.tick);
    let mut pending = pending.into_iter().peekable();

    for _ in 0..ticks {
        let now = sim.current_tick();
        while let Some(entry) = pending.next_if(|entry| entry.tick <= now) {
            if let Some(&tank) = tanks.get(entry.tank) {
                // A tank that left is simply not driven.
                let _ = sim.set_input(tank, entry.input);
            }
        }
        sim.tick(dt);
    }
    sim.state_hash()
}

/// Replay the same script on two fresh worlds.
pub fn verify_script_determinism<F>(setup_fn: F, script: &[ScriptedInput], ticks: u64) -> DeterminismResult
where
    F: Fn() -> (Simulation, Vec<EntityId>),
{
    let hashes = (0..2)
        .map(|_| {
            let (mut sim, tanks) = setup_fn();
            run_script(&mut sim, &tanks, script, ticks)
        })
        .collect();
    DeterminismResult::from_hashes(hashes, ticks)
}

/// Tick two copies of the same world with whatever inputs the setup left
/// on the tanks and compare the final hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(2, num_ticks, &setup_fn, step_once, Simulation::state_hash).is_deterministic
}

fn step_once(sim: &mut Simulation) {
    let dt = sim.fixed_step();
    sim.tick(dt);
}

/// Run `num_sims` copies on scoped threads.
///
/// # Panics
///
/// Panics if a simulation thread panics.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes = thread::scope(|scope| {
        let workers: Vec<_> = (0..num_sims)
            .map(|_| {
                scope.spawn(|| {
                    let mut sim = setup_fn();
                    (0..num_ticks).for_each(|_| step_once(&mut sim));
                    sim.state_hash()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("simulation thread panicked"))
            .collect()
    });
    DeterminismResult::from_hashes(hashes, num_ticks)
}

/// Step two copies in lockstep and report the first tick whose hashes
/// differ. Tick 0 means the setup itself diverged.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut left = setup_fn();
    let mut right = setup_fn();
    if left.state_hash() != right.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        step_once(&mut left);
        step_once(&mut right);
        if left.state_hash() != right.state_hash() {
            tracing::debug!(tick, "Simulations diverged");
            return Some(tick);
        }
    }
    None
}

/// Check that the world after `num_ticks` survives a bincode snapshot
/// round trip unchanged.
pub fn verify_snapshot_bytes<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();
    (0..num_ticks).for_each(|_| step_once(&mut sim));

    let snapshot = WorldSnapshot::capture(&sim);
    let Ok(bytes) = snapshot.to_bytes() else {
        return false;
    };
    WorldSnapshot::from_bytes(&bytes).is_ok_and(|restored| restored == snapshot)
}

/// Input and map strategies for property tests.
pub mod strategies {
    use proptest::prelude::*;
    use tank_core::build_queue::BuildKind;
    use tank_core::input::PlayerInput;
    use tank_core::math::{ratio, Fixed};
    use tank_core::tilemap::TileCoord;

    use super::ScriptedInput;

    /// Turn rate in thousandths, covering the full `[-1, 1]` range.
    pub fn arb_turn_rate() -> impl Strategy<Value = Fixed> {
        (-1000i32..=1000i32).prop_map(|milli| ratio(milli, 1000))
    }

    /// Any player input.
    pub fn arb_input() -> impl Strategy<Value = PlayerInput> {
        (arb_turn_rate(), any::<bool>(), any::<bool>())
            .prop_map(|(turn, up, fire)| PlayerInput::new(turn, up, fire, 0))
    }

    /// A script of input changes for `tanks` tanks over `ticks` ticks.
    pub fn arb_input_script(tanks: usize, ticks: u64, max_len: usize) -> impl Strategy<Value = Vec<ScriptedInput>> {
        proptest::collection::vec(
            (0..ticks, 0..tanks.max(1), arb_input()).prop_map(|(tick, tank, input)| ScriptedInput { tick, tank, input }),
            0..max_len,
        )
    }

    /// Shell damage, including zero and one-shot kills.
    pub fn arb_damage() -> impl Strategy<Value = u32> {
        0u32..200u32
    }

    /// A tile inside a `width` x `height` map.
    pub fn arb_tile(width: u32, height: u32) -> impl Strategy<Value = TileCoord> {
        (0..width, 0..height).prop_map(|(x, y)| TileCoord::new(x, y))
    }

    /// Any build kind.
    pub fn arb_build_kind() -> impl Strategy<Value = BuildKind> {
        prop_oneof![Just(BuildKind::Road), Just(BuildKind::Wall), Just(BuildKind::Harvest)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{arena_sim, duel, open_sim};
    use proptest::prelude::*;
    use tank_core::math::Fixed;

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_detects_divergent_runs() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let counter = AtomicU64::new(0);
        let result = verify_determinism(
            2,
            1,
            || counter.fetch_add(1, Ordering::SeqCst),
            |_| {},
            |n| *n,
        );
        assert!(!result.is_deterministic);
        assert_eq!(result.unique_hashes().len(), 2);
    }

    #[test]
    fn test_empty_arena_determinism() {
        assert!(verify_simulation_determinism(arena_sim, 200));
    }

    #[test]
    fn test_scripted_duel_determinism() {
        let script = [
            ScriptedInput {
                tick: 0,
                tank: 0,
                input: PlayerInput::new(Fixed::ONE, true, true, 0),
            },
            ScriptedInput {
                tick: 30,
                tank: 1,
                input: PlayerInput::new(-Fixed::ONE, true, true, 30),
            },
        ];
        let setup = || {
            let mut sim = arena_sim();
            let (red, blue) = duel(&mut sim);
            (sim, vec![red, blue])
        };
        verify_script_determinism(setup, &script, 400).assert_deterministic();
    }

    #[test]
    fn test_parallel_runs_match() {
        let setup = || {
            let mut sim = arena_sim();
            let (red, _) = duel(&mut sim);
            sim.set_input(red, PlayerInput::new(Fixed::ONE, true, true, 0)).unwrap();
            sim
        };
        run_parallel_simulations(setup, 4, 200).assert_deterministic();
    }

    #[test]
    fn test_no_divergence_found() {
        assert_eq!(find_first_divergence(|| open_sim(12, 12), 50), None);
    }

    #[test]
    fn test_snapshot_bytes_survive() {
        assert!(verify_snapshot_bytes(arena_sim, 30));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_random_scripts_replay_identically(script in strategies::arb_input_script(2, 120, 24)) {
            let setup = || {
                let mut sim = arena_sim();
                let (red, blue) = duel(&mut sim);
                (sim, vec![red, blue])
            };
            let result = verify_script_determinism(setup, &script, 120);
            prop_assert!(result.is_deterministic);
        }
    }
}
