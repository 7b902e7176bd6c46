//! Same seed, same frames: byte-identical event logs.
//!
//! Every random draw goes through a per-tick subsystem stream, so two
//! engines fed the same frames must agree on every payload they log.

use popscale_core::{
    engine::SimEngine,
    frame::{AgentSample, Interaction, Publication, RegionLink, RegionSignals, WorldFrame},
    information_subsystem::{InfoType, RelationshipKind},
    types::{Profession, RegionId},
};

fn frame() -> WorldFrame {
    let agents = (0..400u64)
        .map(|i| AgentSample {
            id: i + 1,
            region: RegionId((i % 4) as u32),
            profession: Profession::ALL[(i % Profession::ALL.len() as u64) as usize],
            wealth: 20.0 + (i % 50) as f64 * 40.0,
            happiness: 55.0,
            age: 18.0 + (i % 45) as f64,
            employed: i % 7 != 0,
        })
        .collect();
    WorldFrame {
        agents,
        region_signals: (0..4u32)
            .map(|r| {
                let s = RegionSignals {
                    safety: 30.0 + r as f64 * 20.0,
                    infrastructure: 40.0 + r as f64 * 10.0,
                    ..RegionSignals::default()
                };
                (RegionId(r), s)
            })
            .collect(),
        region_links: (0..3u32)
            .map(|r| RegionLink {
                a: RegionId(r),
                b: RegionId(r + 1),
                distance: 60.0,
                cultural_similarity: 0.8,
            })
            .collect(),
        interactions: (1..200u64)
            .map(|a| Interaction { a, b: a + 1, kind: RelationshipKind::Friend, strength: 40.0 })
            .collect(),
        publications: vec![Publication {
            info_type: InfoType::Rumor,
            content: "the well is poisoned".into(),
            accuracy: 80.0,
            origin_id: Some(1),
            origin_region: RegionId(0),
        }],
        ..WorldFrame::default()
    }
}

fn run(seed: u64, ticks: u64) -> (SimEngine, String) {
    let _ = env_logger::builder().is_test(true).try_init();
    let run_id = format!("det-test-{seed}");
    let mut engine = SimEngine::build_test(&run_id, seed).expect("engine");
    engine.run_ticks(ticks, &frame()).expect("run");
    (engine, run_id)
}

fn collect_event_log(engine: &SimEngine, run_id: &str) -> Vec<String> {
    (0..=engine.clock.current_tick)
        .flat_map(|tick| {
            engine.store_events_for_tick(run_id, tick)
                .expect("read events")
                .into_iter()
                .map(|e| e.payload)
        })
        .collect()
}

#[test]
fn same_seed_produces_identical_event_logs() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;
    const TICKS: u64 = 120;

    let (engine_a, run_a) = run(SEED, TICKS);
    let (engine_b, run_b) = run(SEED, TICKS);

    let log_a = collect_event_log(&engine_a, &run_a);
    let log_b = collect_event_log(&engine_b, &run_b);

    assert_eq!(
        log_a.len(), log_b.len(),
        "Event log lengths differ: {} vs {}",
        log_a.len(), log_b.len()
    );
    for (i, (a, b)) in log_a.iter().zip(log_b.iter()).enumerate() {
        assert_eq!(a, b, "Event log diverged at entry {i}:\n  A: {a}\n  B: {b}");
    }

    // Scale metrics hold wall-clock tick timings; everything else must match.
    let mut state_a = engine_a.export_state().expect("export a");
    let mut state_b = engine_b.export_state().expect("export b");
    state_a.remove("scale");
    state_b.remove("scale");
    assert_eq!(state_a, state_b, "end-of-run state diverged");
}

/// The seed reaches the draws, not just the `RunInitialized` record.
#[test]
fn different_seeds_produce_different_logs() {
    let (engine_a, run_a) = run(42, 90);
    let (engine_b, run_b) = run(99, 90);

    let log_a = collect_event_log(&engine_a, &run_a);
    let log_b = collect_event_log(&engine_b, &run_b);

    let any_different = log_a.iter().skip(1).zip(log_b.iter().skip(1)).any(|(a, b)| a != b)
        || log_a.len() != log_b.len();
    assert!(any_different, "Different seeds produced identical logs: seed is not being used");
}

#[test]
fn scale_mode_is_independent_of_seed() {
    let (engine_a, _) = run(1, 5);
    let (engine_b, _) = run(2, 5);
    assert_eq!(engine_a.scale().mode(), engine_b.scale().mode());
    assert_eq!(engine_a.scale().read(|p| p.population()), 400);
}
