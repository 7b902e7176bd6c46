//! Migration planning: budgets, direction of flows, reasons, and the
//! engine-level path from region signals to `MigrationPlanned` events.

use popscale_core::{
    config::MigrationConfig,
    engine::SimEngine,
    frame::{AgentSample, RegionLink, RegionSignals, WorldFrame},
    migration_subsystem::{
        flows_in, MigrationCandidate, MigrationEngine, MigrationOrigin, MigrationReasonKind,
    },
    types::{Profession, RegionId},
};

fn signals(safety: f64, infrastructure: f64, food: f64, disease: f64, employment: f64, wage: f64) -> RegionSignals {
    RegionSignals {
        employment_rate: Some(employment),
        avg_wage: Some(wage),
        safety,
        infrastructure,
        food,
        disease,
    }
}

fn poor() -> RegionSignals {
    signals(20.0, 20.0, 20.0, 60.0, 0.3, 20.0)
}

fn rich() -> RegionSignals {
    signals(90.0, 90.0, 90.0, 5.0, 0.95, 150.0)
}

fn candidate(engine: &MigrationEngine, region: u32, s: &RegionSignals, distance: f64) -> MigrationCandidate {
    MigrationCandidate {
        region: RegionId(region),
        attractiveness: engine.attractiveness(s),
        distance,
        cultural_similarity: 0.8,
    }
}

#[test]
fn budget_is_rate_bounded_and_capped() {
    let engine = MigrationEngine::new(MigrationConfig::default());
    assert_eq!(engine.migrant_budget(0), 0);
    assert_eq!(engine.migrant_budget(19), 0);
    assert_eq!(engine.migrant_budget(10_000), 500);
    assert_eq!(engine.migrant_budget(1_000_000), 1_000);
}

#[test]
fn attractiveness_weights_sub_scores() {
    let engine = MigrationEngine::new(MigrationConfig::default());
    let a = engine.attractiveness(&signals(50.0, 50.0, 50.0, 0.0, 1.0, 100.0));
    assert!((a.economic - 100.0).abs() < 1e-9);
    assert!((a.safety - 50.0).abs() < 1e-9);
    assert!((a.opportunity - 70.0).abs() < 1e-9);
    assert!((a.quality_of_life - 65.0).abs() < 1e-9);
    let expected = 100.0 * 0.35 + 50.0 * 0.25 + 70.0 * 0.25 + 65.0 * 0.15;
    assert!((a.total - expected).abs() < 1e-9);
}

/// Outgoing flows stay within the budget and only ever point uphill.
#[test]
fn flows_respect_budget_and_direction() {
    let engine = MigrationEngine::new(MigrationConfig::default());
    let origin_signals = signals(50.0, 50.0, 50.0, 20.0, 0.6, 60.0);
    let origin = MigrationOrigin {
        region: RegionId(0),
        population: 40_000,
        attractiveness: engine.attractiveness(&origin_signals),
    };
    let candidates = vec![
        candidate(&engine, 1, &rich(), 50.0),
        candidate(&engine, 2, &rich(), 900.0),
        candidate(&engine, 3, &poor(), 10.0),
        candidate(&engine, 4, &origin_signals, 10.0),
    ];

    let flows = engine.plan_migrations(&origin, &candidates, 7);
    assert!(!flows.is_empty());
    let total: u64 = flows.iter().map(|f| f.count).sum();
    assert!(total <= engine.migrant_budget(origin.population));
    for flow in &flows {
        assert!(flow.count > 0);
        assert_eq!(flow.from, RegionId(0));
        assert_eq!(flow.tick, 7);
        let dest = candidates.iter().find(|c| c.region == flow.to).expect("known destination");
        assert!(dest.attractiveness.total > origin.attractiveness.total);
    }
    assert!(flows.iter().all(|f| f.to != RegionId(3) && f.to != RegionId(4)));

    // The nearer of two identical destinations draws more people.
    let near = flows.iter().find(|f| f.to == RegionId(1)).expect("near flow");
    let far = flows.iter().find(|f| f.to == RegionId(2)).map_or(0, |f| f.count);
    assert!(near.count > far);
}

#[test]
fn small_differences_fall_below_materiality() {
    let engine = MigrationEngine::new(MigrationConfig::default());
    let base = signals(50.0, 50.0, 50.0, 20.0, 0.6, 60.0);
    let slightly_better = signals(55.0, 50.0, 50.0, 20.0, 0.6, 60.0);
    let origin = MigrationOrigin {
        region: RegionId(0),
        population: 100_000,
        attractiveness: engine.attractiveness(&base),
    };
    let flows = engine.plan_migrations(&origin, &[candidate(&engine, 1, &slightly_better, 0.0)], 1);
    assert!(flows.is_empty());
}

#[test]
fn reason_is_the_largest_gain() {
    let engine = MigrationEngine::new(MigrationConfig::default());
    let plan = |from: RegionSignals, to: RegionSignals| {
        let origin = MigrationOrigin {
            region: RegionId(0),
            population: 10_000,
            attractiveness: engine.attractiveness(&from),
        };
        let flows = engine.plan_migrations(&origin, &[candidate(&engine, 1, &to, 0.0)], 1);
        flows.first().map(|f| f.reason.kind)
    };

    let calm = signals(50.0, 50.0, 50.0, 0.0, 0.5, 50.0);
    let war_zone = RegionSignals { safety: 10.0, ..calm };
    let uneasy = RegionSignals { safety: 40.0, ..calm };
    let safe = RegionSignals { safety: 100.0, ..calm };
    assert_eq!(plan(war_zone, RegionSignals { safety: 95.0, ..calm }), Some(MigrationReasonKind::War));
    assert_eq!(plan(uneasy, safe), Some(MigrationReasonKind::Safety));

    let booming = RegionSignals { employment_rate: Some(1.0), avg_wage: Some(100.0), ..calm };
    assert_eq!(plan(calm, booming), Some(MigrationReasonKind::Economic));
}

#[test]
fn history_is_bounded_and_tracks_net_migration() {
    let config = MigrationConfig { history_capacity: 3, ..MigrationConfig::default() };
    let mut engine = MigrationEngine::new(config);
    let origin = MigrationOrigin {
        region: RegionId(0),
        population: 10_000,
        attractiveness: engine.attractiveness(&poor()),
    };
    let candidates = [candidate(&engine, 1, &rich(), 0.0)];
    for tick in 1..=5 {
        let flows = engine.plan_migrations(&origin, &candidates, tick);
        engine.record_flows(&flows);
    }
    let history = engine.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].tick, 3);
    assert_eq!(engine.net_migration(RegionId(1)), 3 * 500);
    assert_eq!(engine.net_migration(RegionId(0)), -(3 * 500));
    assert_eq!(engine.recent_flows(RegionId(9)).len(), 0);
}

/// Full pipeline: cohorts → economy events → migration plan.
#[test]
fn engine_plans_flows_from_frame() {
    let mut engine = SimEngine::build_test("migration-engine", 11).expect("engine");
    let mut agents = Vec::new();
    for i in 0..2_000u64 {
        agents.push(AgentSample {
            id: i + 1,
            region: RegionId(if i < 1_800 { 0 } else { 1 }),
            profession: Profession::Farmer,
            wealth: 50.0,
            happiness: 40.0,
            age: 30.0,
            employed: true,
        });
    }
    let frame = WorldFrame {
        agents,
        region_signals: [(RegionId(0), poor()), (RegionId(1), rich())].into_iter().collect(),
        region_links: vec![RegionLink {
            a: RegionId(0),
            b: RegionId(1),
            distance: 100.0,
            cultural_similarity: 0.9,
        }],
        ..WorldFrame::default()
    };

    let events = engine.tick(&frame).expect("tick");
    let flows = flows_in(&events);
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].from, RegionId(0));
    assert_eq!(flows[0].to, RegionId(1));
    assert!(flows[0].count > 0 && flows[0].count <= 90);

    let migration = engine.migration().expect("migration subsystem");
    assert_eq!(migration.net_migration(RegionId(1)), flows[0].count as i64);
}

/// With a population override, each sampled agent stands for many people.
#[test]
fn population_override_scales_the_budget() {
    let mut engine = SimEngine::build_test("migration-override", 11).expect("engine");
    let agents = (0..1_000u64)
        .map(|i| AgentSample {
            id: i + 1,
            region: RegionId(0),
            profession: Profession::Farmer,
            wealth: 50.0,
            happiness: 40.0,
            age: 30.0,
            employed: true,
        })
        .chain(std::iter::once(AgentSample {
            id: 5_000,
            region: RegionId(1),
            profession: Profession::Farmer,
            wealth: 50.0,
            happiness: 40.0,
            age: 30.0,
            employed: true,
        }))
        .collect();
    let frame = WorldFrame {
        agents,
        population_override: Some(1_001_000),
        region_signals: [(RegionId(0), poor()), (RegionId(1), rich())].into_iter().collect(),
        region_links: vec![RegionLink {
            a: RegionId(0),
            b: RegionId(1),
            distance: 0.0,
            cultural_similarity: 1.0,
        }],
        ..WorldFrame::default()
    };

    let flows = flows_in(&engine.tick(&frame).expect("tick"));
    let total: u64 = flows.iter().map(|f| f.count).sum();
    assert_eq!(total, 1_000, "1M represented people hit the per-tick cap");
}
