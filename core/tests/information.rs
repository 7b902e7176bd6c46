//! Information spread and the relationship graph.

use popscale_core::{
    config::{InformationConfig, ScaleConfig, SimConfig},
    engine::SimEngine,
    event::SimEvent,
    frame::{Interaction, Publication, WorldFrame},
    information_subsystem::{InfoType, InformationEngine, RelationshipKind},
    rng::SubsystemRng,
    scale_policy::{ScaleHandle, ScalePolicy},
    types::RegionId,
};
use std::collections::BTreeMap;

fn handle(population: u64) -> ScaleHandle {
    let handle = ScaleHandle::new(ScalePolicy::new(ScaleConfig::default()).expect("policy"));
    handle.update_population(population);
    handle
}

fn chain_adjacency(regions: u32) -> BTreeMap<RegionId, Vec<RegionId>> {
    let mut adjacency: BTreeMap<RegionId, Vec<RegionId>> = BTreeMap::new();
    for r in 0..regions.saturating_sub(1) {
        adjacency.entry(RegionId(r)).or_default().push(RegionId(r + 1));
        adjacency.entry(RegionId(r + 1)).or_default().push(RegionId(r));
    }
    adjacency
}

#[test]
fn spread_model_is_chosen_at_publication() {
    let small = handle(5_000);
    let mut info = InformationEngine::new(small.clone(), InformationConfig::default());
    let personal = info.publish(InfoType::Rumor, "the miller cheats", 90.0, Some(7), RegionId(0), 1);
    let anonymous = info.publish(InfoType::News, "harvest is in", 100.0, None, RegionId(0), 1);
    assert!(!info.information(personal).expect("item").is_regional());
    assert!(info.knows(personal, 7));
    assert_eq!(info.knower_count(personal), 1);
    assert!(info.information(anonymous).expect("item").is_regional());

    // Growing past the threshold only affects later items.
    small.update_population(5_000_000);
    let later = info.publish(InfoType::Rumor, "the duke is ill", 80.0, Some(7), RegionId(0), 2);
    assert!(info.information(later).expect("item").is_regional());
    assert!(!info.information(personal).expect("item").is_regional());
    assert_eq!(info.penetration(later, RegionId(0)), 1.0);
}

#[test]
fn spread_speed_follows_type() {
    assert!(InfoType::Scandal.spread_speed() > InfoType::Rumor.spread_speed());
    assert!(InfoType::Rumor.spread_speed() > InfoType::Propaganda.spread_speed());
    assert!(InfoType::Propaganda.spread_speed() > InfoType::News.spread_speed());
    assert!(InfoType::News.spread_speed() > InfoType::Discovery.spread_speed());
    assert!(InfoType::Discovery.spread_speed() > InfoType::MilitaryIntel.spread_speed());
}

/// Penetration grows locally, caps at 100, and seeds neighbours once the
/// origin passes the seeding threshold.
#[test]
fn regional_penetration_grows_and_seeds_neighbours() {
    let config = InformationConfig { seed_chance: 1.0, ..InformationConfig::default() };
    let mut info = InformationEngine::new(handle(5_000_000), config);
    let id = info.publish(InfoType::News, "war declared", 100.0, None, RegionId(0), 0);
    let adjacency = chain_adjacency(3);
    let mut rng = SubsystemRng::seeded(1);

    info.tick(1.0, &adjacency, &mut rng);
    assert!((info.penetration(id, RegionId(0)) - 6.0).abs() < 1e-9);
    assert_eq!(info.penetration(id, RegionId(1)), 0.0);

    for _ in 0..29 {
        info.tick(1.0, &adjacency, &mut rng);
    }
    assert_eq!(info.penetration(id, RegionId(0)), 100.0);
    assert!(info.penetration(id, RegionId(1)) > 50.0);
    assert!(info.penetration(id, RegionId(2)) > 0.0);
    for r in 0..3 {
        assert!(info.penetration(id, RegionId(r)) <= 100.0);
    }
}

#[test]
fn isolated_region_never_seeds() {
    let config = InformationConfig { seed_chance: 1.0, ..InformationConfig::default() };
    let mut info = InformationEngine::new(handle(5_000_000), config);
    let id = info.publish(InfoType::Scandal, "bribes", 100.0, None, RegionId(4), 0);
    let mut rng = SubsystemRng::seeded(1);
    for _ in 0..40 {
        info.tick(1.0, &BTreeMap::new(), &mut rng);
    }
    assert_eq!(info.penetration(id, RegionId(4)), 100.0);
    assert_eq!(info.penetration(id, RegionId(5)), 0.0);
}

#[test]
fn saturated_items_with_nowhere_to_go_are_retired() {
    let config = InformationConfig { seed_chance: 1.0, ..InformationConfig::default() };
    let mut info = InformationEngine::new(handle(5_000_000), config);
    let isolated = info.publish(InfoType::Scandal, "bribes", 100.0, None, RegionId(4), 0);
    let spreading = info.publish(InfoType::News, "war declared", 100.0, None, RegionId(0), 0);
    let adjacency = chain_adjacency(3);
    let mut rng = SubsystemRng::seeded(2);

    info.tick(1.0, &adjacency, &mut rng);
    assert!(info.retire(&adjacency).is_empty(), "nothing is saturated yet");

    for _ in 0..39 {
        info.tick(1.0, &adjacency, &mut rng);
    }
    assert_eq!(info.penetration(isolated, RegionId(4)), 100.0);
    assert_eq!(info.retire(&adjacency), vec![isolated]);
    assert!(info.information(isolated).is_none());
    assert!(info.information(spreading).is_some());

    for _ in 0..80 {
        info.tick(1.0, &adjacency, &mut rng);
    }
    for r in 0..3 {
        assert_eq!(info.penetration(spreading, RegionId(r)), 100.0);
    }
    assert_eq!(info.retire(&adjacency), vec![spreading]);
    assert!(info.items().is_empty());
}

#[test]
fn items_past_the_age_limit_are_retired() {
    let config = InformationConfig { max_item_age_days: 3.0, ..InformationConfig::default() };
    let mut info = InformationEngine::new(handle(5_000), config);
    let id = info.publish(InfoType::Rumor, "the miller cheats", 90.0, Some(7), RegionId(0), 0);
    let mut rng = SubsystemRng::seeded(3);

    info.tick(2.0, &BTreeMap::new(), &mut rng);
    assert_eq!(info.information(id).expect("item").age_days, 2.0);
    assert!(info.retire(&BTreeMap::new()).is_empty());

    info.tick(1.0, &BTreeMap::new(), &mut rng);
    assert_eq!(info.retire(&BTreeMap::new()), vec![id]);
    assert!(!info.knows(id, 7));
}

/// The engine retires old items on its own and reports each one.
#[test]
fn engine_reports_retired_items() {
    let mut config = SimConfig::default_test();
    config.information.max_item_age_days = 2.0;
    let mut engine = SimEngine::build_test_with("information-retire", 5, config).expect("engine");
    let first = WorldFrame {
        publications: vec![Publication {
            info_type: InfoType::News,
            content: "bridge closed".into(),
            accuracy: 100.0,
            origin_id: Some(1),
            origin_region: RegionId(0),
        }],
        ..WorldFrame::default()
    };
    engine.tick(&first).expect("tick 1");
    assert_eq!(engine.information().expect("information").items().len(), 1);

    let events = engine.tick(&WorldFrame::default()).expect("tick 2");
    let retired: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SimEvent::InformationRetired { .. }))
        .collect();
    assert_eq!(retired.len(), 1);
    assert!(engine.information().expect("information").items().is_empty());
}

/// Full-strength ties and a fast item: exactly one hop per tick.
#[test]
fn individual_spread_walks_the_relationship_graph() {
    let mut info = InformationEngine::new(handle(5_000), InformationConfig::default());
    for a in 1..5u64 {
        assert!(info.add_relationship(a, a + 1, RelationshipKind::Friend, 100.0, 0));
    }
    let id = info.publish(InfoType::Scandal, "affair", 100.0, Some(1), RegionId(0), 0);
    let mut rng = SubsystemRng::seeded(5);
    let adjacency = BTreeMap::new();

    let reports = info.tick(1.0, &adjacency, &mut rng);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].new_knowers, 1);
    assert!(info.knows(id, 2));
    assert!(!info.knows(id, 3));

    info.tick(1.0, &adjacency, &mut rng);
    info.tick(1.0, &adjacency, &mut rng);
    assert_eq!(info.knower_count(id), 4);
    let item = info.information(id).expect("item");
    assert!(item.accuracy <= 100.0 && item.accuracy >= 0.0);
}

#[test]
fn zero_strength_ties_carry_nothing() {
    let mut info = InformationEngine::new(handle(5_000), InformationConfig::default());
    info.add_relationship(1, 2, RelationshipKind::Colleague, 0.0, 0);
    let id = info.publish(InfoType::Scandal, "secret", 100.0, Some(1), RegionId(0), 0);
    let mut rng = SubsystemRng::seeded(5);
    for _ in 0..10 {
        info.tick(1.0, &BTreeMap::new(), &mut rng);
    }
    assert_eq!(info.knower_count(id), 1);
}

#[test]
fn relationships_respect_the_cap() {
    let scale = handle(50_000);
    let cap = scale.relationship_cap();
    assert_eq!(cap, 50);
    let mut info = InformationEngine::new(scale, InformationConfig::default());

    assert!(!info.add_relationship(1, 1, RelationshipKind::Friend, 50.0, 0));
    let accepted = (2..=70u64)
        .filter(|other| info.add_relationship(1, *other, RelationshipKind::Friend, 50.0, 0))
        .count();
    assert_eq!(accepted, cap);
    assert_eq!(info.relationship_count(1), cap);
    assert!(info.relationship(1, 70).is_none());
    assert!(info.relationship(2, 1).is_some(), "pairs are undirected");
}

#[test]
fn interaction_strengthens_and_refreshes() {
    let mut info = InformationEngine::new(handle(5_000), InformationConfig::default());
    assert!(info.record_interaction(3, 9, RelationshipKind::Neighbor, 40.0, 2));
    assert!(info.record_interaction(9, 3, RelationshipKind::Neighbor, 40.0, 6));
    let rel = info.relationship(3, 9).expect("relationship");
    assert_eq!((rel.a, rel.b), (3, 9));
    assert!((rel.strength - 45.0).abs() < 1e-9);
    assert_eq!(rel.since, 2);
    assert_eq!(rel.last_interaction, 6);
}

#[test]
fn stale_ties_weaken_and_weak_acquaintances_disappear() {
    let mut info = InformationEngine::new(handle(5_000), InformationConfig::default());
    info.add_relationship(1, 2, RelationshipKind::Acquaintance, 12.0, 0);
    info.add_relationship(1, 3, RelationshipKind::Family, 12.0, 0);
    info.add_relationship(1, 4, RelationshipKind::Friend, 80.0, 25);

    let quiet = info.decay_relationships(20);
    assert_eq!((quiet.weakened, quiet.pruned), (0, 0));

    let report = info.decay_relationships(31);
    assert_eq!(report.weakened, 2);
    assert_eq!(report.pruned, 1);
    assert!(info.relationship(1, 2).is_none());
    let family = info.relationship(1, 3).expect("family survives");
    assert!((family.strength - 7.0).abs() < 1e-9);
    assert!((info.relationship(1, 4).expect("friend").strength - 80.0).abs() < 1e-9);
}

/// When the population grows the cap shrinks; decay trims the weakest ties.
#[test]
fn decay_trims_agents_over_a_shrunken_cap() {
    let scale = handle(5_000);
    let mut info = InformationEngine::new(scale.clone(), InformationConfig::default());
    for other in 2..=101u64 {
        info.add_relationship(1, other, RelationshipKind::Friend, other as f64 % 100.0, 0);
    }
    assert_eq!(info.relationship_count(1), 100);

    scale.update_population(50_000_000);
    info.decay_relationships(0);
    assert_eq!(info.relationship_count(1), 5);
    let strongest: Vec<u64> = info.relationships_of(1).iter().map(|r| r.other(1)).collect();
    assert_eq!(strongest, vec![99, 98, 97, 96, 95]);
}

#[test]
fn engine_publishes_and_records_interactions() {
    let mut engine = SimEngine::build_test("information-engine", 3).expect("engine");
    let frame = WorldFrame {
        interactions: vec![
            Interaction { a: 1, b: 2, kind: RelationshipKind::Friend, strength: 60.0 },
            Interaction { a: 2, b: 3, kind: RelationshipKind::Colleague, strength: 60.0 },
        ],
        publications: vec![Publication {
            info_type: InfoType::Rumor,
            content: "new tax".into(),
            accuracy: 70.0,
            origin_id: Some(1),
            origin_region: RegionId(0),
        }],
        ..WorldFrame::default()
    };
    let events = engine.tick(&frame).expect("tick");

    let published: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SimEvent::InformationPublished { info_id, regional, .. } => Some((*info_id, *regional)),
            _ => None,
        })
        .collect();
    assert_eq!(published.len(), 1);
    assert!(!published[0].1, "small populations spread individually");

    let info = engine.information().expect("information subsystem");
    assert_eq!(info.total_relationships(), 2);
    assert!(info.knows(published[0].0, 1));
}
