//! Cohort aggregation, regional economy caching and trade.

use popscale_core::{
    cohort_subsystem::{CohortAggregator, TradeRoute},
    config::{EconomyConfig, ScaleConfig},
    frame::{AgentSample, RegionSignals},
    scale_policy::{ScaleHandle, ScalePolicy},
    types::{Profession, RegionId, Resource},
};
use std::collections::BTreeMap;

fn handle(population: u64, rebuild_interval_ms: u64) -> ScaleHandle {
    let config = ScaleConfig { cohort_update_interval_ms: rebuild_interval_ms, ..ScaleConfig::default() };
    let handle = ScaleHandle::new(ScalePolicy::new(config).expect("policy"));
    handle.update_population(population);
    handle
}

fn agents(start_id: u64, count: usize, region: u32, profession: Profession) -> Vec<AgentSample> {
    (0..count)
        .map(|i| AgentSample {
            id: start_id + i as u64,
            region: RegionId(region),
            profession,
            wealth: 100.0 + i as f64,
            happiness: 60.0,
            age: 30.0,
            employed: profession != Profession::Unemployed,
        })
        .collect()
}

fn neutral_signals(regions: &[u32]) -> BTreeMap<RegionId, RegionSignals> {
    regions.iter().map(|r| (RegionId(*r), RegionSignals::default())).collect()
}

/// Every supplied agent lands in exactly one cohort.
#[test]
fn cohort_sizes_sum_to_agents_supplied() {
    let mut population = agents(1, 250, 0, Profession::Farmer);
    population.extend(agents(1_000, 40, 0, Profession::Merchant));
    population.extend(agents(2_000, 130, 1, Profession::Laborer));

    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    let report = aggregator
        .rebuild_cohorts(&population, &neutral_signals(&[0, 1]), 0)
        .expect("first rebuild is never debounced");

    assert!(!report.sampled);
    assert_eq!(report.agents_in, 420);
    assert_eq!(report.cohort_population, 420);
    let total: u64 = aggregator.cohorts().iter().map(|c| c.size).sum();
    assert_eq!(total, 420);
}

/// Target size 100: 250 farmers shard into 100/100/50, 130 laborers stay whole.
#[test]
fn oversized_groups_are_sharded() {
    let mut population = agents(1, 250, 0, Profession::Farmer);
    population.extend(agents(2_000, 130, 1, Profession::Laborer));

    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&population, &neutral_signals(&[0, 1]), 0);

    let farmer_sizes: Vec<u64> = aggregator.cohorts_in(RegionId(0)).iter().map(|c| c.size).collect();
    assert_eq!(farmer_sizes, vec![100, 100, 50]);
    let laborers = aggregator.cohorts_in(RegionId(1));
    assert_eq!(laborers.len(), 1);
    assert_eq!(laborers[0].size, 130);
}

#[test]
fn rebuild_is_debounced_by_simulated_time() {
    let population = agents(1, 10, 0, Profession::Farmer);
    let signals = neutral_signals(&[0]);
    let mut aggregator = CohortAggregator::new(handle(50_000, 5_000), EconomyConfig::default());

    assert!(aggregator.rebuild_cohorts(&population, &signals, 1_000).is_some());
    assert!(aggregator.rebuild_cohorts(&[], &signals, 3_000).is_none());
    assert_eq!(aggregator.cohort_count(), 1, "debounced call must not touch cohorts");
    assert!(aggregator.rebuild_cohorts(&[], &signals, 6_000).is_some());
    assert_eq!(aggregator.cohort_count(), 0);
}

/// Yields scale with cohort size and infrastructure; consumption with size.
#[test]
fn economy_sums_cohort_production() {
    let mut signals = neutral_signals(&[0]);
    signals.insert(RegionId(0), RegionSignals { infrastructure: 100.0, ..RegionSignals::default() });
    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&agents(1, 100, 0, Profession::Farmer), &signals, 0);

    let economy = aggregator.regional_economy(RegionId(0), 0).expect("economy");
    assert_eq!(economy.population, 100);
    // 3 food × 100 workers × (0.5 + 100/200) productivity.
    assert!((economy.production[&Resource::Food] - 300.0).abs() < 1e-9);
    assert!((economy.consumption[&Resource::Food] - 100.0).abs() < 1e-9);
    assert!((economy.balance_of(Resource::Food) - 200.0).abs() < 1e-9);
    assert_eq!(economy.unemployment_rate, 0.0);
}

#[test]
fn region_without_cohorts_has_no_economy() {
    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&agents(1, 5, 0, Profession::Farmer), &neutral_signals(&[0]), 0);
    assert!(aggregator.regional_economy(RegionId(7), 0).is_none());
}

/// Inside the TTL the cached snapshot is returned unchanged, even after a
/// rebuild; once it expires the next read recomputes.
#[test]
fn economy_cache_holds_until_ttl_expires() {
    let signals = neutral_signals(&[0]);
    let scale = handle(50_000, 0);
    let ttl = scale.cache_ttl_ms();
    let mut aggregator = CohortAggregator::new(scale, EconomyConfig::default());
    aggregator.rebuild_cohorts(&agents(1, 100, 0, Profession::Farmer), &signals, 0);

    let first = aggregator.regional_economy(RegionId(0), 0).expect("economy");
    assert_eq!(first.valid_until, ttl);

    aggregator.rebuild_cohorts(&agents(1, 40, 0, Profession::Farmer), &signals, 10);
    let second = aggregator.regional_economy(RegionId(0), ttl - 1).expect("economy");
    assert_eq!(first, second);

    let third = aggregator.regional_economy(RegionId(0), ttl).expect("economy");
    assert_eq!(third.population, 40);
    assert_eq!(third.computed_at, ttl);
    assert!(third.valid_until > ttl);
}

/// A trade moves surplus; it never creates goods.
#[test]
fn trade_conserves_resources() {
    let mut population = agents(1, 100, 0, Profession::Farmer);
    population.extend(agents(500, 100, 1, Profession::Scholar));

    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&population, &neutral_signals(&[0, 1]), 0);
    aggregator.add_trade_route(TradeRoute {
        route_id: "grain".into(),
        from: RegionId(0),
        to: RegionId(1),
        resource: Resource::Food,
        efficiency: 0.5,
    });

    let food = |agg: &mut CohortAggregator, r: u32| {
        agg.regional_economy(RegionId(r), 0).expect("economy").balance_of(Resource::Food)
    };
    let before_source = food(&mut aggregator, 0);
    let before_dest = food(&mut aggregator, 1);
    assert!(before_source > 0.0 && before_dest < 0.0);

    let outcome = aggregator.process_trade("grain", 80.0, 0).expect("trade executes");
    assert!((outcome.amount - 40.0).abs() < 1e-9);

    let after_source = food(&mut aggregator, 0);
    let after_dest = food(&mut aggregator, 1);
    assert!((after_source - (before_source - 40.0)).abs() < 1e-9);
    assert!((after_dest - (before_dest + 40.0)).abs() < 1e-9);
    assert!(((after_source + after_dest) - (before_source + before_dest)).abs() < 1e-9);
}

#[test]
fn trade_needs_surplus_at_source_and_deficit_at_destination() {
    let mut population = agents(1, 100, 0, Profession::Farmer);
    population.extend(agents(500, 100, 1, Profession::Scholar));

    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&population, &neutral_signals(&[0, 1]), 0);
    aggregator.add_trade_route(TradeRoute {
        route_id: "backwards".into(),
        from: RegionId(1),
        to: RegionId(0),
        resource: Resource::Food,
        efficiency: 1.0,
    });

    assert!(aggregator.process_trade("backwards", 50.0, 0).is_none());
    assert!(aggregator.process_trade("no-such-route", 50.0, 0).is_none());
}

/// The transfer is capped by what the source can spare.
#[test]
fn trade_is_capped_by_surplus() {
    let mut population = agents(1, 10, 0, Profession::Farmer);
    population.extend(agents(500, 100, 1, Profession::Scholar));

    let mut aggregator = CohortAggregator::new(handle(50_000, 0), EconomyConfig::default());
    aggregator.rebuild_cohorts(&population, &neutral_signals(&[0, 1]), 0);
    aggregator.add_trade_route(TradeRoute {
        route_id: "grain".into(),
        from: RegionId(0),
        to: RegionId(1),
        resource: Resource::Food,
        efficiency: 1.0,
    });

    let surplus = aggregator
        .regional_economy(RegionId(0), 0)
        .expect("economy")
        .balance_of(Resource::Food);
    let outcome = aggregator.process_trade("grain", 10_000.0, 0).expect("trade");
    assert!((outcome.amount - surplus).abs() < 1e-9);
    assert!(aggregator.process_trade("grain", 10.0, 0).is_none(), "source is drained");
}
