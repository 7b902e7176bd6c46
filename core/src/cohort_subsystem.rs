//! Cohort aggregation subsystem: agents in, regional economies out.
//!
//! This subsystem:
//!   1. Groups raw agent samples by (region, profession)
//!   2. Splits oversized groups into fixed-size shards
//!   3. Derives cohort production/consumption from the yield table
//!   4. Rolls cohorts up into cached per-region economies
//!   5. Moves existing surplus along configured trade routes
//!
//! Execution: every tick; the rebuild itself is debounced by the
//! policy's cohort update interval.
//!
//! RULE: cohorts are rebuilt, never patched. A rebuild discards every
//! cohort of the previous pass; no cohort identity survives a tick.
//! RULE: this is the only subsystem that mutates the cohort and economy
//! maps. Everything handed out is a clone.

use crate::{
    config::EconomyConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    frame::{AgentSample, RegionSignals, TickContext},
    rng::SubsystemRng,
    scale_policy::ScaleHandle,
    subsystem::{decode_entry, encode_entry, SimSubsystem, StateEntry},
    types::{Millis, Profession, RegionId, Resource, ResourceMap},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Groups above `target × SHARD_TRIGGER` are split into shards.
const SHARD_TRIGGER: f64 = 1.5;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CohortKey {
    pub region:     RegionId,
    pub profession: Profession,
    pub shard:      u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub key:               CohortKey,
    pub size:              u64,
    pub average_wealth:    f64,
    pub average_happiness: f64,
    pub average_age:       f64,
    pub employment_rate:   f64,
    pub production:        ResourceMap,
    pub consumption:       ResourceMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalEconomy {
    pub region:            RegionId,
    pub population:        u64,
    pub gdp:               f64,
    pub production:        ResourceMap,
    pub consumption:       ResourceMap,
    /// production − consumption, after trades.
    pub balance:           ResourceMap,
    pub wealth_per_capita: f64,
    pub unemployment_rate: f64,
    pub computed_at:       Millis,
    pub valid_until:       Millis,
}

impl RegionalEconomy {
    pub fn balance_of(&self, resource: Resource) -> f64 {
        self.balance.get(&resource).copied().unwrap_or(0.0)
    }

    pub fn is_valid_at(&self, now_ms: Millis) -> bool {
        now_ms < self.valid_until
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRoute {
    pub route_id:   String,
    pub from:       RegionId,
    pub to:         RegionId,
    pub resource:   Resource,
    /// Share of a request that can be moved in one trade, in [0, 1].
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub route_id: String,
    pub from:     RegionId,
    pub to:       RegionId,
    pub resource: Resource,
    pub amount:   f64,
}

/// What a rebuild pass did. `sampled` is always false: every supplied
/// agent lands in exactly one cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub agents_in:         u64,
    pub cohort_population: u64,
    pub cohorts:           usize,
    pub sampled:           bool,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

pub struct CohortAggregator {
    scale:           ScaleHandle,
    config:          EconomyConfig,
    cohorts:         BTreeMap<CohortKey, Cohort>,
    economies:       BTreeMap<RegionId, RegionalEconomy>,
    trade_routes:    BTreeMap<String, TradeRoute>,
    /// Net resource moved by trades since the last rebuild.
    trade_ledger:    BTreeMap<RegionId, ResourceMap>,
    last_rebuild_ms: Option<Millis>,
}

impl CohortAggregator {
    pub fn new(scale: ScaleHandle, config: EconomyConfig) -> Self {
        let trade_routes = config
            .trade_routes
            .iter()
            .map(|r| (r.route_id.clone(), r.clone()))
            .collect();
        Self {
            scale,
            config,
            cohorts: BTreeMap::new(),
            economies: BTreeMap::new(),
            trade_routes,
            trade_ledger: BTreeMap::new(),
            last_rebuild_ms: None,
        }
    }

    /// Regroup `agents` into cohorts. Returns `None` without touching any
    /// state when called again inside the update interval.
    pub fn rebuild_cohorts(
        &mut self,
        agents: &[AgentSample],
        signals: &BTreeMap<RegionId, RegionSignals>,
        now_ms: Millis,
    ) -> Option<RebuildReport> {
        if let Some(last) = self.last_rebuild_ms {
            if now_ms.saturating_sub(last) < self.scale.cohort_update_interval_ms() {
                return None;
            }
        }

        let mut groups: BTreeMap<(RegionId, Profession), Vec<&AgentSample>> = BTreeMap::new();
        for agent in agents {
            groups.entry((agent.region, agent.profession)).or_default().push(agent);
        }

        let target = self.scale.cohort_target_size().max(1) as usize;
        let mut cohorts = BTreeMap::new();
        for ((region, profession), members) in &groups {
            let productivity = signals
                .get(region)
                .map(|s| 0.5 + s.infrastructure.clamp(0.0, 100.0) / 200.0)
                .unwrap_or(1.0);

            let shards: Vec<&[&AgentSample]> = if members.len() as f64 > target as f64 * SHARD_TRIGGER {
                members.chunks(target).collect()
            } else {
                vec![members.as_slice()]
            };

            for (shard, shard_members) in shards.into_iter().enumerate() {
                let key = CohortKey { region: *region, profession: *profession, shard: shard as u32 };
                cohorts.insert(key, self.build_cohort(key, shard_members, productivity));
            }
        }

        self.cohorts = cohorts;
        self.trade_ledger.clear();
        self.last_rebuild_ms = Some(now_ms);

        let cohort_population = self.cohorts.values().map(|c| c.size).sum();
        Some(RebuildReport {
            agents_in: agents.len() as u64,
            cohort_population,
            cohorts: self.cohorts.len(),
            sampled: false,
        })
    }

    fn build_cohort(&self, key: CohortKey, members: &[&AgentSample], productivity: f64) -> Cohort {
        let size = members.len() as u64;
        let n = members.len() as f64;
        let mean = |f: fn(&AgentSample) -> f64| members.iter().map(|a| f(a)).sum::<f64>() / n;

        let production = self
            .config
            .profession_yields
            .get(&key.profession)
            .map(|yields| {
                yields
                    .iter()
                    .map(|(res, per_worker)| (*res, per_worker * n * productivity))
                    .collect()
            })
            .unwrap_or_default();
        let consumption = self
            .config
            .per_capita_consumption
            .iter()
            .map(|(res, per_capita)| (*res, per_capita * n))
            .collect();

        Cohort {
            key,
            size,
            average_wealth:    mean(|a| a.wealth),
            average_happiness: mean(|a| a.happiness),
            average_age:       mean(|a| a.age),
            employment_rate:   members.iter().filter(|a| a.employed).count() as f64 / n,
            production,
            consumption,
        }
    }

    /// The region's economy as of `now_ms`. Served from cache while
    /// `now_ms < valid_until`; recomputed from cohorts otherwise.
    /// Returns `None` for a region with no cohorts.
    pub fn regional_economy(&mut self, region: RegionId, now_ms: Millis) -> Option<RegionalEconomy> {
        if let Some(cached) = self.economies.get(&region) {
            if cached.is_valid_at(now_ms) {
                return Some(cached.clone());
            }
        }

        let Some(mut economy) = self.compute_economy(region, now_ms) else {
            self.economies.remove(&region);
            return None;
        };
        let previous_valid_until = self.economies.get(&region).map(|e| e.valid_until).unwrap_or(0);
        economy.valid_until = now_ms
            .saturating_add(self.scale.cache_ttl_ms())
            .max(previous_valid_until);
        self.economies.insert(region, economy.clone());
        Some(economy)
    }

    fn compute_economy(&self, region: RegionId, now_ms: Millis) -> Option<RegionalEconomy> {
        let mut population = 0u64;
        let mut gdp = 0.0;
        let mut employed = 0.0;
        let mut production = ResourceMap::new();
        let mut consumption = ResourceMap::new();

        for cohort in self.cohorts.range(region_range(region)).map(|(_, c)| c) {
            let size = cohort.size as f64;
            population += cohort.size;
            gdp += cohort.average_wealth * size;
            employed += cohort.employment_rate * size;
            for (res, qty) in &cohort.production {
                *production.entry(*res).or_insert(0.0) += qty;
            }
            for (res, qty) in &cohort.consumption {
                *consumption.entry(*res).or_insert(0.0) += qty;
            }
        }
        if population == 0 {
            return None;
        }

        let mut balance = ResourceMap::new();
        for res in production.keys().chain(consumption.keys()) {
            let produced = production.get(res).copied().unwrap_or(0.0);
            let consumed = consumption.get(res).copied().unwrap_or(0.0);
            balance.insert(*res, produced - consumed);
        }
        if let Some(adjustments) = self.trade_ledger.get(&region) {
            for (res, delta) in adjustments {
                *balance.entry(*res).or_insert(0.0) += delta;
            }
        }

        let pop = population as f64;
        Some(RegionalEconomy {
            region,
            population,
            gdp,
            production,
            consumption,
            balance,
            wealth_per_capita: gdp / pop,
            unemployment_rate: (1.0 - employed / pop).clamp(0.0, 1.0),
            computed_at: now_ms,
            valid_until: now_ms,
        })
    }

    pub fn add_trade_route(&mut self, route: TradeRoute) {
        self.trade_routes.insert(route.route_id.clone(), route);
    }

    /// Move surplus along a route. Moves
    /// `min(requested × efficiency, source surplus)` and nothing when the
    /// source has no surplus or the destination no deficit.
    pub fn process_trade(&mut self, route_id: &str, requested: f64, now_ms: Millis) -> Option<TradeOutcome> {
        let route = self.trade_routes.get(route_id)?.clone();
        if requested <= 0.0 || route.from == route.to {
            return None;
        }
        let source = self.regional_economy(route.from, now_ms)?;
        let destination = self.regional_economy(route.to, now_ms)?;

        let surplus = source.balance_of(route.resource);
        if surplus <= 0.0 || destination.balance_of(route.resource) >= 0.0 {
            return None;
        }
        let amount = (requested * route.efficiency.clamp(0.0, 1.0)).min(surplus);
        if amount <= 0.0 {
            return None;
        }

        for (region, delta) in [(route.from, -amount), (route.to, amount)] {
            *self.trade_ledger.entry(region).or_default().entry(route.resource).or_insert(0.0) += delta;
            if let Some(cached) = self.economies.get_mut(&region) {
                *cached.balance.entry(route.resource).or_insert(0.0) += delta;
            }
        }

        Some(TradeOutcome {
            route_id: route.route_id,
            from:     route.from,
            to:       route.to,
            resource: route.resource,
            amount,
        })
    }

    // ── Read-only accessors ──────────────────────────────────────────────

    /// Regions that currently have at least one cohort.
    pub fn regions(&self) -> Vec<RegionId> {
        let mut regions: Vec<RegionId> = self.cohorts.keys().map(|k| k.region).collect();
        regions.dedup();
        regions
    }

    pub fn cohorts(&self) -> Vec<Cohort> {
        self.cohorts.values().cloned().collect()
    }

    pub fn cohorts_in(&self, region: RegionId) -> Vec<Cohort> {
        self.cohorts.range(region_range(region)).map(|(_, c)| c.clone()).collect()
    }

    pub fn cohort_count(&self) -> usize {
        self.cohorts.len()
    }

    /// The cached snapshot, if any, without recomputing or checking expiry.
    pub fn cached_economy(&self, region: RegionId) -> Option<RegionalEconomy> {
        self.economies.get(&region).cloned()
    }

    pub fn trade_routes(&self) -> Vec<TradeRoute> {
        self.trade_routes.values().cloned().collect()
    }

    pub fn last_rebuild_ms(&self) -> Option<Millis> {
        self.last_rebuild_ms
    }
}

fn region_range(region: RegionId) -> std::ops::RangeInclusive<CohortKey> {
    let first = CohortKey { region, profession: Profession::ALL[0], shard: 0 };
    let last = CohortKey {
        region,
        profession: Profession::ALL[Profession::ALL.len() - 1],
        shard: u32::MAX,
    };
    first..=last
}

// ── Subsystem ────────────────────────────────────────────────────────────────

impl SimSubsystem for CohortAggregator {
    fn name(&self) -> &'static str { "cohort" }

    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        _events_in: &[SimEvent],
        _rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>> {
        let tick = ctx.tick;
        let mut out = Vec::new();

        if let Some(report) = self.rebuild_cohorts(&ctx.frame.agents, &ctx.frame.region_signals, ctx.now_ms) {
            log::debug!(
                "tick={tick} cohort: rebuilt {} cohorts from {} agents",
                report.cohorts, report.agents_in
            );
            out.push(SimEvent::CohortsRebuilt {
                tick,
                cohorts: report.cohorts,
                agents: report.agents_in,
                cohort_population: report.cohort_population,
            });
        }

        for request in &ctx.frame.trade_requests {
            match self.process_trade(&request.route_id, request.amount, ctx.now_ms) {
                Some(trade) => {
                    log::debug!(
                        "tick={tick} cohort: trade {} moved {:.2} {} {} -> {}",
                        trade.route_id, trade.amount, trade.resource.as_str(), trade.from, trade.to
                    );
                    out.push(SimEvent::TradeExecuted {
                        tick,
                        route_id: trade.route_id,
                        from:     trade.from,
                        to:       trade.to,
                        resource: trade.resource,
                        amount:   trade.amount,
                    });
                }
                None => log::debug!("tick={tick} cohort: trade {} skipped", request.route_id),
            }
        }

        for region in self.regions() {
            if let Some(economy) = self.regional_economy(region, ctx.now_ms) {
                out.push(SimEvent::RegionalEconomyComputed { tick, economy });
            }
        }

        Ok(out)
    }

    fn export_state(&self) -> SimResult<Vec<StateEntry>> {
        let mut entries = Vec::with_capacity(self.cohorts.len() + self.economies.len() + 1);
        for (key, cohort) in &self.cohorts {
            entries.push(encode_entry(
                format!("cohort/{}/{}/{}", key.region.0, key.profession.as_str(), key.shard),
                cohort,
            )?);
        }
        for (region, economy) in &self.economies {
            entries.push(encode_entry(format!("economy/{}", region.0), economy)?);
        }
        for (region, adjustments) in &self.trade_ledger {
            entries.push(encode_entry(format!("ledger/{}", region.0), adjustments)?);
        }
        for (id, route) in &self.trade_routes {
            entries.push(encode_entry(format!("route/{id}"), route)?);
        }
        entries.push(encode_entry("meta/last_rebuild_ms".into(), &self.last_rebuild_ms)?);
        Ok(entries)
    }

    /// Economies come back invalidated: the next read recomputes them
    /// from the restored cohorts and ledger.
    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()> {
        let name = self.name();
        self.cohorts.clear();
        self.economies.clear();
        self.trade_ledger.clear();
        self.trade_routes.clear();
        self.last_rebuild_ms = None;

        for entry in entries {
            let (kind, rest) = entry.0.split_once('/').unwrap_or((entry.0.as_str(), ""));
            match kind {
                "cohort" => {
                    let cohort: Cohort = decode_entry(name, entry)?;
                    self.cohorts.insert(cohort.key, cohort);
                }
                "economy" => {
                    let mut economy: RegionalEconomy = decode_entry(name, entry)?;
                    economy.valid_until = 0;
                    self.economies.insert(economy.region, economy);
                }
                "ledger" => {
                    let region = parse_region(name, entry, rest)?;
                    self.trade_ledger.insert(region, decode_entry(name, entry)?);
                }
                "route" => {
                    let route: TradeRoute = decode_entry(name, entry)?;
                    self.trade_routes.insert(route.route_id.clone(), route);
                }
                "meta" if rest == "last_rebuild_ms" => {
                    self.last_rebuild_ms = decode_entry(name, entry)?;
                }
                _ => log::debug!("cohort: ignoring unknown state entry {}", entry.0),
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}

fn parse_region(component: &str, entry: &StateEntry, raw: &str) -> SimResult<RegionId> {
    raw.parse::<u32>().map(RegionId).map_err(|_| SimError::MalformedState {
        component: component.to_string(),
        key:       entry.0.clone(),
    })
}
