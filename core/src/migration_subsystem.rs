//! Migration subsystem: region attractiveness, migration pressure and
//! rate-capped flow planning.
//!
//! Execution: every `update_interval_ticks` ticks, after the cohort
//! subsystem has published this tick's regional economies.
//!
//! RULE: the engine plans flows; it never moves anyone. Callers read
//! `MigrationPlanned` events and apply the population deltas themselves.

use crate::{
    cohort_subsystem::RegionalEconomy,
    config::MigrationConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    frame::{RegionSignals, TickContext},
    rng::SubsystemRng,
    subsystem::{decode_entry, encode_entry, SimSubsystem, StateEntry},
    types::{RegionId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const ECONOMIC_WEIGHT:    f64 = 0.35;
pub const SAFETY_WEIGHT:      f64 = 0.25;
pub const OPPORTUNITY_WEIGHT: f64 = 0.25;
pub const QUALITY_WEIGHT:     f64 = 0.15;

/// An origin sub-score below this turns a safety gap into `War` and an
/// economic gap into `Famine`.
const SEVERE_ORIGIN_SCORE: f64 = 30.0;

/// Used when a region reports no employment or wage figure at all.
const NEUTRAL_EMPLOYMENT: f64 = 0.5;
const NEUTRAL_WAGE_RATIO: f64 = 0.5;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionAttractiveness {
    pub economic:        f64,
    pub safety:          f64,
    pub opportunity:     f64,
    pub quality_of_life: f64,
    pub total:           f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReasonKind {
    War,
    Safety,
    Famine,
    Economic,
    Opportunity,
    QualityOfLife,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MigrationReason {
    pub kind:     MigrationReasonKind,
    /// The pressure that produced the flow, in [0, 100].
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFlow {
    pub from:   RegionId,
    pub to:     RegionId,
    pub count:  u64,
    pub reason: MigrationReason,
    pub tick:   Tick,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationOrigin {
    pub region:         RegionId,
    pub population:     u64,
    pub attractiveness: RegionAttractiveness,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MigrationCandidate {
    pub region:              RegionId,
    pub attractiveness:      RegionAttractiveness,
    pub distance:            f64,
    pub cultural_similarity: f64,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct MigrationEngine {
    config:  MigrationConfig,
    history: VecDeque<MigrationFlow>,
}

impl MigrationEngine {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config, history: VecDeque::new() }
    }

    pub fn attractiveness(&self, signals: &RegionSignals) -> RegionAttractiveness {
        let employment = signals.employment_rate.unwrap_or(NEUTRAL_EMPLOYMENT).clamp(0.0, 1.0);
        let wage_ratio = match signals.avg_wage {
            Some(wage) if self.config.reference_wage > 0.0 => (wage / self.config.reference_wage).clamp(0.0, 1.0),
            _ => NEUTRAL_WAGE_RATIO,
        };

        let economic = clamp_score(0.6 * employment * 100.0 + 0.4 * wage_ratio * 100.0);
        let safety = clamp_score(signals.safety);
        let opportunity = clamp_score(0.6 * signals.infrastructure + 0.4 * employment * 100.0);
        let quality_of_life = clamp_score(
            0.5 * signals.food + 0.2 * signals.infrastructure + 0.3 * (100.0 - signals.disease),
        );
        let total = economic * ECONOMIC_WEIGHT
            + safety * SAFETY_WEIGHT
            + opportunity * OPPORTUNITY_WEIGHT
            + quality_of_life * QUALITY_WEIGHT;

        RegionAttractiveness { economic, safety, opportunity, quality_of_life, total }
    }

    /// Pull from `from` toward `to`. Zero unless `to` is strictly more
    /// attractive; distance dampens, cultural similarity scales.
    pub fn pressure(
        &self,
        from: &RegionAttractiveness,
        to: &RegionAttractiveness,
        distance: f64,
        cultural_similarity: f64,
    ) -> f64 {
        if to.total <= from.total {
            return 0.0;
        }
        let diff = to.total - from.total;
        let distance_factor = 1.0 / (1.0 + distance.max(0.0) / self.config.distance_scale.max(f64::EPSILON));
        let culture_factor = 0.5 + 0.5 * cultural_similarity.clamp(0.0, 1.0);
        clamp_score(diff * distance_factor * culture_factor)
    }

    /// Split this tick's migrant budget across the neighbours whose
    /// pressure exceeds the materiality floor. Counts round down, so the
    /// batch never exceeds `min(population × base_rate, per_tick_cap)`.
    pub fn plan_migrations(
        &self,
        origin: &MigrationOrigin,
        candidates: &[MigrationCandidate],
        tick: Tick,
    ) -> Vec<MigrationFlow> {
        let budget = self.migrant_budget(origin.population);
        if budget == 0 {
            return vec![];
        }

        let pressured: Vec<(&MigrationCandidate, f64)> = candidates
            .iter()
            .filter(|c| c.region != origin.region)
            .map(|c| {
                let p = self.pressure(&origin.attractiveness, &c.attractiveness, c.distance, c.cultural_similarity);
                (c, p)
            })
            .filter(|(_, p)| *p > self.config.materiality_floor)
            .collect();

        let total_pressure: f64 = pressured.iter().map(|(_, p)| p).sum();
        if total_pressure <= 0.0 {
            return vec![];
        }

        pressured
            .into_iter()
            .filter_map(|(candidate, pressure)| {
                let count = (budget as f64 * pressure / total_pressure).floor() as u64;
                (count > 0).then(|| MigrationFlow {
                    from: origin.region,
                    to: candidate.region,
                    count,
                    reason: MigrationReason {
                        kind: reason_kind(&origin.attractiveness, &candidate.attractiveness),
                        strength: pressure,
                    },
                    tick,
                })
            })
            .collect()
    }

    pub fn migrant_budget(&self, population: u64) -> u64 {
        let by_rate = (population as f64 * self.config.base_rate.max(0.0)).floor() as u64;
        by_rate.min(self.config.per_tick_cap)
    }

    /// Append to the bounded history, evicting the oldest flows.
    pub fn record_flows(&mut self, flows: &[MigrationFlow]) {
        for flow in flows {
            self.history.push_back(flow.clone());
        }
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<MigrationFlow> {
        self.history.iter().cloned().collect()
    }

    /// Arrivals minus departures over the retained history.
    pub fn net_migration(&self, region: RegionId) -> i64 {
        self.history.iter().fold(0i64, |net, f| {
            if f.to == region {
                net + f.count as i64
            } else if f.from == region {
                net - f.count as i64
            } else {
                net
            }
        })
    }

    pub fn recent_flows(&self, region: RegionId) -> Vec<MigrationFlow> {
        self.history
            .iter()
            .filter(|f| f.from == region || f.to == region)
            .cloned()
            .collect()
    }
}

/// The sub-score with the largest gain wins.
/// Ties resolve safety, then economic, then opportunity, then quality of life.
fn reason_kind(origin: &RegionAttractiveness, dest: &RegionAttractiveness) -> MigrationReasonKind {
    let safety = if origin.safety < SEVERE_ORIGIN_SCORE {
        MigrationReasonKind::War
    } else {
        MigrationReasonKind::Safety
    };
    let economic = if origin.economic < SEVERE_ORIGIN_SCORE {
        MigrationReasonKind::Famine
    } else {
        MigrationReasonKind::Economic
    };
    let ranked = [
        (dest.safety - origin.safety, safety),
        (dest.economic - origin.economic, economic),
        (dest.opportunity - origin.opportunity, MigrationReasonKind::Opportunity),
        (dest.quality_of_life - origin.quality_of_life, MigrationReasonKind::QualityOfLife),
    ];

    let mut best = ranked[0];
    for candidate in &ranked[1..] {
        if candidate.0 > best.0 {
            best = *candidate;
        }
    }
    best.1
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}

/// Collect the flows planned in a tick's events.
pub fn flows_in(events: &[SimEvent]) -> Vec<MigrationFlow> {
    events
        .iter()
        .filter_map(|e| match e {
            SimEvent::MigrationPlanned { flow, .. } => Some(flow.clone()),
            _ => None,
        })
        .collect()
}

// ── Subsystem ────────────────────────────────────────────────────────────────

impl SimSubsystem for MigrationEngine {
    fn name(&self) -> &'static str { "migration" }

    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        events_in: &[SimEvent],
        _rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>> {
        let tick = ctx.tick;
        if self.config.update_interval_ticks == 0 || tick % self.config.update_interval_ticks != 0 {
            return Ok(vec![]);
        }

        let economies: BTreeMap<RegionId, &RegionalEconomy> = events_in
            .iter()
            .filter_map(|e| match e {
                SimEvent::RegionalEconomyComputed { economy, .. } => Some((economy.region, economy)),
                _ => None,
            })
            .collect();
        if economies.is_empty() {
            return Ok(vec![]);
        }

        // Economy figures stand in for any employment or wage signal the
        // caller left empty.
        let mut scores = BTreeMap::new();
        let regions = ctx.frame.region_signals.keys().chain(economies.keys());
        for region in regions {
            let mut signals = ctx.frame.region_signals.get(region).copied().unwrap_or_default();
            if let Some(economy) = economies.get(region) {
                signals.employment_rate.get_or_insert(1.0 - economy.unemployment_rate);
                signals.avg_wage.get_or_insert(economy.wealth_per_capita);
            }
            scores.insert(*region, self.attractiveness(&signals));
        }

        let mut candidates: BTreeMap<RegionId, Vec<MigrationCandidate>> = BTreeMap::new();
        for link in &ctx.frame.region_links {
            for (origin, dest) in [(link.a, link.b), (link.b, link.a)] {
                if let Some(attractiveness) = scores.get(&dest) {
                    candidates.entry(origin).or_default().push(MigrationCandidate {
                        region: dest,
                        attractiveness: *attractiveness,
                        distance: link.distance,
                        cultural_similarity: link.cultural_similarity,
                    });
                }
            }
        }

        let sample_scale = sample_scale(ctx.frame.population_override, ctx.frame.agents.len());
        let mut out = Vec::new();
        for (region, economy) in &economies {
            let (Some(attractiveness), Some(neighbours)) = (scores.get(region), candidates.get(region)) else {
                continue;
            };
            let origin = MigrationOrigin {
                region: *region,
                population: (economy.population as f64 * sample_scale).round() as u64,
                attractiveness: *attractiveness,
            };
            let flows = self.plan_migrations(&origin, neighbours, tick);
            self.record_flows(&flows);
            for flow in flows {
                log::debug!(
                    "tick={tick} migration: {} -> {} count={} reason={:?}",
                    flow.from, flow.to, flow.count, flow.reason.kind
                );
                out.push(SimEvent::MigrationPlanned { tick, flow });
            }
        }

        Ok(out)
    }

    fn export_state(&self) -> SimResult<Vec<StateEntry>> {
        self.history
            .iter()
            .enumerate()
            .map(|(i, flow)| encode_entry(format!("flow/{i:08}"), flow))
            .collect()
    }

    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()> {
        let name = self.name();
        let mut indexed = Vec::new();
        for entry in entries {
            let Some(raw) = entry.0.strip_prefix("flow/") else {
                continue;
            };
            let index: usize = raw.parse().map_err(|_| SimError::MalformedState {
                component: name.to_string(),
                key:       entry.0.clone(),
            })?;
            let flow: MigrationFlow = decode_entry(name, entry)?;
            indexed.push((index, flow));
        }
        indexed.sort_by_key(|(i, _)| *i);
        self.history = indexed.into_iter().map(|(_, f)| f).collect();
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}

/// How many real people one sampled agent stands for.
fn sample_scale(population_override: Option<u64>, sampled: usize) -> f64 {
    match population_override {
        Some(total) if sampled > 0 => total as f64 / sampled as f64,
        _ => 1.0,
    }
}
