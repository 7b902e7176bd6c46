//! Mobility subsystem: career and class transitions.
//!
//! Careers move along a directed graph of `CareerPath`s. A pair with no
//! path has probability exactly zero: some jumps need an intermediate
//! step. The same probability function drives both regimes:
//!   - aggregate: expected transition counts from a profession
//!     distribution and population averages (no dice);
//!   - individual: one draw per named agent.
//!
//! Execution: every `update_interval_ticks` ticks. Individual attempts
//! run in `full` mode when the frame names candidates; otherwise the
//! aggregate batch runs.

use crate::{
    config::{MobilityConfig, RequirementPenalties},
    error::{SimError, SimResult},
    event::SimEvent,
    frame::TickContext,
    rng::SubsystemRng,
    scale_policy::{ScaleHandle, ScaleMode},
    subsystem::{decode_entry, encode_entry, SimSubsystem, StateEntry},
    types::{AgentId, Profession, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

// ── Public types ─────────────────────────────────────────────────────────────

/// Six ordered classes, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialClass {
    Destitute,
    Peasant,
    Worker,
    Burgher,
    Gentry,
    Nobility,
}

/// Membership rule for one class: a wealth floor plus the professions
/// that may hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTier {
    pub class:       SocialClass,
    pub min_wealth:  f64,
    pub professions: Vec<Profession>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathRequirements {
    pub education:   Option<f64>,
    pub wealth:      Option<f64>,
    pub connections: Option<f64>,
    /// Inclusive (min, max) age.
    pub age_range:   Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerPath {
    pub from:         Profession,
    pub to:           Profession,
    /// 0 = trivial, 100 = impossible.
    pub difficulty:   f64,
    #[serde(default)]
    pub requirements: PathRequirements,
}

/// Inputs to the probability function, for one agent or a population average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub education:   f64,
    pub wealth:      f64,
    pub connections: f64,
    pub age:         f64,
    /// Regional stability in [0, 100].
    pub stability:   f64,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self { education: 0.0, wealth: 0.0, connections: 0.0, age: 30.0, stability: 50.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityReason {
    Promotion,
    Lateral,
    Demotion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobilityEvent {
    /// Present only for individual attempts.
    pub agent_id:        Option<AgentId>,
    pub from_profession: Profession,
    pub to_profession:   Profession,
    pub from_class:      SocialClass,
    pub to_class:        SocialClass,
    pub reason:          MobilityReason,
    pub tick:            Tick,
    pub success:         bool,
    /// Agents covered by this record: 1 for individual attempts.
    pub count:           u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathTransition {
    pub from:     Profession,
    pub to:       Profession,
    /// Agents attempting this path (fractional: attempts are split evenly).
    pub attempts: f64,
    pub count:    u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub attempts:    BTreeMap<Profession, u64>,
    pub transitions: Vec<PathTransition>,
    /// One aggregate record per non-empty transition, `agent_id = None`.
    pub events:      Vec<MobilityEvent>,
}

impl BatchOutcome {
    pub fn successes_from(&self, profession: Profession) -> u64 {
        self.transitions.iter().filter(|t| t.from == profession).map(|t| t.count).sum()
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct MobilityEngine {
    scale:   ScaleHandle,
    config:  MobilityConfig,
    paths:   BTreeMap<(Profession, Profession), CareerPath>,
    history: VecDeque<MobilityEvent>,
}

impl MobilityEngine {
    pub fn new(scale: ScaleHandle, mut config: MobilityConfig) -> Self {
        // `class_of` scans tiers highest class first.
        config.class_tiers.sort_by(|a, b| b.class.cmp(&a.class));
        let paths = config
            .career_paths
            .iter()
            .map(|p| ((p.from, p.to), p.clone()))
            .collect();
        Self { scale, config, paths, history: VecDeque::new() }
    }

    /// The only way the path table changes. Replaces an existing
    /// path between the same professions.
    pub fn add_career_path(&mut self, path: CareerPath) {
        self.paths.insert((path.from, path.to), path);
    }

    pub fn career_path(&self, from: Profession, to: Profession) -> Option<&CareerPath> {
        self.paths.get(&(from, to))
    }

    pub fn outgoing_paths(&self, from: Profession) -> Vec<&CareerPath> {
        self.paths.values().filter(|p| p.from == from).collect()
    }

    /// Highest class whose floor and whitelist both match; failing that,
    /// the highest class by wealth alone.
    pub fn class_of(&self, wealth: f64, profession: Profession) -> SocialClass {
        let tiers = &self.config.class_tiers;
        tiers
            .iter()
            .find(|t| wealth >= t.min_wealth && t.professions.contains(&profession))
            .or_else(|| tiers.iter().find(|t| wealth >= t.min_wealth))
            .map(|t| t.class)
            .unwrap_or(SocialClass::Destitute)
    }

    /// Success chance in percent, [0, 100].
    pub fn transition_probability(&self, from: Profession, to: Profession, stats: &AgentStats) -> f64 {
        let Some(path) = self.paths.get(&(from, to)) else {
            return 0.0;
        };
        let mut probability = 100.0 - path.difficulty;
        probability *= requirement_factor(&path.requirements, stats, &self.config.penalties);
        probability *= 0.5 + stats.stability / 100.0;
        if probability.is_nan() { 0.0 } else { probability.clamp(0.0, 100.0) }
    }

    /// Expected transitions for a whole population. For each profession,
    /// `floor(p × rate)` agents attempt, split evenly over its outgoing
    /// paths; each share converts at the path's probability, rounded down.
    /// The unconverted part of each share is kept in history as a failed
    /// aggregate record.
    pub fn process_batch(
        &mut self,
        distribution: &BTreeMap<Profession, u64>,
        avg_stats: &AgentStats,
        yearly_attempt_rate: f64,
        tick: Tick,
    ) -> BatchOutcome {
        let rate = yearly_attempt_rate.clamp(0.0, 1.0);
        let max_records = self.scale.max_events_per_tick();
        let mut outcome = BatchOutcome::default();
        let mut failures = Vec::new();

        'professions: for (&from, &population) in distribution {
            let attempts = (population as f64 * rate).floor() as u64;
            if attempts == 0 {
                continue;
            }
            outcome.attempts.insert(from, attempts);

            let paths = self.outgoing_paths(from);
            if paths.is_empty() {
                continue;
            }
            let share = attempts as f64 / paths.len() as f64;

            for path in paths {
                let probability = self.transition_probability(from, path.to, avg_stats);
                let count = (share * probability / 100.0).floor() as u64;
                if count > 0 {
                    if outcome.transitions.len() >= max_records {
                        log::debug!("tick={tick} mobility: batch capped at {max_records} records");
                        break 'professions;
                    }
                    outcome.transitions.push(PathTransition { from, to: path.to, attempts: share, count });
                    outcome.events.push(self.make_event(None, from, path.to, avg_stats.wealth, tick, true, count));
                }
                let failed = (share.floor() as u64).saturating_sub(count);
                if failed > 0 {
                    failures.push(self.make_event(None, from, path.to, avg_stats.wealth, tick, false, failed));
                }
            }
        }

        // History keeps failed attempts too; only conversions go out as events.
        let mut recorded = outcome.events.clone();
        recorded.append(&mut failures);
        self.record_events(recorded);
        outcome
    }

    /// One named agent tries one path, with a single draw against the
    /// same probability function the batch uses.
    pub fn attempt_single(
        &mut self,
        agent_id: AgentId,
        from: Profession,
        to: Profession,
        stats: &AgentStats,
        rng: &mut SubsystemRng,
        tick: Tick,
    ) -> MobilityEvent {
        let probability = self.transition_probability(from, to, stats);
        let success = rng.next_f64() * 100.0 < probability;
        let event = self.make_event(Some(agent_id), from, to, stats.wealth, tick, success, 1);
        self.record_events(vec![event.clone()]);
        event
    }

    #[allow(clippy::too_many_arguments)]
    fn make_event(
        &self,
        agent_id: Option<AgentId>,
        from: Profession,
        to: Profession,
        wealth: f64,
        tick: Tick,
        success: bool,
        count: u64,
    ) -> MobilityEvent {
        let from_class = self.class_of(wealth, from);
        let to_class = self.class_of(wealth, to);
        let reason = match to_class.cmp(&from_class) {
            std::cmp::Ordering::Greater => MobilityReason::Promotion,
            std::cmp::Ordering::Less    => MobilityReason::Demotion,
            std::cmp::Ordering::Equal   => MobilityReason::Lateral,
        };
        MobilityEvent {
            agent_id,
            from_profession: from,
            to_profession: to,
            from_class,
            to_class,
            reason,
            tick,
            success,
            count,
        }
    }

    fn record_events(&mut self, events: Vec<MobilityEvent>) {
        self.history.extend(events);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<MobilityEvent> {
        self.history.iter().cloned().collect()
    }

    /// Share of recorded agents whose attempt succeeded.
    pub fn success_rate(&self) -> f64 {
        let total: u64 = self.history.iter().map(|e| e.count).sum();
        if total == 0 {
            return 0.0;
        }
        let succeeded: u64 = self.history.iter().filter(|e| e.success).map(|e| e.count).sum();
        succeeded as f64 / total as f64
    }

    pub fn transitions_between(&self, from: Profession, to: Profession) -> u64 {
        self.history
            .iter()
            .filter(|e| e.success && e.from_profession == from && e.to_profession == to)
            .map(|e| e.count)
            .sum()
    }

    fn attempt_rate_per_update(&self) -> f64 {
        let per_year = self.config.ticks_per_year.max(1) as f64;
        self.config.yearly_attempt_rate * self.config.update_interval_ticks as f64 / per_year
    }
}

/// Multiply in one penalty per unmet requirement.
fn requirement_factor(req: &PathRequirements, stats: &AgentStats, penalties: &RequirementPenalties) -> f64 {
    let mut factor = 1.0;
    if req.education.is_some_and(|min| stats.education < min) {
        factor *= penalties.education;
    }
    if req.wealth.is_some_and(|min| stats.wealth < min) {
        factor *= penalties.wealth;
    }
    if req.connections.is_some_and(|min| stats.connections < min) {
        factor *= penalties.connections;
    }
    if req.age_range.is_some_and(|(min, max)| stats.age < min || stats.age > max) {
        factor *= penalties.age;
    }
    factor
}

// ── Subsystem ────────────────────────────────────────────────────────────────

impl SimSubsystem for MobilityEngine {
    fn name(&self) -> &'static str { "mobility" }

    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        _events_in: &[SimEvent],
        rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>> {
        let tick = ctx.tick;
        let interval = self.config.update_interval_ticks;
        if interval == 0 || tick % interval != 0 {
            return Ok(vec![]);
        }
        let rate = self.attempt_rate_per_update();
        let mut out = Vec::new();

        let candidates = &ctx.frame.mobility_candidates;
        if self.scale.mode() == ScaleMode::Full && !candidates.is_empty() {
            let max_events = self.scale.max_events_per_tick();
            for candidate in candidates {
                if out.len() >= max_events {
                    break;
                }
                if !rng.chance(rate) {
                    continue;
                }
                let targets: Vec<Profession> =
                    self.outgoing_paths(candidate.profession).iter().map(|p| p.to).collect();
                if targets.is_empty() {
                    continue;
                }
                let to = targets[rng.index(targets.len())];
                let event = self.attempt_single(candidate.agent_id, candidate.profession, to, &candidate.stats, rng, tick);
                out.push(SimEvent::MobilityTransition { tick, event });
            }
            log::debug!("tick={tick} mobility: {} individual attempts", out.len());
            return Ok(out);
        }

        let distribution = ctx.frame.profession_distribution();
        let outcome = self.process_batch(&distribution, &ctx.frame.population_stats, rate, tick);
        let professions = outcome.attempts.len();
        for event in outcome.events {
            out.push(SimEvent::MobilityTransition { tick, event });
        }
        log::debug!(
            "tick={tick} mobility: batch {} transitions across {professions} professions",
            out.len()
        );
        Ok(out)
    }

    fn export_state(&self) -> SimResult<Vec<StateEntry>> {
        let mut entries = Vec::with_capacity(self.paths.len() + self.history.len());
        for ((from, to), path) in &self.paths {
            entries.push(encode_entry(format!("path/{}/{}", from.as_str(), to.as_str()), path)?);
        }
        for (i, event) in self.history.iter().enumerate() {
            entries.push(encode_entry(format!("event/{i:08}"), event)?);
        }
        Ok(entries)
    }

    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()> {
        let name = self.name();
        let mut paths = BTreeMap::new();
        let mut events = Vec::new();
        for entry in entries {
            if entry.0.starts_with("path/") {
                let path: CareerPath = decode_entry(name, entry)?;
                paths.insert((path.from, path.to), path);
            } else if let Some(raw) = entry.0.strip_prefix("event/") {
                let index: usize = raw.parse().map_err(|_| SimError::MalformedState {
                    component: name.to_string(),
                    key:       entry.0.clone(),
                })?;
                let event: MobilityEvent = decode_entry(name, entry)?;
                events.push((index, event));
            }
        }
        events.sort_by_key(|(i, _)| *i);
        self.paths = paths;
        self.history = events.into_iter().map(|(_, e)| e).collect();
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
