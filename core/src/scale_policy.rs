//! Scale policy: decides how finely the population is simulated.
//!
//! The policy is the single owner of every population-dependent knob:
//! mode thresholds, cohort target size, relationship caps, social sample
//! rate and economy cache lifetime. Other subsystems hold a `ScaleHandle`
//! and ask; none of them keeps its own thresholds.
//!
//! RULE: once constructed, nothing here returns an error. Every other
//! subsystem depends on the policy being available.

use crate::{
    config::ScaleConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    frame::TickContext,
    rng::SubsystemRng,
    subsystem::{decode_entry, encode_entry, SimSubsystem, StateEntry},
    types::{Millis, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Population bands shared by every step-function accessor.
const BANDS: [u64; 4] = [10_000, 100_000, 1_000_000, 10_000_000];

const COHORT_TARGET_SIZES: [u64; 5] = [1, 100, 1_000, 10_000, 100_000];
const RELATIONSHIP_CAPS:   [usize; 5] = [usize::MAX, 50, 20, 10, 5];
const SAMPLE_RATES:        [f64; 5] = [1.0, 0.1, 0.01, 0.001, 0.0001];
const CACHE_TTLS_MS:       [Millis; 5] = [1_000, 5_000, 10_000, 20_000, 30_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Full,
    Hybrid,
    Aggregated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Read-only copy of the policy's metrics, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleMetrics {
    pub population:    u64,
    pub avg_tick_ms:   f64,
    pub mode:          ScaleMode,
    pub warning_level: WarningLevel,
}

#[derive(Debug, Clone)]
pub struct ScalePolicy {
    config:        ScaleConfig,
    population:    u64,
    tick_samples:  VecDeque<f64>,
    avg_tick_ms:   f64,
    mode:          ScaleMode,
    warning_level: WarningLevel,
}

impl ScalePolicy {
    /// The one fallible step: an unconfigured policy is fatal.
    pub fn new(config: ScaleConfig) -> SimResult<Self> {
        if config.full_threshold == 0 || config.full_threshold >= config.hybrid_threshold {
            return Err(SimError::UnconfiguredPolicy {
                reason: format!(
                    "thresholds {} / {} must be positive and increasing",
                    config.full_threshold, config.hybrid_threshold
                ),
            });
        }
        if config.warning_bands_ms.windows(2).any(|w| w[0] >= w[1])
            || config.warning_bands_ms[0] <= 0.0
        {
            return Err(SimError::UnconfiguredPolicy {
                reason: "warning bands must be positive and strictly increasing".into(),
            });
        }
        let mut policy = Self {
            config,
            population:    0,
            tick_samples:  VecDeque::new(),
            avg_tick_ms:   0.0,
            mode:          ScaleMode::Full,
            warning_level: WarningLevel::None,
        };
        policy.recompute();
        Ok(policy)
    }

    pub fn update_population(&mut self, population: u64) {
        self.population = population;
        self.recompute();
    }

    /// Record one tick's duration. Negative or non-finite samples are ignored.
    pub fn record_tick_time(&mut self, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }
        self.tick_samples.push_back(ms);
        while self.tick_samples.len() > self.config.tick_window.max(1) {
            self.tick_samples.pop_front();
        }
        self.avg_tick_ms = self.tick_samples.iter().sum::<f64>() / self.tick_samples.len() as f64;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.mode = mode_for(self.population, self.config.full_threshold, self.config.hybrid_threshold);
        self.warning_level = warning_for(self.avg_tick_ms, &self.config.warning_bands_ms);
    }

    pub fn mode(&self) -> ScaleMode { self.mode }
    pub fn warning_level(&self) -> WarningLevel { self.warning_level }
    pub fn population(&self) -> u64 { self.population }
    pub fn avg_tick_ms(&self) -> f64 { self.avg_tick_ms }
    pub fn config(&self) -> &ScaleConfig { &self.config }

    pub fn metrics(&self) -> ScaleMetrics {
        ScaleMetrics {
            population:    self.population,
            avg_tick_ms:   self.avg_tick_ms,
            mode:          self.mode,
            warning_level: self.warning_level,
        }
    }

    /// Information spreads through the relationship graph unless the
    /// population is large enough to warrant regional penetration.
    pub fn uses_individual_spread(&self) -> bool {
        self.mode != ScaleMode::Aggregated
    }

    pub fn cohort_target_size(&self) -> u64 {
        COHORT_TARGET_SIZES[band(self.population)]
    }

    pub fn relationship_cap(&self) -> usize {
        RELATIONSHIP_CAPS[band(self.population)].min(self.config.max_relationships)
    }

    pub fn sample_rate(&self) -> f64 {
        SAMPLE_RATES[band(self.population)]
    }

    pub fn cache_ttl_ms(&self) -> Millis {
        CACHE_TTLS_MS[band(self.population)]
    }

    pub fn cohort_update_interval_ms(&self) -> Millis {
        self.config.cohort_update_interval_ms
    }

    pub fn max_events_per_tick(&self) -> usize {
        self.config.max_events_per_tick
    }
}

/// `full` below the first threshold, `aggregated` at or above the second.
pub fn mode_for(population: u64, full_threshold: u64, hybrid_threshold: u64) -> ScaleMode {
    if population < full_threshold {
        ScaleMode::Full
    } else if population < hybrid_threshold {
        ScaleMode::Hybrid
    } else {
        ScaleMode::Aggregated
    }
}

pub fn warning_for(avg_tick_ms: f64, bands: &[f64; 4]) -> WarningLevel {
    if avg_tick_ms > bands[3] {
        WarningLevel::Critical
    } else if avg_tick_ms > bands[2] {
        WarningLevel::High
    } else if avg_tick_ms > bands[1] {
        WarningLevel::Medium
    } else if avg_tick_ms > bands[0] {
        WarningLevel::Low
    } else {
        WarningLevel::None
    }
}

fn band(population: u64) -> usize {
    BANDS.iter().take_while(|b| population >= **b).count()
}

// ── Shared handle ──────────────────────────────────────────────────

/// Cloneable handle to one simulation's policy. Each engine builds its
/// own, so parallel simulations never share metrics.
#[derive(Debug, Clone)]
pub struct ScaleHandle(Arc<RwLock<ScalePolicy>>);

impl ScaleHandle {
    pub fn new(policy: ScalePolicy) -> Self {
        Self(Arc::new(RwLock::new(policy)))
    }

    /// Run `f` against the current policy. A poisoned lock still yields
    /// the last written state.
    pub fn read<R>(&self, f: impl FnOnce(&ScalePolicy) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut ScalePolicy) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn mode(&self) -> ScaleMode { self.read(|p| p.mode()) }
    pub fn metrics(&self) -> ScaleMetrics { self.read(|p| p.metrics()) }
    pub fn cohort_target_size(&self) -> u64 { self.read(|p| p.cohort_target_size()) }
    pub fn relationship_cap(&self) -> usize { self.read(|p| p.relationship_cap()) }
    pub fn sample_rate(&self) -> f64 { self.read(|p| p.sample_rate()) }
    pub fn cache_ttl_ms(&self) -> Millis { self.read(|p| p.cache_ttl_ms()) }
    pub fn cohort_update_interval_ms(&self) -> Millis { self.read(|p| p.cohort_update_interval_ms()) }
    pub fn max_events_per_tick(&self) -> usize { self.read(|p| p.max_events_per_tick()) }
    pub fn uses_individual_spread(&self) -> bool { self.read(|p| p.uses_individual_spread()) }

    pub fn update_population(&self, population: u64) {
        self.write(|p| p.update_population(population));
    }

    pub fn record_tick_time(&self, ms: f64) {
        self.write(|p| p.record_tick_time(ms));
    }
}

// ── Subsystem ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMetrics {
    population:   u64,
    tick_samples: Vec<f64>,
}

/// First stage of every tick: feeds the frame's population into the policy
/// and reports mode transitions.
pub struct ScaleSubsystem {
    scale: ScaleHandle,
}

impl ScaleSubsystem {
    pub fn new(scale: ScaleHandle) -> Self {
        Self { scale }
    }
}

impl SimSubsystem for ScaleSubsystem {
    fn name(&self) -> &'static str { "scale" }

    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        _events_in: &[SimEvent],
        _rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>> {
        let tick: Tick = ctx.tick;
        let population = ctx.frame.total_population();
        let before = self.scale.mode();
        self.scale.update_population(population);
        let after = self.scale.mode();

        if before == after {
            return Ok(vec![]);
        }

        log::info!("tick={tick} scale: mode {before:?} -> {after:?} (population={population})");
        Ok(vec![SimEvent::ScaleModeChanged {
            tick,
            from: before,
            to: after,
            population,
        }])
    }

    fn export_state(&self) -> SimResult<Vec<StateEntry>> {
        let persisted = self.scale.read(|p| PersistedMetrics {
            population:   p.population,
            tick_samples: p.tick_samples.iter().copied().collect(),
        });
        Ok(vec![encode_entry("metrics".into(), &persisted)?])
    }

    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()> {
        for entry in entries {
            if entry.0 != "metrics" {
                continue;
            }
            let persisted: PersistedMetrics = decode_entry(self.name(), entry)?;
            self.scale.write(|p| {
                p.population = persisted.population;
                p.tick_samples = persisted.tick_samples.into_iter().collect();
                p.avg_tick_ms = if p.tick_samples.is_empty() {
                    0.0
                } else {
                    p.tick_samples.iter().sum::<f64>() / p.tick_samples.len() as f64
                };
                p.recompute();
            });
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
