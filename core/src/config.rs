use crate::{
    cohort_subsystem::TradeRoute,
    error::{SimError, SimResult},
    mobility_subsystem::{CareerPath, ClassTier, PathRequirements, SocialClass},
    types::{Millis, Profession, Resource, ResourceMap, Tick},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ── Scale policy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScaleConfig {
    /// Populations below this run in `full` mode.
    pub full_threshold: u64,
    /// Populations at or above this run in `aggregated` mode.
    pub hybrid_threshold: u64,
    /// Rolling tick-duration bands (ms) for low / medium / high / critical.
    pub warning_bands_ms: [f64; 4],
    /// Number of tick-duration samples in the rolling average.
    pub tick_window: usize,
    /// Relationship cap at small populations.
    pub max_relationships: usize,
    /// Minimum simulated time between two cohort rebuilds.
    pub cohort_update_interval_ms: Millis,
    /// Upper bound on mobility events emitted in one tick.
    pub max_events_per_tick: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            full_threshold:            10_000,
            hybrid_threshold:          100_000,
            warning_bands_ms:          [16.0, 33.0, 50.0, 100.0],
            tick_window:               60,
            max_relationships:         150,
            cohort_update_interval_ms: 5_000,
            max_events_per_tick:       1_000,
        }
    }
}

// ── Economy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EconomyConfig {
    /// Per-worker output by profession. Cohort production is this × size.
    pub profession_yields: BTreeMap<Profession, ResourceMap>,
    /// Per-capita consumption applied to every cohort.
    pub per_capita_consumption: ResourceMap,
    pub trade_routes: Vec<TradeRoute>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let yields = |pairs: &[(Resource, f64)]| -> ResourceMap { pairs.iter().copied().collect() };
        let profession_yields = [
            (Profession::Unemployed, yields(&[])),
            (Profession::Farmer,     yields(&[(Resource::Food, 3.0)])),
            (Profession::Laborer,    yields(&[(Resource::Wood, 1.0), (Resource::Stone, 1.0), (Resource::Ore, 0.5)])),
            (Profession::Craftsman,  yields(&[(Resource::Tools, 0.8), (Resource::Cloth, 0.8)])),
            (Profession::Soldier,    yields(&[])),
            (Profession::Merchant,   yields(&[(Resource::Luxury, 0.3)])),
            (Profession::Scholar,    yields(&[(Resource::Tools, 0.1)])),
            (Profession::Priest,     yields(&[])),
            (Profession::Noble,      yields(&[(Resource::Luxury, 0.1)])),
        ]
        .into_iter()
        .collect();

        Self {
            profession_yields,
            per_capita_consumption: yields(&[
                (Resource::Food,  1.0),
                (Resource::Wood,  0.1),
                (Resource::Cloth, 0.1),
                (Resource::Tools, 0.05),
            ]),
            trade_routes: Vec::new(),
        }
    }
}

// ── Migration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    /// Share of an origin's population that may leave in one plan.
    pub base_rate: f64,
    /// Absolute cap on migrants leaving one origin per tick.
    pub per_tick_cap: u64,
    /// Pressures at or below this are ignored.
    pub materiality_floor: f64,
    /// Distance at which pressure is halved.
    pub distance_scale: f64,
    /// Wage that maps to a full wage component of the economic score.
    pub reference_wage: f64,
    pub history_capacity: usize,
    pub update_interval_ticks: Tick,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            base_rate:             0.05,
            per_tick_cap:          1_000,
            materiality_floor:     10.0,
            distance_scale:        500.0,
            reference_wage:        100.0,
            history_capacity:      1_000,
            update_interval_ticks: 1,
        }
    }
}

// ── Mobility ───────────────────────────────────────────────────────

/// Probability multipliers applied for each unmet path requirement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RequirementPenalties {
    pub education:   f64,
    pub wealth:      f64,
    pub connections: f64,
    pub age:         f64,
}

impl Default for RequirementPenalties {
    fn default() -> Self {
        Self { education: 0.3, wealth: 0.5, connections: 0.6, age: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MobilityConfig {
    pub career_paths: Vec<CareerPath>,
    /// Any order; the engine sorts them highest class first.
    pub class_tiers: Vec<ClassTier>,
    pub penalties: RequirementPenalties,
    pub yearly_attempt_rate: f64,
    pub update_interval_ticks: Tick,
    pub ticks_per_year: Tick,
    pub history_capacity: usize,
}

impl Default for MobilityConfig {
    fn default() -> Self {
        use Profession::*;
        let path = |from, to, difficulty, requirements| CareerPath { from, to, difficulty, requirements };
        let none = PathRequirements::default;

        let career_paths = vec![
            path(Unemployed, Laborer, 10.0, none()),
            path(Unemployed, Farmer, 15.0, none()),
            path(Farmer, Laborer, 20.0, none()),
            path(Farmer, Craftsman, 50.0, PathRequirements { education: Some(20.0), ..none() }),
            path(Farmer, Soldier, 30.0, PathRequirements { age_range: Some((16.0, 40.0)), ..none() }),
            path(Laborer, Craftsman, 40.0, PathRequirements { education: Some(20.0), ..none() }),
            path(Laborer, Soldier, 25.0, PathRequirements { age_range: Some((16.0, 40.0)), ..none() }),
            path(Craftsman, Merchant, 60.0, PathRequirements {
                wealth: Some(500.0), connections: Some(30.0), ..none()
            }),
            path(Craftsman, Scholar, 70.0, PathRequirements { education: Some(60.0), ..none() }),
            path(Scholar, Priest, 50.0, PathRequirements { education: Some(50.0), ..none() }),
            path(Soldier, Noble, 95.0, PathRequirements {
                wealth: Some(5_000.0), connections: Some(80.0), ..none()
            }),
            path(Merchant, Noble, 90.0, PathRequirements {
                wealth: Some(10_000.0), connections: Some(70.0), ..none()
            }),
        ];

        let tier = |class, min_wealth, professions: &[Profession]| ClassTier {
            class,
            min_wealth,
            professions: professions.to_vec(),
        };
        let class_tiers = vec![
            tier(SocialClass::Nobility, 10_000.0, &[Noble]),
            tier(SocialClass::Gentry, 2_000.0, &[Noble, Merchant, Scholar, Priest]),
            tier(SocialClass::Burgher, 500.0, &[Merchant, Craftsman, Scholar, Priest, Soldier]),
            tier(SocialClass::Worker, 100.0, &[Craftsman, Laborer, Soldier, Farmer]),
            tier(SocialClass::Peasant, 20.0, &[Farmer, Laborer, Soldier]),
            tier(SocialClass::Destitute, 0.0, &[]),
        ];

        Self {
            career_paths,
            class_tiers,
            penalties:             RequirementPenalties::default(),
            yearly_attempt_rate:   0.10,
            update_interval_ticks: 30,
            ticks_per_year:        365,
            history_capacity:      1_000,
        }
    }
}

// ── Information ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InformationConfig {
    /// Penetration points gained per day per unit of spread speed.
    pub regional_step_pct: f64,
    /// Local penetration above which neighbours can be seeded.
    pub seed_threshold: f64,
    pub seed_chance: f64,
    /// Penetration of a freshly seeded region.
    pub initial_penetration: f64,
    /// Hard cap on knowers sampled per item per tick.
    pub max_sample: usize,
    pub distortion_chance: f64,
    /// Relationships untouched for longer than this start to decay.
    pub stale_after_days: Tick,
    pub decay_amount: f64,
    /// Low-commitment relationships below this strength are pruned.
    pub prune_floor: f64,
    /// Strength gained by an existing relationship on interaction.
    pub interaction_boost: f64,
    /// Items older than this are retired.
    pub max_item_age_days: f64,
}

impl Default for InformationConfig {
    fn default() -> Self {
        Self {
            regional_step_pct:   5.0,
            seed_threshold:      50.0,
            seed_chance:         0.3,
            initial_penetration: 1.0,
            max_sample:          1_000,
            distortion_chance:   0.05,
            stale_after_days:    30,
            decay_amount:        5.0,
            prune_floor:         10.0,
            interaction_boost:   5.0,
            max_item_age_days:   365.0,
        }
    }
}

// ── Clock ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    pub ms_per_tick:   Millis,
    pub days_per_tick: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { ms_per_tick: 1_000, days_per_tick: 1.0 }
    }
}

// ── Root ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    pub scale:       ScaleConfig,
    pub economy:     EconomyConfig,
    pub migration:   MigrationConfig,
    pub mobility:    MobilityConfig,
    pub information: InformationConfig,
    pub clock:       ClockConfig,
}

impl SimConfig {
    /// Load from the data/ directory.
    /// Each section lives in its own file; a missing file keeps the
    /// built-in defaults for that section.
    /// In tests, use SimConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let config = Self {
            scale:       load_section(data_dir, "scale_policy.json")?,
            economy:     load_section(data_dir, "economy.json")?,
            migration:   load_section(data_dir, "migration.json")?,
            mobility:    load_section(data_dir, "mobility.json")?,
            information: load_section(data_dir, "information.json")?,
            clock:       load_section(data_dir, "clock.json")?,
        };
        config.validate()?;
        log::debug!("config loaded from {data_dir}");
        Ok(config)
    }

    /// Small, fast configuration for tests: every subsystem runs every tick
    /// and cohorts rebuild whenever asked.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.scale.cohort_update_interval_ms = 0;
        config.mobility.update_interval_ticks = 1;
        config
    }

    /// The only fatal configuration errors: an unusable scale policy,
    /// or tables other components cannot interpret.
    pub fn validate(&self) -> SimResult<()> {
        let s = &self.scale;
        if s.full_threshold == 0 || s.hybrid_threshold == 0 {
            return Err(SimError::UnconfiguredPolicy {
                reason: "mode thresholds must be positive".into(),
            });
        }
        if s.full_threshold >= s.hybrid_threshold {
            return Err(SimError::UnconfiguredPolicy {
                reason: format!(
                    "full_threshold ({}) must be below hybrid_threshold ({})",
                    s.full_threshold, s.hybrid_threshold
                ),
            });
        }
        if s.warning_bands_ms.iter().any(|b| *b <= 0.0)
            || s.warning_bands_ms.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(SimError::UnconfiguredPolicy {
                reason: "warning bands must be positive and strictly increasing".into(),
            });
        }
        if s.tick_window == 0 || s.max_relationships == 0 {
            return Err(SimError::UnconfiguredPolicy {
                reason: "tick_window and max_relationships must be positive".into(),
            });
        }

        if self.mobility.class_tiers.is_empty() {
            return Err(SimError::InvalidConfig("mobility.class_tiers is empty".into()));
        }
        if let Some(p) = self.mobility.career_paths.iter()
            .find(|p| !(0.0..=100.0).contains(&p.difficulty))
        {
            return Err(SimError::InvalidConfig(format!(
                "career path {} -> {} has difficulty {} outside [0, 100]",
                p.from, p.to, p.difficulty
            )));
        }
        if self.information.max_item_age_days <= 0.0 {
            return Err(SimError::InvalidConfig("information.max_item_age_days must be positive".into()));
        }
        if self.clock.days_per_tick <= 0.0 {
            return Err(SimError::InvalidConfig("clock.days_per_tick must be positive".into()));
        }
        Ok(())
    }
}

fn load_section<T: DeserializeOwned + Default>(data_dir: &str, file: &str) -> anyhow::Result<T> {
    let path = Path::new(data_dir).join(file);
    if !path.exists() {
        log::debug!("config: {} not found, using defaults", path.display());
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
    let section = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Cannot parse {}: {e}", path.display()))?;
    Ok(section)
}
