//! The event bus: all inter-subsystem communication.
//!
//! RULE: Subsystems communicate ONLY through events.
//! A subsystem may never call another subsystem's functions directly.
//! A subsystem may never read another subsystem's internal state.
//!
//! Events are also the core's output: callers read migration flows and
//! mobility transitions from them and apply the deltas to their agents.

use crate::{
    cohort_subsystem::RegionalEconomy,
    information_subsystem::{InfoId, InfoType},
    migration_subsystem::MigrationFlow,
    mobility_subsystem::MobilityEvent,
    scale_policy::ScaleMode,
    types::{RegionId, Resource, RunId, Tick},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during simulation.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Engine events ──────────────────────────────
    TickStarted {
        tick: Tick,
    },
    TickCompleted {
        tick: Tick,
    },
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },

    // ── Scale policy ───────────────────────────────
    ScaleModeChanged {
        tick: Tick,
        from: ScaleMode,
        to: ScaleMode,
        population: u64,
    },

    // ── Cohorts and regional economy ───────────────
    CohortsRebuilt {
        tick: Tick,
        cohorts: usize,
        agents: u64,
        cohort_population: u64,
    },
    RegionalEconomyComputed {
        tick: Tick,
        economy: RegionalEconomy,
    },
    TradeExecuted {
        tick: Tick,
        route_id: String,
        from: RegionId,
        to: RegionId,
        resource: Resource,
        amount: f64,
    },

    // ── Migration ──────────────────────────────────
    MigrationPlanned {
        tick: Tick,
        flow: MigrationFlow,
    },

    // ── Mobility ───────────────────────────────────
    MobilityTransition {
        tick: Tick,
        event: MobilityEvent,
    },

    // ── Information ────────────────────────────────
    InformationPublished {
        tick: Tick,
        info_id: InfoId,
        info_type: InfoType,
        origin_region: RegionId,
        regional: bool,
    },
    InformationSpread {
        tick: Tick,
        info_id: InfoId,
        new_knowers: u64,
        new_regions: Vec<RegionId>,
    },
    RelationshipsDecayed {
        tick: Tick,
        weakened: usize,
        pruned: usize,
    },
    InformationRetired {
        tick: Tick,
        info_id: InfoId,
    },
}

impl SimEvent {
    /// Stable string name of the variant.
    /// Used for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TickStarted { .. }             => "tick_started",
            Self::TickCompleted { .. }           => "tick_completed",
            Self::RunInitialized { .. }          => "run_initialized",
            Self::ScaleModeChanged { .. }        => "scale_mode_changed",
            Self::CohortsRebuilt { .. }          => "cohorts_rebuilt",
            Self::RegionalEconomyComputed { .. } => "regional_economy_computed",
            Self::TradeExecuted { .. }           => "trade_executed",
            Self::MigrationPlanned { .. }        => "migration_planned",
            Self::MobilityTransition { .. }      => "mobility_transition",
            Self::InformationPublished { .. }    => "information_published",
            Self::InformationSpread { .. }       => "information_spread",
            Self::RelationshipsDecayed { .. }    => "relationships_decayed",
            Self::InformationRetired { .. }      => "information_retired",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub tick: Tick,
    pub subsystem: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized SimEvent
}
