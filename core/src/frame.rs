//! Per-tick inputs supplied by external collaborators.
//!
//! The core never owns agents. Each tick the driver hands in a
//! `WorldFrame` of raw samples and environment signals; everything the
//! core produces goes back out as events.

use crate::{
    information_subsystem::{InfoType, RelationshipKind},
    mobility_subsystem::AgentStats,
    types::{AgentId, Millis, Profession, RegionId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw agent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSample {
    pub id:         AgentId,
    pub region:     RegionId,
    pub profession: Profession,
    pub wealth:     f64,
    pub happiness:  f64,
    pub age:        f64,
    pub employed:   bool,
}

/// Environment signals for one region. Employment and wages may be left
/// empty; the engine fills them from the region's computed economy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSignals {
    /// Share of the workforce employed, in [0, 1].
    pub employment_rate: Option<f64>,
    pub avg_wage:        Option<f64>,
    /// Remaining signals are scores in [0, 100].
    pub safety:          f64,
    pub infrastructure:  f64,
    pub food:            f64,
    pub disease:         f64,
}

impl Default for RegionSignals {
    fn default() -> Self {
        Self {
            employment_rate: None,
            avg_wage:        None,
            safety:          50.0,
            infrastructure:  50.0,
            food:            50.0,
            disease:         0.0,
        }
    }
}

/// An undirected connection between two regions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionLink {
    pub a:                   RegionId,
    pub b:                   RegionId,
    pub distance:            f64,
    /// Cultural affinity in [0, 1].
    pub cultural_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobilityCandidate {
    pub agent_id:   AgentId,
    pub profession: Profession,
    pub stats:      AgentStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub info_type:     InfoType,
    pub content:       String,
    pub accuracy:      f64,
    pub origin_id:     Option<AgentId>,
    pub origin_region: RegionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub a:        AgentId,
    pub b:        AgentId,
    pub kind:     RelationshipKind,
    /// Starting strength when the relationship is new.
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub route_id: String,
    pub amount:   f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldFrame {
    pub agents:                  Vec<AgentSample>,
    /// Total population when `agents` is only a sample of it.
    pub population_override:     Option<u64>,
    pub region_signals:          BTreeMap<RegionId, RegionSignals>,
    pub region_links:            Vec<RegionLink>,
    /// Leave empty to derive the distribution from `agents`.
    pub profession_distribution: BTreeMap<Profession, u64>,
    pub population_stats:        AgentStats,
    /// Individually simulated agents considering a career move.
    pub mobility_candidates:     Vec<MobilityCandidate>,
    pub publications:            Vec<Publication>,
    pub interactions:            Vec<Interaction>,
    pub trade_requests:          Vec<TradeRequest>,
}

impl WorldFrame {
    pub fn total_population(&self) -> u64 {
        self.population_override.unwrap_or(self.agents.len() as u64)
    }

    pub fn profession_distribution(&self) -> BTreeMap<Profession, u64> {
        if !self.profession_distribution.is_empty() {
            return self.profession_distribution.clone();
        }
        let mut counts = BTreeMap::new();
        for agent in &self.agents {
            *counts.entry(agent.profession).or_insert(0) += 1;
        }
        counts
    }

    /// Neighbour lists in both directions, sorted for stable iteration.
    pub fn adjacency(&self) -> BTreeMap<RegionId, Vec<RegionId>> {
        let mut adjacency: BTreeMap<RegionId, Vec<RegionId>> = BTreeMap::new();
        for link in &self.region_links {
            adjacency.entry(link.a).or_default().push(link.b);
            adjacency.entry(link.b).or_default().push(link.a);
        }
        for neighbours in adjacency.values_mut() {
            neighbours.sort_unstable();
            neighbours.dedup();
        }
        adjacency
    }
}

/// What a subsystem sees of the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub tick:  Tick,
    pub now_ms: Millis,
    /// Simulated days covered by this tick.
    pub days:  f64,
    /// Whole simulated days since run start.
    pub day:   Tick,
    pub frame: &'a WorldFrame,
}
