//! Information subsystem: how news, rumours and secrets spread.
//!
//! Two mutually exclusive spread models, chosen per item when it is
//! published:
//!   - individual: hops along the relationship graph, sampling a bounded
//!     subset of knowers each tick;
//!   - regional: per-region penetration in [0, 100] that grows locally
//!     and seeds adjacent regions.
//!
//! The subsystem also owns the relationship graph and keeps every
//! agent's relationship count within the policy's cap.

use crate::{
    config::InformationConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    frame::TickContext,
    rng::SubsystemRng,
    scale_policy::ScaleHandle,
    subsystem::{decode_entry, encode_entry, SimSubsystem, StateEntry},
    types::{AgentId, RegionId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Largest accuracy loss from one distorted hop.
const MAX_DISTORTION: u64 = 5;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoType {
    Rumor,
    News,
    Scandal,
    Discovery,
    MilitaryIntel,
    Propaganda,
}

impl InfoType {
    /// Scandal travels fastest, military intelligence slowest.
    pub fn spread_speed(&self) -> f64 {
        match self {
            Self::Scandal       => 2.0,
            Self::Rumor         => 1.5,
            Self::Propaganda    => 1.2,
            Self::News          => 1.0,
            Self::Discovery     => 0.6,
            Self::MilitaryIntel => 0.3,
        }
    }
}

/// Who knows an item. Fixed at publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Knowledge {
    Individual { knowers: BTreeSet<AgentId> },
    Regional { penetration: BTreeMap<RegionId, f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Information {
    pub id:            InfoId,
    pub info_type:     InfoType,
    pub content:       String,
    /// [0, 100]; drops as the item is distorted in transit.
    pub accuracy:      f64,
    pub spread_speed:  f64,
    pub origin_id:     Option<AgentId>,
    pub origin_region: RegionId,
    pub created:       Tick,
    /// Simulated days this item has been spreading.
    #[serde(default)]
    pub age_days:      f64,
    pub knowledge:     Knowledge,
}

impl Information {
    pub fn is_regional(&self) -> bool {
        matches!(self.knowledge, Knowledge::Regional { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Family,
    Friend,
    Colleague,
    Neighbor,
    Acquaintance,
}

impl RelationshipKind {
    /// Kinds that disappear once they weaken enough.
    pub fn is_low_commitment(&self) -> bool {
        matches!(self, Self::Neighbor | Self::Acquaintance)
    }
}

/// Undirected; stored with `a < b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialRelationship {
    pub a:                AgentId,
    pub b:                AgentId,
    pub kind:             RelationshipKind,
    /// [0, 100].
    pub strength:         f64,
    pub since:            Tick,
    pub last_interaction: Tick,
}

impl SocialRelationship {
    pub fn other(&self, agent: AgentId) -> AgentId {
        if self.a == agent { self.b } else { self.a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadReport {
    pub info_id:     InfoId,
    pub new_knowers: u64,
    pub new_regions: Vec<RegionId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub weakened: usize,
    pub pruned:   usize,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct InformationEngine {
    scale:         ScaleHandle,
    config:        InformationConfig,
    items:         BTreeMap<InfoId, Information>,
    next_id:       u64,
    relationships: BTreeMap<(AgentId, AgentId), SocialRelationship>,
    /// Adjacency index over `relationships`.
    links:         BTreeMap<AgentId, BTreeSet<AgentId>>,
}

impl InformationEngine {
    pub fn new(scale: ScaleHandle, config: InformationConfig) -> Self {
        Self {
            scale,
            config,
            items: BTreeMap::new(),
            next_id: 1,
            relationships: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Create an item. It spreads regionally when the policy is aggregated
    /// or when no origin agent is known.
    pub fn publish(
        &mut self,
        info_type: InfoType,
        content: impl Into<String>,
        accuracy: f64,
        origin_id: Option<AgentId>,
        origin_region: RegionId,
        tick: Tick,
    ) -> InfoId {
        let id = InfoId(self.next_id);
        self.next_id += 1;

        let knowledge = match origin_id {
            Some(agent) if self.scale.uses_individual_spread() => Knowledge::Individual {
                knowers: BTreeSet::from([agent]),
            },
            _ => Knowledge::Regional {
                penetration: BTreeMap::from([(origin_region, self.config.initial_penetration)]),
            },
        };

        self.items.insert(id, Information {
            id,
            info_type,
            content: content.into(),
            accuracy: accuracy.clamp(0.0, 100.0),
            spread_speed: info_type.spread_speed(),
            origin_id,
            origin_region,
            created: tick,
            age_days: 0.0,
            knowledge,
        });
        id
    }

    /// Advance every item by `delta_days`.
    pub fn tick(
        &mut self,
        delta_days: f64,
        adjacency: &BTreeMap<RegionId, Vec<RegionId>>,
        rng: &mut SubsystemRng,
    ) -> Vec<SpreadReport> {
        if delta_days <= 0.0 {
            return vec![];
        }
        let sample_rate = self.scale.sample_rate();
        let cap = self.scale.relationship_cap();
        let config = &self.config;
        let relationships = &self.relationships;
        let links = &self.links;

        let mut reports = Vec::new();
        for item in self.items.values_mut() {
            item.age_days += delta_days;
            let report = match &mut item.knowledge {
                Knowledge::Regional { penetration } => {
                    let new_regions = spread_regional(penetration, item.spread_speed, delta_days, adjacency, config, rng);
                    SpreadReport { info_id: item.id, new_knowers: 0, new_regions }
                }
                Knowledge::Individual { knowers } => {
                    let hop = Hop { speed: item.spread_speed, days: delta_days, sample_rate, cap };
                    let (added, distortion) = spread_individual(knowers, &hop, relationships, links, config, rng);
                    item.accuracy = (item.accuracy - distortion).max(0.0);
                    SpreadReport { info_id: item.id, new_knowers: added, new_regions: vec![] }
                }
            };
            if report.new_knowers > 0 || !report.new_regions.is_empty() {
                reports.push(report);
            }
        }
        reports
    }

    /// Drop items that can no longer change: anything past the configured
    /// age, and regional items saturated everywhere they are known with no
    /// unreached neighbour left to seed.
    pub fn retire(&mut self, adjacency: &BTreeMap<RegionId, Vec<RegionId>>) -> Vec<InfoId> {
        let max_age = self.config.max_item_age_days;
        let retired: Vec<InfoId> = self
            .items
            .values()
            .filter(|item| item.age_days >= max_age || is_exhausted(item, adjacency))
            .map(|item| item.id)
            .collect();
        for id in &retired {
            self.items.remove(id);
        }
        retired
    }

    // ── Relationships ────────────────────────────────────────────────────

    /// Add a relationship. Rejected when either agent is already at the
    /// policy's cap, or when `a == b`. An existing pair is refreshed instead.
    pub fn add_relationship(
        &mut self,
        a: AgentId,
        b: AgentId,
        kind: RelationshipKind,
        strength: f64,
        day: Tick,
    ) -> bool {
        if a == b {
            return false;
        }
        let key = pair(a, b);
        if let Some(existing) = self.relationships.get_mut(&key) {
            existing.last_interaction = existing.last_interaction.max(day);
            return true;
        }
        let cap = self.scale.relationship_cap();
        if self.relationship_count(a) >= cap || self.relationship_count(b) >= cap {
            log::debug!("information: relationship {a}-{b} rejected, cap {cap} reached");
            return false;
        }
        self.relationships.insert(key, SocialRelationship {
            a: key.0,
            b: key.1,
            kind,
            strength: strength.clamp(0.0, 100.0),
            since: day,
            last_interaction: day,
        });
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
        true
    }

    /// Strengthen and refresh a pair, creating it if there is room.
    pub fn record_interaction(
        &mut self,
        a: AgentId,
        b: AgentId,
        kind: RelationshipKind,
        strength: f64,
        day: Tick,
    ) -> bool {
        match self.relationships.get_mut(&pair(a, b)) {
            Some(existing) => {
                existing.strength = (existing.strength + self.config.interaction_boost).min(100.0);
                existing.last_interaction = existing.last_interaction.max(day);
                true
            }
            None => self.add_relationship(a, b, kind, strength, day),
        }
    }

    /// Weaken relationships nobody has touched for `stale_after_days`,
    /// drop weak low-commitment ones, and trim agents that are over the
    /// current cap (weakest first).
    pub fn decay_relationships(&mut self, day: Tick) -> DecayReport {
        let mut report = DecayReport::default();
        let mut doomed = Vec::new();
        for (key, rel) in self.relationships.iter_mut() {
            if day.saturating_sub(rel.last_interaction) > self.config.stale_after_days {
                rel.strength = (rel.strength - self.config.decay_amount).max(0.0);
                report.weakened += 1;
            }
            if rel.kind.is_low_commitment() && rel.strength < self.config.prune_floor {
                doomed.push(*key);
            }
        }
        for key in doomed {
            self.remove_relationship(key);
            report.pruned += 1;
        }

        let cap = self.scale.relationship_cap();
        let crowded: Vec<AgentId> = self
            .links
            .iter()
            .filter(|(_, others)| others.len() > cap)
            .map(|(agent, _)| *agent)
            .collect();
        for agent in crowded {
            let mut ranked = self.relationships_of(agent);
            if ranked.len() <= cap {
                continue;
            }
            for rel in ranked.split_off(cap) {
                self.remove_relationship((rel.a, rel.b));
                report.pruned += 1;
            }
        }
        report
    }

    fn remove_relationship(&mut self, key: (AgentId, AgentId)) {
        if self.relationships.remove(&key).is_some() {
            for (from, to) in [(key.0, key.1), (key.1, key.0)] {
                if let Some(others) = self.links.get_mut(&from) {
                    others.remove(&to);
                    if others.is_empty() {
                        self.links.remove(&from);
                    }
                }
            }
        }
    }

    /// An agent's relationships, strongest first.
    pub fn relationships_of(&self, agent: AgentId) -> Vec<SocialRelationship> {
        let mut rels: Vec<SocialRelationship> = self
            .links
            .get(&agent)
            .into_iter()
            .flatten()
            .filter_map(|other| self.relationships.get(&pair(agent, *other)).cloned())
            .collect();
        rels.sort_by(|x, y| y.strength.total_cmp(&x.strength).then(x.other(agent).cmp(&y.other(agent))));
        rels
    }

    pub fn relationship(&self, a: AgentId, b: AgentId) -> Option<SocialRelationship> {
        self.relationships.get(&pair(a, b)).cloned()
    }

    pub fn relationship_count(&self, agent: AgentId) -> usize {
        self.links.get(&agent).map_or(0, |others| others.len())
    }

    pub fn total_relationships(&self) -> usize {
        self.relationships.len()
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn information(&self, id: InfoId) -> Option<Information> {
        self.items.get(&id).cloned()
    }

    pub fn items(&self) -> Vec<Information> {
        self.items.values().cloned().collect()
    }

    /// Regional penetration in [0, 100]; 0 for unknown items, unknown
    /// regions and individually spread items.
    pub fn penetration(&self, id: InfoId, region: RegionId) -> f64 {
        match self.items.get(&id).map(|i| &i.knowledge) {
            Some(Knowledge::Regional { penetration }) => penetration.get(&region).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Whether an agent knows an individually spread item.
    pub fn knows(&self, id: InfoId, agent: AgentId) -> bool {
        match self.items.get(&id).map(|i| &i.knowledge) {
            Some(Knowledge::Individual { knowers }) => knowers.contains(&agent),
            _ => false,
        }
    }

    pub fn knower_count(&self, id: InfoId) -> usize {
        match self.items.get(&id).map(|i| &i.knowledge) {
            Some(Knowledge::Individual { knowers }) => knowers.len(),
            _ => 0,
        }
    }
}

fn is_exhausted(item: &Information, adjacency: &BTreeMap<RegionId, Vec<RegionId>>) -> bool {
    let Knowledge::Regional { penetration } = &item.knowledge else {
        return false;
    };
    penetration.values().all(|level| *level >= 100.0)
        && penetration.keys().all(|region| {
            adjacency
                .get(region)
                .into_iter()
                .flatten()
                .all(|n| penetration.contains_key(n))
        })
}

fn pair(a: AgentId, b: AgentId) -> (AgentId, AgentId) {
    if a <= b { (a, b) } else { (b, a) }
}

fn spread_regional(
    penetration: &mut BTreeMap<RegionId, f64>,
    speed: f64,
    days: f64,
    adjacency: &BTreeMap<RegionId, Vec<RegionId>>,
    config: &InformationConfig,
    rng: &mut SubsystemRng,
) -> Vec<RegionId> {
    let step = speed * config.regional_step_pct * days;
    for level in penetration.values_mut() {
        *level = (*level + step).min(100.0);
    }

    let saturated: Vec<RegionId> = penetration
        .iter()
        .filter(|(_, level)| **level > config.seed_threshold)
        .map(|(region, _)| *region)
        .collect();

    let mut seeded = Vec::new();
    for region in saturated {
        if !rng.chance(config.seed_chance) {
            continue;
        }
        let open: Vec<RegionId> = adjacency
            .get(&region)
            .into_iter()
            .flatten()
            .filter(|n| !penetration.contains_key(n))
            .copied()
            .collect();
        if open.is_empty() {
            continue;
        }
        let target = open[rng.index(open.len())];
        penetration.insert(target, config.initial_penetration);
        seeded.push(target);
    }
    seeded
}

struct Hop {
    speed:       f64,
    days:        f64,
    sample_rate: f64,
    cap:         usize,
}

/// Returns (agents added, accuracy lost).
fn spread_individual(
    knowers: &mut BTreeSet<AgentId>,
    hop: &Hop,
    relationships: &BTreeMap<(AgentId, AgentId), SocialRelationship>,
    links: &BTreeMap<AgentId, BTreeSet<AgentId>>,
    config: &InformationConfig,
    rng: &mut SubsystemRng,
) -> (u64, f64) {
    if knowers.is_empty() {
        return (0, 0.0);
    }
    let current: Vec<AgentId> = knowers.iter().copied().collect();
    let sample_size = ((current.len() as f64 * hop.sample_rate).ceil() as usize)
        .max(1)
        .min(config.max_sample.max(1));

    let mut added = 0u64;
    let mut distortion = 0.0;
    for idx in rng.sample_indices(current.len(), sample_size) {
        let knower = current[idx];
        let mut neighbours: Vec<(AgentId, f64)> = links
            .get(&knower)
            .into_iter()
            .flatten()
            .filter_map(|other| relationships.get(&pair(knower, *other)).map(|r| (*other, r.strength)))
            .collect();
        neighbours.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        neighbours.truncate(hop.cap);

        for (neighbour, strength) in neighbours {
            if knowers.contains(&neighbour) {
                continue;
            }
            let chance = (strength / 100.0 * hop.speed * 0.5 * hop.days).min(1.0);
            if !rng.chance(chance) {
                continue;
            }
            knowers.insert(neighbour);
            added += 1;
            if rng.chance(config.distortion_chance) {
                distortion += (1 + rng.next_u64_below(MAX_DISTORTION)) as f64;
            }
        }
    }
    (added, distortion)
}

// ── Subsystem ────────────────────────────────────────────────────────────────

impl SimSubsystem for InformationEngine {
    fn name(&self) -> &'static str { "information" }

    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        _events_in: &[SimEvent],
        rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>> {
        let tick = ctx.tick;
        let mut out = Vec::new();

        for interaction in &ctx.frame.interactions {
            self.record_interaction(interaction.a, interaction.b, interaction.kind, interaction.strength, ctx.day);
        }

        for publication in &ctx.frame.publications {
            let info_id = self.publish(
                publication.info_type,
                publication.content.clone(),
                publication.accuracy,
                publication.origin_id,
                publication.origin_region,
                tick,
            );
            let regional = self.items.get(&info_id).is_some_and(|i| i.is_regional());
            out.push(SimEvent::InformationPublished {
                tick,
                info_id,
                info_type: publication.info_type,
                origin_region: publication.origin_region,
                regional,
            });
        }

        let adjacency = ctx.frame.adjacency();
        for report in self.tick(ctx.days, &adjacency, rng) {
            log::debug!(
                "tick={tick} information: item {} +{} knowers, +{} regions",
                report.info_id.0, report.new_knowers, report.new_regions.len()
            );
            out.push(SimEvent::InformationSpread {
                tick,
                info_id: report.info_id,
                new_knowers: report.new_knowers,
                new_regions: report.new_regions,
            });
        }

        for info_id in self.retire(&adjacency) {
            log::debug!("tick={tick} information: item {} retired", info_id.0);
            out.push(SimEvent::InformationRetired { tick, info_id });
        }

        let decay = self.decay_relationships(ctx.day);
        if decay.weakened > 0 || decay.pruned > 0 {
            out.push(SimEvent::RelationshipsDecayed {
                tick,
                weakened: decay.weakened,
                pruned: decay.pruned,
            });
        }

        Ok(out)
    }

    fn export_state(&self) -> SimResult<Vec<StateEntry>> {
        let mut entries = Vec::with_capacity(self.items.len() + self.relationships.len() + 1);
        for (id, item) in &self.items {
            entries.push(encode_entry(format!("info/{:016}", id.0), item)?);
        }
        for ((a, b), rel) in &self.relationships {
            entries.push(encode_entry(format!("rel/{a}/{b}"), rel)?);
        }
        entries.push(encode_entry("meta/next_id".into(), &self.next_id)?);
        Ok(entries)
    }

    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()> {
        let name = self.name();
        self.items.clear();
        self.relationships.clear();
        self.links.clear();
        self.next_id = 1;

        for entry in entries {
            let kind = entry.0.split('/').next().unwrap_or_default();
            match kind {
                "info" => {
                    let item: Information = decode_entry(name, entry)?;
                    self.items.insert(item.id, item);
                }
                "rel" => {
                    let rel: SocialRelationship = decode_entry(name, entry)?;
                    if rel.a >= rel.b {
                        return Err(SimError::MalformedState {
                            component: name.to_string(),
                            key:       entry.0.clone(),
                        });
                    }
                    self.links.entry(rel.a).or_default().insert(rel.b);
                    self.links.entry(rel.b).or_default().insert(rel.a);
                    self.relationships.insert((rel.a, rel.b), rel);
                }
                "meta" if entry.0 == "meta/next_id" => {
                    self.next_id = decode_entry(name, entry)?;
                }
                _ => log::debug!("information: ignoring unknown state entry {}", entry.0),
            }
        }
        let highest = self.items.keys().next_back().map_or(0, |id| id.0);
        self.next_id = self.next_id.max(highest + 1);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
