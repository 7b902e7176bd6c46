//! scale-runner: headless driver for the population simulation core.
//!
//! Usage:
//!   scale-runner --seed 12345 --ticks 365 --agents 5000 --regions 6
//!   scale-runner --seed 12345 --db run.db --data-dir ./data
//!
//! The runner owns a synthetic population, hands the engine one
//! `WorldFrame` per tick, and applies migration flows and mobility
//! transitions from the emitted events back onto its agents.

use anyhow::Result;
use popscale_core::{
    config::SimConfig,
    engine::SimEngine,
    event::SimEvent,
    frame::{AgentSample, Interaction, MobilityCandidate, Publication, RegionLink, RegionSignals, TradeRequest, WorldFrame},
    information_subsystem::{InfoType, RelationshipKind},
    mobility_subsystem::AgentStats,
    rng::SubsystemRng,
    store::SimStore,
    types::{Profession, RegionId, Tick},
};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

/// Publications per synthetic month.
const PUBLICATION_INTERVAL: Tick = 30;
const INTERACTIONS_PER_TICK: usize = 50;
const CANDIDATES_PER_TICK: usize = 20;
/// Units requested on every configured trade route each tick.
const TRADE_REQUEST: f64 = 50.0;

#[derive(Default, serde::Serialize)]
struct RunSummary {
    run_id:           String,
    seed:             u64,
    ticks:            u64,
    final_tick:       Tick,
    population:       u64,
    mode:             String,
    warning_level:    String,
    avg_tick_ms:      f64,
    migrants_moved:   u64,
    career_changes:   u64,
    items_published:  u64,
    items_retired:    u64,
    relationships:    usize,
    cohorts:          usize,
    region_population: BTreeMap<String, u64>,
    professions:      BTreeMap<String, u64>,
    finished_at:      String,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let ticks = parse_arg(&args, "--ticks", 365u64);
    let agents = parse_arg(&args, "--agents", 5_000usize);
    let regions = parse_arg(&args, "--regions", 6u32).max(2);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    println!("popscale: scale-runner");
    println!("  seed:      {seed}");
    println!("  ticks:     {ticks}");
    println!("  agents:    {agents}");
    println!("  regions:   {regions}");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!();

    let config = if Path::new(data_dir).is_dir() {
        SimConfig::load(data_dir)?
    } else {
        log::warn!("data dir {data_dir} not found, using built-in defaults");
        SimConfig::default()
    };

    let run_id = format!("run-{}", uuid::Uuid::new_v4());
    let db_effective: String = if db == ":memory:" {
        format!("file:{run_id}?mode=memory&cache=shared")
    } else {
        db.to_string()
    };
    let store = SimStore::open(&db_effective)?;
    store.migrate()?;
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    let mut engine = SimEngine::build(run_id.clone(), seed, config, store)?;
    let mut world = World::generate(seed, agents, regions);
    let mut summary = RunSummary {
        run_id: run_id.clone(),
        seed,
        ticks,
        ..RunSummary::default()
    };

    let routes = engine.cohorts().map(|c| c.trade_routes()).unwrap_or_default();
    for _ in 0..ticks {
        let next_tick = engine.clock.current_tick + 1;
        let mut frame = world.frame(next_tick);
        frame.trade_requests = routes
            .iter()
            .map(|r| TradeRequest { route_id: r.route_id.clone(), amount: TRADE_REQUEST })
            .collect();
        let events = engine.tick(&frame)?;
        world.apply(&events, &mut summary);
    }

    summary.final_tick = engine.clock.current_tick;
    let metrics = engine.scale().metrics();
    summary.population = metrics.population;
    summary.mode = format!("{:?}", metrics.mode);
    summary.warning_level = format!("{:?}", metrics.warning_level);
    summary.avg_tick_ms = metrics.avg_tick_ms;
    summary.relationships = engine.information().map_or(0, |i| i.total_relationships());
    summary.cohorts = engine.cohorts().map_or(0, |c| c.cohort_count());
    for agent in &world.agents {
        *summary.region_population.entry(agent.region.to_string()).or_default() += 1;
        *summary.professions.entry(agent.profession.to_string()).or_default() += 1;
    }
    summary.finished_at = chrono::Utc::now().to_rfc3339();

    println!("=== RUN SUMMARY ===");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ── Synthetic world ──────────────────────────────────────────────────

struct World {
    rng:     SubsystemRng,
    agents:  Vec<AgentSample>,
    signals: BTreeMap<RegionId, RegionSignals>,
    links:   Vec<RegionLink>,
}

impl World {
    fn generate(seed: u64, agents: usize, regions: u32) -> Self {
        let mut rng = SubsystemRng::seeded(seed).with_name("runner");

        let signals: BTreeMap<RegionId, RegionSignals> = (0..regions)
            .map(|r| {
                let signals = RegionSignals {
                    safety:         20.0 + rng.next_f64() * 70.0,
                    infrastructure: 20.0 + rng.next_f64() * 70.0,
                    food:           30.0 + rng.next_f64() * 60.0,
                    disease:        rng.next_f64() * 30.0,
                    ..RegionSignals::default()
                };
                (RegionId(r), signals)
            })
            .collect();

        // A ring, plus a chord across every third region.
        let mut links = Vec::new();
        for r in 0..regions {
            links.push(RegionLink {
                a: RegionId(r),
                b: RegionId((r + 1) % regions),
                distance: 50.0 + rng.next_f64() * 150.0,
                cultural_similarity: 0.4 + rng.next_f64() * 0.6,
            });
            if r % 3 == 0 && regions > 3 {
                links.push(RegionLink {
                    a: RegionId(r),
                    b: RegionId((r + regions / 2) % regions),
                    distance: 200.0 + rng.next_f64() * 300.0,
                    cultural_similarity: rng.next_f64() * 0.5,
                });
            }
        }

        let agents = (0..agents)
            .map(|i| {
                let profession = Profession::ALL[rng.index(Profession::ALL.len())];
                AgentSample {
                    id: i as u64 + 1,
                    region: RegionId(rng.next_u64_below(regions as u64) as u32),
                    profession,
                    wealth: 10.0 + rng.next_f64() * 500.0,
                    happiness: 30.0 + rng.next_f64() * 60.0,
                    age: 16.0 + rng.next_f64() * 50.0,
                    employed: profession != Profession::Unemployed,
                }
            })
            .collect();

        Self { rng, agents, signals, links }
    }

    fn frame(&mut self, tick: Tick) -> WorldFrame {
        let mut frame = WorldFrame {
            agents: self.agents.clone(),
            region_signals: self.signals.clone(),
            region_links: self.links.clone(),
            population_stats: self.average_stats(),
            ..WorldFrame::default()
        };
        if self.agents.len() < 2 {
            return frame;
        }

        for _ in 0..INTERACTIONS_PER_TICK {
            let a = self.agents[self.rng.index(self.agents.len())].id;
            let b = self.agents[self.rng.index(self.agents.len())].id;
            let kind = match self.rng.index(4) {
                0 => RelationshipKind::Friend,
                1 => RelationshipKind::Colleague,
                2 => RelationshipKind::Neighbor,
                _ => RelationshipKind::Acquaintance,
            };
            frame.interactions.push(Interaction { a, b, kind, strength: 20.0 + self.rng.next_f64() * 60.0 });
        }

        for idx in self.rng.sample_indices(self.agents.len(), CANDIDATES_PER_TICK) {
            let agent = &self.agents[idx];
            frame.mobility_candidates.push(MobilityCandidate {
                agent_id: agent.id,
                profession: agent.profession,
                stats: AgentStats {
                    education: self.rng.next_f64() * 100.0,
                    wealth: agent.wealth,
                    connections: self.rng.next_f64() * 100.0,
                    age: agent.age,
                    stability: 50.0,
                },
            });
        }

        if tick % PUBLICATION_INTERVAL == 1 {
            let origin = &self.agents[self.rng.index(self.agents.len())];
            let info_type = match self.rng.index(3) {
                0 => InfoType::Rumor,
                1 => InfoType::News,
                _ => InfoType::Scandal,
            };
            frame.publications.push(Publication {
                info_type,
                content: format!("{info_type:?} from {} on tick {tick}", origin.region),
                accuracy: 100.0,
                origin_id: Some(origin.id),
                origin_region: origin.region,
            });
        }
        frame
    }

    fn average_stats(&self) -> AgentStats {
        if self.agents.is_empty() {
            return AgentStats::default();
        }
        let n = self.agents.len() as f64;
        AgentStats {
            education: 30.0,
            wealth: self.agents.iter().map(|a| a.wealth).sum::<f64>() / n,
            connections: 30.0,
            age: self.agents.iter().map(|a| a.age).sum::<f64>() / n,
            stability: 50.0,
        }
    }

    fn apply(&mut self, events: &[SimEvent], summary: &mut RunSummary) {
        for event in events {
            match event {
                SimEvent::MigrationPlanned { flow, .. } => {
                    let mut remaining = flow.count;
                    for agent in self.agents.iter_mut().filter(|a| a.region == flow.from) {
                        if remaining == 0 {
                            break;
                        }
                        agent.region = flow.to;
                        remaining -= 1;
                    }
                    summary.migrants_moved += flow.count - remaining;
                }
                SimEvent::MobilityTransition { event, .. } if event.success => {
                    let mut remaining = event.count;
                    for agent in self.agents.iter_mut() {
                        if remaining == 0 {
                            break;
                        }
                        let matches = match event.agent_id {
                            Some(id) => agent.id == id,
                            None => agent.profession == event.from_profession,
                        };
                        if matches {
                            agent.profession = event.to_profession;
                            agent.employed = event.to_profession != Profession::Unemployed;
                            remaining -= 1;
                        }
                    }
                    summary.career_changes += event.count - remaining;
                }
                SimEvent::InformationPublished { .. } => summary.items_published += 1,
                SimEvent::InformationRetired { .. } => summary.items_retired += 1,
                _ => {}
            }
        }
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
