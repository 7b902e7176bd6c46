//! The simulation engine. Drives every component once per tick.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Scale subsystem        (population → mode)
//!   2. Cohort subsystem       (cohorts, regional economies, trades)
//!   3. Migration subsystem    (reads regional economies from events)
//!   4. Mobility subsystem
//!   5. Information subsystem  (publications, spread, relationship decay)
//!
//! RULES:
//!   - Subsystems execute in registration order, every tick.
//!   - No subsystem calls another subsystem's functions directly.
//!   - All randomness flows through the RngBank, one stream per
//!     subsystem per tick.
//!   - All state changes are recorded in the event log.
//!   - Wall-clock tick timing feeds the warning level only; it never
//!     reaches the event log.

use crate::{
    clock::SimClock,
    cohort_subsystem::CohortAggregator,
    config::SimConfig,
    error::{SimError, SimResult},
    event::{EventLogEntry, SimEvent},
    frame::{TickContext, WorldFrame},
    information_subsystem::InformationEngine,
    migration_subsystem::MigrationEngine,
    mobility_subsystem::MobilityEngine,
    rng::{RngBank, SubsystemSlot},
    scale_policy::{ScaleHandle, ScalePolicy, ScaleSubsystem, WarningLevel},
    snapshot::{SimSnapshot, SnapshotHeader, SNAPSHOT_INTERVAL},
    store::SimStore,
    subsystem::{SimSubsystem, StateEntry},
    types::{RunId, Tick},
};
use std::{collections::BTreeMap, time::Instant};

pub struct SimEngine {
    pub run_id:     RunId,
    pub clock:      SimClock,
    pub rng_bank:   RngBank,
    seed:           u64,
    config:         SimConfig,
    scale:          ScaleHandle,
    subsystems:     Vec<(SubsystemSlot, Box<dyn SimSubsystem>)>,
    store:          SimStore,
}

impl SimEngine {
    /// Bare engine with no subsystems. Fails when the scale policy
    /// configuration is unusable.
    pub fn new(run_id: RunId, seed: u64, config: SimConfig, store: SimStore) -> SimResult<Self> {
        config.validate()?;
        let scale = ScaleHandle::new(ScalePolicy::new(config.scale.clone())?);
        Ok(Self {
            clock:      SimClock::new(run_id.clone(), config.clock.ms_per_tick, config.clock.days_per_tick),
            rng_bank:   RngBank::new(seed),
            seed,
            config,
            scale,
            subsystems: Vec::new(),
            store,
            run_id,
        })
    }

    /// Build a fully wired engine with all subsystems registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(run_id: RunId, seed: u64, config: SimConfig, store: SimStore) -> SimResult<Self> {
        let mut engine = SimEngine::new(run_id, seed, config, store)?;
        let scale = engine.scale.clone();
        let config = engine.config.clone();

        // EXECUTION ORDER: fixed, documented, never reordered.
        engine.register(SubsystemSlot::Scale, Box::new(ScaleSubsystem::new(scale.clone())));
        engine.register(
            SubsystemSlot::Cohort,
            Box::new(CohortAggregator::new(scale.clone(), config.economy)),
        );
        engine.register(
            SubsystemSlot::Migration,
            Box::new(MigrationEngine::new(config.migration)),
        );
        engine.register(
            SubsystemSlot::Mobility,
            Box::new(MobilityEngine::new(scale.clone(), config.mobility)),
        );
        engine.register(
            SubsystemSlot::Information,
            Box::new(InformationEngine::new(scale, config.information)),
        );
        Ok(engine)
    }

    /// In-memory engine with the test configuration and a registered run.
    pub fn build_test(run_id: &str, seed: u64) -> SimResult<Self> {
        Self::build_test_with(run_id, seed, SimConfig::default_test())
    }

    pub fn build_test_with(run_id: &str, seed: u64, config: SimConfig) -> SimResult<Self> {
        let store = SimStore::in_memory()?;
        store.migrate()?;
        store.insert_run(run_id, seed, "0.1.0-test")?;
        Self::build(run_id.to_string(), seed, config, store)
    }

    /// Register a subsystem. Call in the documented execution order.
    pub fn register(&mut self, slot: SubsystemSlot, subsystem: Box<dyn SimSubsystem>) {
        self.subsystems.push((slot, subsystem));
    }

    /// Advance one tick against `frame`. This is the core simulation step.
    ///
    /// A paused clock is resumed for the duration of the step and paused
    /// again before returning, so a paused engine can be single-stepped.
    /// `run_ticks` resumes once for the whole batch instead.
    pub fn tick(&mut self, frame: &WorldFrame) -> SimResult<Vec<SimEvent>> {
        let was_paused = self.clock.paused;
        self.clock.resume();
        let current_tick = self.clock.advance();
        let started = Instant::now();

        let ctx = TickContext {
            tick:   current_tick,
            now_ms: self.clock.elapsed_ms,
            days:   self.clock.days(),
            day:    self.clock.day(),
            frame,
        };

        let mut tick_events: Vec<SimEvent> = vec![
            SimEvent::TickStarted { tick: current_tick }
        ];

        // Each subsystem sees all events emitted so far this tick.
        for (slot, subsystem) in &mut self.subsystems {
            let mut rng = self.rng_bank.for_subsystem_at_tick(*slot, current_tick);
            let new_events = subsystem.update(&ctx, &tick_events, &mut rng)?;

            for event in &new_events {
                let entry = EventLogEntry {
                    id:         None,
                    run_id:     self.run_id.clone(),
                    tick:       current_tick,
                    subsystem:  subsystem.name().to_string(),
                    event_type: event.type_name().to_string(),
                    payload:    serde_json::to_string(event)?,
                };
                self.store.append_event(&entry)?;
            }

            tick_events.extend(new_events);
        }

        tick_events.push(SimEvent::TickCompleted { tick: current_tick });

        let before = self.scale.read(|p| p.warning_level());
        self.scale.record_tick_time(started.elapsed().as_secs_f64() * 1_000.0);
        let after = self.scale.read(|p| p.warning_level());
        if after > before && after != WarningLevel::None {
            let avg = self.scale.read(|p| p.avg_tick_ms());
            log::warn!("tick={current_tick} engine: tick time warning {after:?} (avg {avg:.1}ms)");
        }

        // Snapshot every SNAPSHOT_INTERVAL ticks.
        if current_tick % SNAPSHOT_INTERVAL == 0 {
            self.take_snapshot()?;
        }

        if was_paused {
            self.clock.pause();
        }
        Ok(tick_events)
    }

    /// Run n ticks in a loop against the same frame.
    /// Used for testing and fast-forward.
    pub fn run_ticks(&mut self, n: u64, frame: &WorldFrame) -> SimResult<Vec<SimEvent>> {
        // Emit RunInitialized at tick 0 so seed differences are observable.
        if self.clock.current_tick == 0 {
            let init_event = SimEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.seed,
            };
            let entry = EventLogEntry {
                id:         None,
                run_id:     self.run_id.clone(),
                tick:       0,
                subsystem:  "engine".to_string(),
                event_type: init_event.type_name().to_string(),
                payload:    serde_json::to_string(&init_event)?,
            };
            self.store.append_event(&entry)?;
        }
        self.clock.resume();
        let mut events = Vec::new();
        for _ in 0..n {
            events.extend(self.tick(frame)?);
        }
        self.clock.pause();
        Ok(events)
    }

    // ── State ──────────────────────────────────────────────────

    /// Every component's exported state, keyed by component name.
    pub fn export_state(&self) -> SimResult<BTreeMap<String, Vec<StateEntry>>> {
        let mut state = BTreeMap::new();
        for (_, subsystem) in &self.subsystems {
            state.insert(subsystem.name().to_string(), subsystem.export_state()?);
        }
        Ok(state)
    }

    /// Replace component state. Components missing from `state` are reset
    /// to empty; names no registered component owns are an error.
    pub fn import_state(&mut self, state: &BTreeMap<String, Vec<StateEntry>>) -> SimResult<()> {
        if let Some(name) = state
            .keys()
            .find(|name| !self.subsystems.iter().any(|(_, s)| s.name() == name.as_str()))
        {
            return Err(SimError::UnknownComponent { name: name.clone() });
        }
        for (_, subsystem) in &mut self.subsystems {
            let entries = state.get(subsystem.name()).map_or(&[][..], |e| e.as_slice());
            subsystem.import_state(entries)?;
        }
        Ok(())
    }

    /// Persist the current state as a snapshot at the current tick.
    pub fn take_snapshot(&mut self) -> SimResult<Tick> {
        let tick = self.clock.current_tick;
        let components = self.export_state()?;
        let header = SnapshotHeader {
            run_id:     self.run_id.clone(),
            tick,
            seed:       self.seed,
            clock:      self.clock.clone(),
            components: components.keys().cloned().collect(),
        };
        self.store.save_snapshot(&self.run_id, tick, &serde_json::to_string(&header)?)?;
        for (name, entries) in &components {
            self.store.save_component_state(&self.run_id, tick, name, entries)?;
        }
        log::debug!("tick={tick} engine: snapshot saved ({} components)", components.len());
        Ok(tick)
    }

    /// Load the latest snapshot at or before `tick` from the store.
    pub fn load_snapshot(&self, tick: Tick) -> SimResult<SimSnapshot> {
        let (_, json) = self
            .store
            .latest_snapshot_before(&self.run_id, tick)?
            .ok_or(SimError::SnapshotNotFound { tick })?;
        let header: SnapshotHeader = serde_json::from_str(&json)?;
        let mut components = BTreeMap::new();
        for name in &header.components {
            let entries = self.store.load_component_state(&self.run_id, header.tick, name)?;
            components.insert(name.clone(), entries);
        }
        Ok(SimSnapshot { header, components })
    }

    /// Rewind to the latest snapshot at or before `tick`.
    /// Returns the tick actually restored. The engine is left paused.
    pub fn restore_snapshot(&mut self, tick: Tick) -> SimResult<Tick> {
        let snapshot = self.load_snapshot(tick)?;
        self.import_state(&snapshot.components)?;
        self.seed = snapshot.header.seed;
        self.rng_bank = RngBank::new(snapshot.header.seed);
        self.clock = snapshot.header.clock.clone();
        self.clock.pause();
        log::info!("tick={} engine: restored snapshot (requested {tick})", snapshot.tick());
        Ok(snapshot.tick())
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn scale(&self) -> &ScaleHandle {
        &self.scale
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Downcast to a registered subsystem.
    /// Used by tests and the runner to read end-of-run state.
    pub fn subsystem<T: 'static>(&self) -> Option<&T> {
        self.subsystems
            .iter()
            .find_map(|(_, sub)| sub.as_any().downcast_ref::<T>())
    }

    pub fn cohorts(&self) -> Option<&CohortAggregator> {
        self.subsystem::<CohortAggregator>()
    }

    pub fn migration(&self) -> Option<&MigrationEngine> {
        self.subsystem::<MigrationEngine>()
    }

    pub fn mobility(&self) -> Option<&MobilityEngine> {
        self.subsystem::<MobilityEngine>()
    }

    pub fn information(&self) -> Option<&InformationEngine> {
        self.subsystem::<InformationEngine>()
    }

    /// Query events for a specific tick from the store.
    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_tick(
        &self,
        run_id: &str,
        tick: Tick,
    ) -> SimResult<Vec<EventLogEntry>> {
        self.store.events_for_tick(run_id, tick)
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }
}
