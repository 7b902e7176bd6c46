//! Subsystem trait and persisted-state helpers.
//!
//! RULE: Every subsystem implements SimSubsystem.
//! The engine calls update() on each registered subsystem
//! in registration order, every tick.
//! Execution order is fixed and documented in engine.rs.
//!
//! RULE: Every subsystem persists its owned maps as a flat list of
//! (key, JSON value) entries. Restoring must rebuild the same maps;
//! derived caches may come back invalidated instead of verbatim.

use crate::{
    error::{SimError, SimResult},
    event::SimEvent,
    frame::TickContext,
    rng::SubsystemRng,
};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;

/// One persisted `(key, value)` pair. Values are JSON.
pub type StateEntry = (String, String);

/// The contract every subsystem must fulfill.
pub trait SimSubsystem: Send {
    /// Unique stable name for this subsystem.
    fn name(&self) -> &'static str;

    /// Called once per tick by the engine.
    ///
    /// - `ctx`:       the current tick, simulated time and input frame
    /// - `events_in`: events emitted by earlier subsystems this tick
    /// - `rng`:       this subsystem's deterministic RNG for this tick
    ///
    /// Returns a vec of new events to add to the tick's event log.
    fn update(
        &mut self,
        ctx: &TickContext<'_>,
        events_in: &[SimEvent],
        rng: &mut SubsystemRng,
    ) -> SimResult<Vec<SimEvent>>;

    /// Flatten owned state into `(key, value)` entries.
    fn export_state(&self) -> SimResult<Vec<StateEntry>>;

    /// Replace owned state with the given entries.
    fn import_state(&mut self, entries: &[StateEntry]) -> SimResult<()>;

    /// For downcasting in tests and tooling only.
    /// Production sim code never uses this.
    fn as_any(&self) -> &dyn Any;
}

pub fn encode_entry<T: Serialize>(key: String, value: &T) -> SimResult<StateEntry> {
    Ok((key, serde_json::to_string(value)?))
}

pub fn decode_entry<T: DeserializeOwned>(component: &str, entry: &StateEntry) -> SimResult<T> {
    serde_json::from_str(&entry.1).map_err(|_| SimError::MalformedState {
        component: component.to_string(),
        key:       entry.0.clone(),
    })
}
