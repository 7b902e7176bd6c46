//! Snapshot serialization: full simulation state to/from the store.
//!
//! A snapshot is taken every SNAPSHOT_INTERVAL ticks.
//! It captures the complete state needed to resume simulation
//! from that tick without replaying from tick 0: the clock, the master
//! seed, and every component's exported `StateEntry` list.

use crate::{
    clock::SimClock,
    subsystem::StateEntry,
    types::{RunId, Tick},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SNAPSHOT_INTERVAL: Tick = 30; // monthly at one day per tick

/// Snapshot header. Component entries are stored as separate rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub run_id:     RunId,
    pub tick:       Tick,
    pub seed:       u64,
    pub clock:      SimClock,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimSnapshot {
    pub header:     SnapshotHeader,
    pub components: BTreeMap<String, Vec<StateEntry>>,
}

impl SimSnapshot {
    pub fn tick(&self) -> Tick {
        self.header.tick
    }

    pub fn entries_for(&self, component: &str) -> &[StateEntry] {
        self.components.get(component).map_or(&[], |e| e.as_slice())
    }
}
