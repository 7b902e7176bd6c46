//! Shared primitive types used across the entire simulation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A simulation tick. One tick = one simulated day by default.
pub type Tick = u64;

/// Simulated milliseconds since run start. Cache lifetimes and
/// rebuild debounces are measured on this clock, never on wall time.
pub type Millis = u64;

/// The canonical run identifier.
pub type RunId = String;

/// Stable identifier of an individual agent, assigned by the caller.
pub type AgentId = u64;

/// Stable integer region id. Regions are never keyed by name inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profession {
    Unemployed,
    Farmer,
    Laborer,
    Craftsman,
    Soldier,
    Merchant,
    Scholar,
    Priest,
    Noble,
}

impl Profession {
    pub const ALL: [Profession; 9] = [
        Profession::Unemployed,
        Profession::Farmer,
        Profession::Laborer,
        Profession::Craftsman,
        Profession::Soldier,
        Profession::Merchant,
        Profession::Scholar,
        Profession::Priest,
        Profession::Noble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unemployed => "unemployed",
            Self::Farmer     => "farmer",
            Self::Laborer    => "laborer",
            Self::Craftsman  => "craftsman",
            Self::Soldier    => "soldier",
            Self::Merchant   => "merchant",
            Self::Scholar    => "scholar",
            Self::Priest     => "priest",
            Self::Noble      => "noble",
        }
    }
}

impl fmt::Display for Profession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tradeable goods tracked in cohort production and consumption maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Food,
    Wood,
    Stone,
    Ore,
    Tools,
    Cloth,
    Luxury,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Food   => "food",
            Self::Wood   => "wood",
            Self::Stone  => "stone",
            Self::Ore    => "ore",
            Self::Tools  => "tools",
            Self::Cloth  => "cloth",
            Self::Luxury => "luxury",
        }
    }
}

/// Resource-keyed quantities. Ordered so serialized state is stable.
pub type ResourceMap = std::collections::BTreeMap<Resource, f64>;
