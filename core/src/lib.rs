pub mod clock;
pub mod cohort_subsystem;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod information_subsystem;
pub mod migration_subsystem;
pub mod mobility_subsystem;
pub mod rng;
pub mod scale_policy;
pub mod snapshot;
pub mod store;
pub mod subsystem;
pub mod types;
