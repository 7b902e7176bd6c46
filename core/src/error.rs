use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scale policy unconfigured: {reason}")]
    UnconfiguredPolicy { reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Component '{name}' not found")]
    UnknownComponent { name: String },

    #[error("Malformed state entry '{key}' for component '{component}'")]
    MalformedState { component: String, key: String },

    #[error("No snapshot at or before tick {tick}")]
    SnapshotNotFound { tick: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
