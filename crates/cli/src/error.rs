use engine_config::error::ConfigError;
use engine_core::error::StateError;
use engine_runtime::error::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load env file: {0}")]
    EnvFile(String),

    #[error("Failed to run sync: {0}")]
    Sync(#[from] SyncError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Invalid watermark '{0}'")]
    InvalidWatermark(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
