use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected shape.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more settings are invalid.
    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    ValidationFailed(Vec<String>),

    /// The requested entity is not configured.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}
