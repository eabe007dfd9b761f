use crate::{
    error::ConfigError,
    settings::{AdSyncConfig, validator::ConfigValidator},
};
use std::path::Path;
use tracing::debug;

pub mod error;
pub mod settings;

/// Reads, parses and validates a config file.
pub fn load(path: impl AsRef<Path>) -> Result<AdSyncConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded config file");
    parse(&raw)
}

/// Parses and validates config text.
pub fn parse(raw: &str) -> Result<AdSyncConfig, ConfigError> {
    let config: AdSyncConfig = toml::from_str(raw)?;
    ConfigValidator::new(&config).validate()?;
    Ok(config)
}
