use async_trait::async_trait;
use engine_core::{
    connectors::secrets::{Secret, SecretStore},
    error::SecretError,
};
use std::collections::HashMap;

/// Secret store over environment-style key/value pairs, usually the process
/// environment merged with a `.env` file.
pub struct EnvSecretStore {
    values: HashMap<String, String>,
}

impl EnvSecretStore {
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn from_process_env() -> Self {
        Self {
            values: std::env::vars().collect(),
        }
    }

    /// Layers `overrides` on top of the current values.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.values.extend(overrides);
        self
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_credential(&self, name: &str) -> Result<Secret, SecretError> {
        match self.values.get(name) {
            Some(value) if value.trim().is_empty() => Err(SecretError::Empty(name.to_string())),
            Some(value) => Ok(Secret::new(value.trim())),
            None => Err(SecretError::NotFound(name.to_string())),
        }
    }
}
