use connectors::error::ConnectorError;
use engine_config::error::ConfigError;
use engine_core::error::{SecretError, StateError};
use model::{core::identifiers::EntityId, execution::errors::ModelError};
use thiserror::Error;

/// Errors that keep a sync job from producing a report of its own.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The durable state store failed outside of a running job.
    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Credential error: {0}")]
    Credential(#[from] SecretError),

    /// A job state transition was rejected.
    #[error("Job error: {0}")]
    Job(#[from] ModelError),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),
}
