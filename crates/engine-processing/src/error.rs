use engine_core::error::{SourceError, StagingError, StateError, WarehouseError};
use model::{core::identifiers::EntityId, execution::errors::ModelError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("source for '{entity}' is unavailable, circuit open for another {retry_in:?}")]
    SourceUnavailable { entity: EntityId, retry_in: Duration },

    #[error("fetch for '{entity}' gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        entity: EntityId,
        attempts: u32,
        #[source]
        source: SourceError,
    },

    #[error("fatal source error for '{entity}': {source}")]
    Fatal {
        entity: EntityId,
        #[source]
        source: SourceError,
    },

    #[error("extraction cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum DriftError {
    /// The batch itself is inconsistent, e.g. one field holds both strings
    /// and integers.
    #[error("cannot infer batch schema: {0}")]
    Inference(#[from] ModelError),

    #[error("schema registry error: {0}")]
    State(#[from] StateError),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("load failed: {0}")]
    Load(#[from] WarehouseError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("staged batch '{batch_id}' is corrupt: {reason}")]
    Corrupt { batch_id: String, reason: String },

    #[error("schema version {version} of '{entity}' is not registered")]
    MissingSchema { entity: EntityId, version: u32 },

    #[error("commit cancelled")]
    Cancelled,
}

impl CommitError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommitError::Cancelled)
    }
}
