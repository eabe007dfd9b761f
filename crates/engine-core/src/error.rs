use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("failed to encode state entry: {0}")]
    Encode(#[from] bincode::Error),

    #[error("concurrent update of '{key}': expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: String,
        found: String,
    },

    #[error("watermark kind mismatch for '{entity}': stored {stored}, proposed {proposed}")]
    WatermarkKind {
        entity: String,
        stored: String,
        proposed: String,
    },

    #[error("no quarantine record for batch '{0}'")]
    QuarantineNotFound(String),
}

/// Errors a source API call can produce, shaped for retry classification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("throttled by source (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    #[error("source returned server error {status}")]
    Server { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("report not ready (status '{status}')")]
    NotReady { status: String },

    #[error("authentication failed with status {status}")]
    Auth { status: u16 },

    #[error("request rejected with status {status}: {body}")]
    BadRequest { status: u16, body: String },

    #[error("unsupported API version: {0}")]
    UnsupportedVersion(String),

    #[error("failed to decode page: {0}")]
    Decode(String),

    #[error("credential error: {0}")]
    Credential(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("staged object '{0}' already exists with different content")]
    AlreadyExists(String),

    #[error("staged object '{0}' not found")]
    NotFound(String),

    #[error("invalid staging path '{0}'")]
    InvalidPath(String),

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode staged batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("staging store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),

    #[error("upsert rejected: {0}")]
    Rejected(String),

    #[error("schema evolution failed: {0}")]
    Schema(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SecretError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("credential '{0}' is empty")]
    Empty(String),
}
