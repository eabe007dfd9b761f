use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("invalid watermark: {0}")]
    InvalidWatermark(String),

    #[error("record {index} has no usable watermark in field '{field}'")]
    MissingWatermark { field: String, index: usize },

    #[error("record {index} is missing primary key field '{field}'")]
    MissingKey { field: String, index: usize },

    #[error("field '{field}' mixes incompatible types {left} and {right} within one batch")]
    ConflictingTypes {
        field: String,
        left: String,
        right: String,
    },

    #[error("invalid sync job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("manifest mismatch for batch '{batch_id}'")]
    ManifestMismatch { batch_id: String },
}
