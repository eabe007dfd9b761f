use engine_core::error::{SecretError, WarehouseError};
use thiserror::Error;

/// Errors raised while building a connector, before any request is made.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The configured URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Failed to establish a TLS session.
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Postgres driver error while connecting.
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// No credential name was configured for the connector.
    #[error("Missing credential for {0}")]
    MissingCredential(String),

    /// The credential needed to connect is missing.
    #[error("Credential error: {0}")]
    Credential(#[from] SecretError),
}

impl From<ConnectorError> for WarehouseError {
    fn from(err: ConnectorError) -> Self {
        WarehouseError::Unavailable(err.to_string())
    }
}
