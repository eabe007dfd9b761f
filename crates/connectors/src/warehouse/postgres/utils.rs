use crate::error::ConnectorError;
use engine_core::error::WarehouseError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, Config, NoTls, config::SslMode, error::SqlState};
use tracing::{error, warn};

pub(crate) async fn connect_client(url: &str) -> Result<Client, ConnectorError> {
    let config = url
        .parse::<Config>()
        .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;

    match config.get_ssl_mode() {
        SslMode::Disable => connect_without_tls(config).await,
        SslMode::Prefer => match connect_with_tls(config.clone()).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                connect_without_tls(config).await
            }
        },
        _ => connect_with_tls(config).await,
    }
}

async fn connect_with_tls(config: Config) -> Result<Client, ConnectorError> {
    let connector = TlsConnector::builder().build()?;
    let tls = MakeTlsConnector::new(connector);
    let (client, connection) = config.connect(tls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok(client)
}

async fn connect_without_tls(config: Config) -> Result<Client, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok(client)
}

/// Transient server errors (lock conflicts, connection limits, restarts)
/// and lost connections mean the warehouse is unavailable and the load may
/// be retried. Every other server error rejects the batch.
pub(crate) fn map_pg_error(err: tokio_postgres::Error) -> WarehouseError {
    if err.is_closed() {
        return WarehouseError::Unavailable(err.to_string());
    }
    match err.as_db_error() {
        Some(db) => from_sqlstate(db.code(), db.message()),
        None => WarehouseError::Unavailable(err.to_string()),
    }
}

fn from_sqlstate(code: &SqlState, message: &str) -> WarehouseError {
    let detail = format!("{}: {message}", code.code());
    if is_transient(code) {
        WarehouseError::Unavailable(detail)
    } else {
        WarehouseError::Rejected(detail)
    }
}

fn is_transient(code: &SqlState) -> bool {
    matches!(
        *code,
        SqlState::T_R_SERIALIZATION_FAILURE
            | SqlState::T_R_DEADLOCK_DETECTED
            | SqlState::LOCK_NOT_AVAILABLE
            | SqlState::TOO_MANY_CONNECTIONS
            | SqlState::ADMIN_SHUTDOWN
            | SqlState::CRASH_SHUTDOWN
            | SqlState::CANNOT_CONNECT_NOW
            | SqlState::QUERY_CANCELED
            | SqlState::OPERATOR_INTERVENTION
    ) || code.code().starts_with("08")
        || code.code().starts_with("53")
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
