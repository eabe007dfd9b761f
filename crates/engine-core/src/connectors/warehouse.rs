use crate::error::WarehouseError;
use async_trait::async_trait;
use model::{records::record::Record, schema::version::SchemaVersion};

/// A record paired with its upsert key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub key: String,
    pub record: Record,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Brings `table` in line with an accepted schema version: creates it if
    /// needed, adds new columns and widens changed ones. Must be idempotent.
    async fn evolve(&self, table: &str, schema: &SchemaVersion) -> Result<(), WarehouseError>;

    /// Inserts or replaces rows by key and returns the number of rows
    /// written. Applying the same rows twice leaves the same end state.
    async fn upsert(&self, table: &str, rows: &[KeyedRow]) -> Result<u64, WarehouseError>;
}
