use async_trait::async_trait;
use engine_core::{
    connectors::warehouse::{KeyedRow, Warehouse},
    error::WarehouseError,
};
use model::{
    core::field_type::FieldType, records::record::Record, schema::version::SchemaVersion,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: BTreeMap<String, FieldType>,
    rows: BTreeMap<String, Record>,
}

/// Warehouse kept in process memory with the same contract as a real one:
/// tables must be evolved before rows with new columns are accepted.
#[derive(Default)]
pub struct MemoryWarehouse {
    tables: RwLock<HashMap<String, MemoryTable>>,
    failing_upserts: AtomicU32,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` upserts fail as unavailable.
    pub fn fail_next_upserts(&self, count: u32) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Rows of `table` ordered by key.
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn keys(&self, table: &str) -> Vec<String> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn columns(&self, table: &str) -> Option<BTreeMap<String, FieldType>> {
        self.tables.read().await.get(table).map(|t| t.columns.clone())
    }

    fn take_failure(&self) -> bool {
        self.failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn evolve(&self, table: &str, schema: &SchemaVersion) -> Result<(), WarehouseError> {
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();

        for (name, ty) in schema.fields.iter() {
            match entry.columns.get(name).copied() {
                Some(existing) if existing.accepts(ty) => {}
                Some(existing) if ty.accepts(&existing) => {
                    entry.columns.insert(name.clone(), *ty);
                }
                Some(existing) => {
                    return Err(WarehouseError::Schema(format!(
                        "cannot change column '{name}' of {table} from {existing} to {ty}"
                    )));
                }
                None => {
                    entry.columns.insert(name.clone(), *ty);
                }
            }
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, rows: &[KeyedRow]) -> Result<u64, WarehouseError> {
        if self.take_failure() {
            return Err(WarehouseError::Unavailable("injected upsert failure".into()));
        }

        let mut tables = self.tables.write().await;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::Schema(format!("table {table} does not exist")))?;

        for row in rows {
            if let Some(unknown) = row.record.keys().find(|k| !target.columns.contains_key(*k)) {
                return Err(WarehouseError::Rejected(format!(
                    "unknown column '{unknown}' in {table}"
                )));
            }
        }

        for row in rows {
            target.rows.insert(row.key.clone(), row.record.clone());
        }
        Ok(rows.len() as u64)
    }
}
