mod sql;
mod utils;

use crate::error::ConnectorError;
use async_trait::async_trait;
use engine_core::{
    connectors::warehouse::{KeyedRow, Warehouse},
    error::WarehouseError,
};
use model::{core::field_type::FieldType, schema::version::SchemaVersion};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tokio_postgres::{Client, Transaction, types::ToSql};
use tracing::{debug, info};
use sql::ColumnChange;
use utils::{connect_client, map_pg_error};

/// Warehouse backed by Postgres. Every entity lands in its own table keyed
/// by a text `_pk` column.
pub struct PostgresWarehouse {
    client: Mutex<Client>,
    schema: String,
}

impl PostgresWarehouse {
    pub async fn connect(url: &str, schema: impl Into<String>) -> Result<Self, ConnectorError> {
        let client = connect_client(url).await?;
        Ok(Self {
            client: Mutex::new(client),
            schema: schema.into(),
        })
    }

    async fn existing_columns(
        &self,
        tx: &Transaction<'_>,
        table: &str,
    ) -> Result<HashMap<String, String>, WarehouseError> {
        let rows = tx
            .query(sql::QUERY_COLUMNS_SQL, &[&self.schema, &table])
            .await
            .map_err(map_pg_error)?;
        rows.iter()
            .map(|row| -> Result<(String, String), WarehouseError> {
                let name: String = row.try_get(0).map_err(map_pg_error)?;
                let data_type: String = row.try_get(1).map_err(map_pg_error)?;
                Ok((name, data_type))
            })
            .collect()
    }

    async fn column_has_values(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        column: &str,
    ) -> Result<bool, WarehouseError> {
        let row = tx
            .query_one(&sql::column_has_values(&self.schema, table, column), &[])
            .await
            .map_err(map_pg_error)?;
        row.try_get(0).map_err(map_pg_error)
    }
}

fn incompatible(table: &str, column: &str, reported: &str, ty: FieldType) -> WarehouseError {
    WarehouseError::Schema(format!(
        "column '{column}' in {table} is {reported} and cannot hold {}",
        ty.as_str()
    ))
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn evolve(&self, table: &str, schema: &SchemaVersion) -> Result<(), WarehouseError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg_error)?;

        tx.batch_execute(&sql::create_schema(&self.schema))
            .await
            .map_err(map_pg_error)?;
        tx.batch_execute(&sql::create_table(&self.schema, table))
            .await
            .map_err(map_pg_error)?;

        let existing = self.existing_columns(&tx, table).await?;
        for (name, ty) in schema.fields.iter() {
            let statement = match existing.get(name) {
                None => sql::add_column(&self.schema, table, name, *ty),
                Some(reported) => match sql::column_change(reported, *ty) {
                    ColumnChange::Keep => continue,
                    ColumnChange::Widen => sql::widen_column(&self.schema, table, name, *ty),
                    ColumnChange::RetypeIfEmpty => {
                        if self.column_has_values(&tx, table, name).await? {
                            return Err(incompatible(table, name, reported, *ty));
                        }
                        sql::widen_column(&self.schema, table, name, *ty)
                    }
                    ColumnChange::Incompatible => {
                        return Err(incompatible(table, name, reported, *ty));
                    }
                },
            };
            debug!(table, column = %name, %statement, "Evolving warehouse table");
            tx.batch_execute(&statement).await.map_err(map_pg_error)?;
        }

        tx.commit().await.map_err(map_pg_error)?;
        info!(table, version = schema.version, "Warehouse table in line with schema");
        Ok(())
    }

    async fn upsert(&self, table: &str, rows: &[KeyedRow]) -> Result<u64, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(map_pg_error)?;
        let existing = self.existing_columns(&tx, table).await?;

        let names: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.record.keys().map(String::as_str))
            .collect();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let reported = existing.get(name).ok_or_else(|| {
                WarehouseError::Rejected(format!("unknown column '{name}' in {table}"))
            })?;
            columns.push((name, sql::cast_for(reported)));
        }

        let per_statement = (sql::MAX_PARAMS / (columns.len() + 1)).max(1);
        let mut written = 0u64;
        for chunk in rows.chunks(per_statement) {
            let statement = sql::upsert(&self.schema, table, &columns, chunk.len());
            let params: Vec<Option<String>> = chunk
                .iter()
                .flat_map(|row| {
                    std::iter::once(Some(row.key.clone())).chain(
                        columns
                            .iter()
                            .map(|(name, _)| sql::encode_value(row.record.get(*name))),
                    )
                })
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p as &(dyn ToSql + Sync))
                .collect();
            written += tx.execute(&statement, &refs).await.map_err(map_pg_error)?;
        }

        tx.commit().await.map_err(map_pg_error)?;
        Ok(written)
    }
}
