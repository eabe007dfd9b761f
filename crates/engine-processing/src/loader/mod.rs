use crate::{
    error::CommitError,
    retry::{classify_staging_error, classify_warehouse_error},
};
use chrono::Utc;
use engine_core::{
    connectors::{
        staging::StagingStore,
        warehouse::{KeyedRow, Warehouse},
    },
    error::{StagingError, WarehouseError},
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
    state::{CheckpointAdvance, StateStore},
};
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    events::sync::SyncEvent,
    execution::{
        errors::ModelError,
        quarantine::{QuarantineReason, QuarantineRecord},
    },
    records::{
        batch::Batch,
        record::{Record, record_key},
        staged::StagedBatch,
    },
    schema::{drift::DriftClass, version::SchemaVersion},
};
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod quarantine;
pub mod recovery;

pub use quarantine::Quarantine;
pub use recovery::RecoveryReport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitResult {
    pub rows_written: u64,
    /// The checkpoint watermark after this commit, if the commit moved it.
    pub new_watermark: Option<Watermark>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitResult),
    /// The batch failed validation after staging and was parked.
    Quarantined(QuarantineRecord),
}

/// Where and how one entity's batches are loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTarget {
    pub entity: EntityId,
    pub cursor_field: String,
    /// Empty means rows are keyed by content hash.
    pub primary_key: Vec<String>,
}

impl LoadTarget {
    pub fn new(entity: EntityId, cursor_field: impl Into<String>) -> Self {
        Self {
            entity,
            cursor_field: cursor_field.into(),
            primary_key: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn table(&self) -> String {
        self.entity.table_name()
    }
}

/// Staging location of a batch: `{entity}/{job}/{seq}-{batch}.json`.
pub fn staging_path(batch: &Batch) -> String {
    format!(
        "{}/{}/{:06}-{}.json",
        batch.entity, batch.job_id, batch.seq, batch.id
    )
}

/// Stages, validates and upserts batches for one entity, then advances its
/// checkpoint.
///
/// Every warehouse change is preceded by a staged copy of the batch and a
/// manifest entry in the state store, so a crash at any point can be
/// recovered by replaying the manifest.
pub struct Loader {
    target: LoadTarget,
    state: Arc<dyn StateStore>,
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn Warehouse>,
    quarantine: Quarantine,
    retry: RetryPolicy,
    metrics: Metrics,
    cancel: CancellationToken,
}

impl Loader {
    pub fn new(
        target: LoadTarget,
        state: Arc<dyn StateStore>,
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let metrics = Metrics::new();
        Self {
            quarantine: Quarantine::new(state.clone(), staging.clone(), metrics.clone()),
            target,
            state,
            staging,
            warehouse,
            retry: RetryPolicy::default(),
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.quarantine = self.quarantine.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn target(&self) -> &LoadTarget {
        &self.target
    }

    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    /// Commits one accepted batch.
    ///
    /// `advances_checkpoint` is decided by the caller and recorded with the
    /// staged entry; a replay of that entry honours the same decision.
    pub async fn commit(
        &self,
        batch: &Batch,
        schema: &SchemaVersion,
        drift: DriftClass,
        advances_checkpoint: bool,
    ) -> Result<CommitOutcome, CommitError> {
        if batch.is_empty() {
            debug!(entity = %batch.entity, batch_id = %batch.id, "empty batch, nothing to load");
            return Ok(CommitOutcome::Committed(CommitResult::default()));
        }

        let location = staging_path(batch);
        let bytes = serde_json::to_vec(batch).map_err(StagingError::from)?;
        self.put_object(&location, &bytes).await?;

        let mut staged = StagedBatch {
            batch_id: batch.id.clone(),
            entity: batch.entity.clone(),
            job_id: batch.job_id.clone(),
            seq: batch.seq,
            location,
            validated: false,
            schema_version: schema.version,
            watermark: None,
            advances_checkpoint,
            staged_at: Utc::now(),
        };
        self.state.put_staged(&staged).await?;
        self.state
            .append_event(&SyncEvent::BatchStaged {
                entity: batch.entity.clone(),
                job_id: batch.job_id.clone(),
                batch_id: batch.id.clone(),
                seq: batch.seq,
                drift,
                at: Utc::now(),
            })
            .await?;
        debug!(
            entity = %batch.entity,
            batch_id = %batch.id,
            location = %staged.location,
            rows = batch.records.len(),
            "batch staged"
        );

        self.validate_and_load(&mut staged, batch, schema, advances_checkpoint)
            .await
    }

    /// Re-loads a staged batch from its staged copy.
    pub async fn replay(
        &self,
        staged: &StagedBatch,
        advances_checkpoint: bool,
    ) -> Result<CommitOutcome, CommitError> {
        let bytes = self.staging.get(&staged.location).await?;
        let batch: Batch = serde_json::from_slice(&bytes).map_err(|e| CommitError::Corrupt {
            batch_id: staged.batch_id.clone(),
            reason: e.to_string(),
        })?;
        if batch.id != staged.batch_id {
            return Err(CommitError::Corrupt {
                batch_id: staged.batch_id.clone(),
                reason: format!("staged copy belongs to batch '{}'", batch.id),
            });
        }
        batch.verify().map_err(|e| CommitError::Corrupt {
            batch_id: staged.batch_id.clone(),
            reason: e.to_string(),
        })?;

        let schema = self
            .state
            .schema_version(&staged.entity, staged.schema_version)
            .await?
            .ok_or_else(|| CommitError::MissingSchema {
                entity: staged.entity.clone(),
                version: staged.schema_version,
            })?;

        let mut staged = staged.clone();
        self.validate_and_load(&mut staged, &batch, &schema, advances_checkpoint)
            .await
    }

    /// Drops a manifest entry without loading it.
    pub async fn discard(&self, staged: &StagedBatch) -> Result<(), CommitError> {
        self.state
            .delete_staged(&staged.entity, &staged.batch_id)
            .await?;
        Ok(())
    }

    async fn validate_and_load(
        &self,
        staged: &mut StagedBatch,
        batch: &Batch,
        schema: &SchemaVersion,
        advances_checkpoint: bool,
    ) -> Result<CommitOutcome, CommitError> {
        let (rows, watermark) = match self.validate(batch) {
            Ok(validated) => validated,
            Err(err) => {
                let record = self
                    .quarantine
                    .park(
                        batch,
                        QuarantineReason::Validation(err.to_string()),
                        Vec::new(),
                        Some(staged.location.clone()),
                    )
                    .await?;
                self.discard(staged).await?;
                return Ok(CommitOutcome::Quarantined(record));
            }
        };

        if !staged.validated || staged.watermark != watermark {
            staged.validated = true;
            staged.watermark = watermark;
            self.state.put_staged(staged).await?;
        }

        let result = self
            .load(staged, &rows, schema, advances_checkpoint)
            .await?;
        Ok(CommitOutcome::Committed(result))
    }

    fn validate(&self, batch: &Batch) -> Result<(Vec<KeyedRow>, Option<Watermark>), ModelError> {
        let watermark = batch.watermark(&self.target.cursor_field)?;
        let rows = keyed_rows(&batch.records, &self.target.primary_key)?;
        Ok((rows, watermark))
    }

    async fn load(
        &self,
        staged: &StagedBatch,
        rows: &[KeyedRow],
        schema: &SchemaVersion,
        advances_checkpoint: bool,
    ) -> Result<CommitResult, CommitError> {
        let table = self.target.table();
        let warehouse = &self.warehouse;
        let table_ref = table.as_str();

        self.with_warehouse_retry("evolve", move |_| warehouse.evolve(table_ref, schema))
            .await?;
        let rows_written = self
            .with_warehouse_retry("upsert", move |_| warehouse.upsert(table_ref, rows))
            .await?;

        self.metrics.increment_rows(rows_written);
        self.metrics.increment_committed(1);
        self.state
            .append_event(&SyncEvent::BatchCommitted {
                entity: staged.entity.clone(),
                job_id: staged.job_id.clone(),
                batch_id: staged.batch_id.clone(),
                rows: rows_written,
                at: Utc::now(),
            })
            .await?;
        info!(
            entity = %staged.entity,
            batch_id = %staged.batch_id,
            table = %table,
            rows = rows_written,
            schema_version = schema.version,
            "batch committed"
        );

        self.discard(staged).await?;

        let new_watermark = match (&staged.watermark, advances_checkpoint) {
            (Some(proposed), true) => self.advance_checkpoint(staged, proposed).await?,
            (Some(_), false) => {
                debug!(
                    entity = %staged.entity,
                    batch_id = %staged.batch_id,
                    "earlier batch did not commit, checkpoint held"
                );
                None
            }
            (None, _) => None,
        };

        Ok(CommitResult {
            rows_written,
            new_watermark,
        })
    }

    async fn advance_checkpoint(
        &self,
        staged: &StagedBatch,
        proposed: &Watermark,
    ) -> Result<Option<Watermark>, CommitError> {
        let entity = &staged.entity;
        let current = self.state.load_checkpoint(entity).await?;
        let advance = self
            .state
            .advance_checkpoint(entity, current.as_ref().map(|c| &c.watermark), proposed)
            .await?;

        match advance {
            CheckpointAdvance::Advanced(checkpoint) => {
                self.state
                    .append_event(&SyncEvent::CheckpointAdvanced {
                        entity: entity.clone(),
                        job_id: staged.job_id.clone(),
                        watermark: checkpoint.watermark.clone(),
                        at: checkpoint.committed_at,
                    })
                    .await?;
                info!(
                    entity = %entity,
                    batch_id = %staged.batch_id,
                    watermark = ?checkpoint.watermark,
                    "checkpoint advanced"
                );
                Ok(Some(checkpoint.watermark))
            }
            CheckpointAdvance::Behind(checkpoint) => {
                debug!(
                    entity = %entity,
                    stored = ?checkpoint.watermark,
                    proposed = ?proposed,
                    "checkpoint already at or past batch watermark"
                );
                Ok(None)
            }
        }
    }

    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<(), CommitError> {
        let staging = &self.staging;
        let result = self
            .retry
            .run(
                move |_| staging.put(path, bytes),
                classify_staging_error,
                |attempt, delay, err| {
                    self.metrics.increment_retries(1);
                    warn!(
                        entity = %self.target.entity,
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying staging write"
                    );
                },
                &self.cancel,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(err)) | Err(RetryError::AttemptsExceeded { error: err, .. }) => {
                Err(CommitError::Staging(err))
            }
            Err(RetryError::Cancelled) => Err(CommitError::Cancelled),
        }
    }

    async fn with_warehouse_retry<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, CommitError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WarehouseError>>,
    {
        let result = self
            .retry
            .run(
                f,
                classify_warehouse_error,
                |attempt, delay, err| {
                    self.metrics.increment_retries(1);
                    warn!(
                        entity = %self.target.entity,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying load"
                    );
                },
                &self.cancel,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::Fatal(err)) | Err(RetryError::AttemptsExceeded { error: err, .. }) => {
                Err(CommitError::Load(err))
            }
            Err(RetryError::Cancelled) => Err(CommitError::Cancelled),
        }
    }
}

/// Pairs records with their upsert keys. A key repeated within the batch
/// keeps its first position and its last value.
pub fn keyed_rows(records: &[Record], primary_key: &[String]) -> Result<Vec<KeyedRow>, ModelError> {
    let mut rows: Vec<KeyedRow> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let key = record_key(record, primary_key, index)?;
        match positions.get(&key).copied() {
            Some(pos) => rows[pos].record = record.clone(),
            None => {
                positions.insert(key.clone(), rows.len());
                rows.push(KeyedRow {
                    key,
                    record: record.clone(),
                });
            }
        }
    }
    Ok(rows)
}
