use crate::error::CommitError;
use chrono::Utc;
use engine_core::{connectors::staging::StagingStore, metrics::Metrics, state::StateStore};
use model::{
    core::identifiers::EntityId,
    events::sync::SyncEvent,
    execution::quarantine::{QuarantineReason, QuarantineRecord},
    records::batch::Batch,
    schema::drift::FieldChange,
};
use std::sync::Arc;
use tracing::{info, warn};

pub fn quarantine_path(batch: &Batch) -> String {
    format!("quarantine/{}/{}.json", batch.entity, batch.id)
}

/// Holds batches aside from the load path until an operator resolves them.
#[derive(Clone)]
pub struct Quarantine {
    state: Arc<dyn StateStore>,
    staging: Arc<dyn StagingStore>,
    metrics: Metrics,
}

impl Quarantine {
    pub fn new(state: Arc<dyn StateStore>, staging: Arc<dyn StagingStore>, metrics: Metrics) -> Self {
        Self {
            state,
            staging,
            metrics,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Records a quarantined batch.
    ///
    /// Without an existing staged copy the raw batch is written under
    /// `quarantine/`. Failing to write that copy does not stop the record
    /// from being kept.
    pub async fn park(
        &self,
        batch: &Batch,
        reason: QuarantineReason,
        diff: Vec<FieldChange>,
        location: Option<String>,
    ) -> Result<QuarantineRecord, CommitError> {
        let location = match location {
            Some(location) => Some(location),
            None => self.stash(batch).await,
        };

        let record = QuarantineRecord {
            batch_id: batch.id.clone(),
            entity: batch.entity.clone(),
            job_id: batch.job_id.clone(),
            seq: batch.seq,
            reason,
            diff,
            location,
            row_count: batch.records.len(),
            quarantined_at: Utc::now(),
            resolved_at: None,
        };
        self.state.put_quarantine(&record).await?;
        self.state
            .append_event(&SyncEvent::BatchQuarantined {
                entity: record.entity.clone(),
                job_id: record.job_id.clone(),
                batch_id: record.batch_id.clone(),
                reason: record.reason.to_string(),
                at: record.quarantined_at,
            })
            .await?;
        self.metrics.increment_quarantined(1);

        warn!(
            entity = %record.entity,
            batch_id = %record.batch_id,
            seq = record.seq,
            reason = %record.reason,
            changes = record.diff.len(),
            location = ?record.location,
            "batch quarantined"
        );
        Ok(record)
    }

    pub async fn list(&self, entity: Option<&EntityId>) -> Result<Vec<QuarantineRecord>, CommitError> {
        Ok(self.state.list_quarantine(entity).await?)
    }

    pub async fn resolve(&self, batch_id: &str) -> Result<QuarantineRecord, CommitError> {
        let record = self.state.resolve_quarantine(batch_id).await?;
        info!(entity = %record.entity, batch_id, "quarantine resolved");
        Ok(record)
    }

    async fn stash(&self, batch: &Batch) -> Option<String> {
        let path = quarantine_path(batch);
        let bytes = match serde_json::to_vec(batch) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(batch_id = %batch.id, error = %err, "failed to encode quarantined batch");
                return None;
            }
        };
        match self.staging.put(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(
                    batch_id = %batch.id,
                    path = %path,
                    error = %err,
                    "failed to park quarantined batch"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectors::staging::MemoryStagingStore;
    use engine_core::state::sled_store::SledStateStore;
    use model::{
        core::field_type::FieldType,
        records::{batch::manifest_for, record::Record},
        schema::drift::ChangeKind,
    };
    use serde_json::json;

    fn batch() -> Batch {
        let records: Vec<Record> = vec![json!({"budget": 5}).as_object().cloned().unwrap()];
        Batch {
            id: "bat-2".into(),
            entity: "fb.campaigns".into(),
            job_id: "job-1".into(),
            seq: 1,
            page_token: Some("c1".into()),
            next_token: Some("c2".into()),
            manifest: manifest_for(&records),
            records,
            schema_version: Some(1),
            fetched_at: Utc::now(),
        }
    }

    fn diff() -> Vec<FieldChange> {
        vec![FieldChange {
            field: "budget".into(),
            kind: ChangeKind::Breaking {
                registered: FieldType::VarChar,
                incoming: FieldType::Integer,
            },
        }]
    }

    #[tokio::test]
    async fn parks_raw_batch_and_records_diff() {
        let state = Arc::new(SledStateStore::temporary().unwrap());
        let staging = Arc::new(MemoryStagingStore::new());
        let metrics = Metrics::new();
        let q = Quarantine::new(state.clone(), staging.clone(), metrics.clone());

        let record = q
            .park(&batch(), QuarantineReason::BreakingDrift, diff(), None)
            .await
            .unwrap();
        assert_eq!(record.location.as_deref(), Some("quarantine/fb.campaigns/bat-2.json"));
        assert_eq!(staging.paths().await, vec!["quarantine/fb.campaigns/bat-2.json"]);
        assert_eq!(metrics.snapshot().batches_quarantined, 1);

        let listed = q.list(Some(&"fb.campaigns".into())).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].diff, diff());

        let resolved = q.resolve("bat-2").await.unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(q.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keeps_record_when_staging_is_down() {
        let state = Arc::new(SledStateStore::temporary().unwrap());
        let staging = Arc::new(MemoryStagingStore::new());
        staging.set_offline(true);
        let q = Quarantine::new(state.clone(), staging, Metrics::new());

        let record = q
            .park(&batch(), QuarantineReason::BreakingDrift, diff(), None)
            .await
            .unwrap();
        assert_eq!(record.location, None);
        assert_eq!(state.list_quarantine(None).await.unwrap().len(), 1);
    }
}
