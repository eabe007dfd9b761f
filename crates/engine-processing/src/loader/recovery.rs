use crate::{
    error::CommitError,
    loader::{CommitOutcome, Loader},
};
use engine_core::error::StagingError;
use std::collections::HashSet;
use tracing::{info, warn};

/// What a recovery pass did with the manifest it found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub replayed: u64,
    pub quarantined: u64,
    /// Entries whose staged copy was missing or corrupt. Those pages are
    /// fetched again by the next run since the checkpoint never passed them.
    pub discarded: u64,
    pub rows_written: u64,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.replayed == 0 && self.quarantined == 0 && self.discarded == 0
    }
}

impl Loader {
    /// Replays every staged-but-uncommitted batch of this entity in staging
    /// order.
    ///
    /// Within one original job, once an entry does not commit, later entries
    /// of that job still load but no longer move the checkpoint.
    pub async fn recover(&self) -> Result<RecoveryReport, CommitError> {
        let entity = &self.target().entity;
        let pending = self.state.list_staged(entity).await?;
        let mut report = RecoveryReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        info!(entity = %entity, pending = pending.len(), "replaying staged batches");

        let mut held_jobs: HashSet<String> = HashSet::new();
        for staged in pending {
            if self.cancel.is_cancelled() {
                return Err(CommitError::Cancelled);
            }
            let advances = staged.advances_checkpoint && !held_jobs.contains(&staged.job_id);

            match self.replay(&staged, advances).await {
                Ok(CommitOutcome::Committed(result)) => {
                    report.replayed += 1;
                    report.rows_written += result.rows_written;
                }
                Ok(CommitOutcome::Quarantined(_)) => {
                    report.quarantined += 1;
                    held_jobs.insert(staged.job_id.clone());
                }
                Err(
                    err @ (CommitError::Staging(StagingError::NotFound(_))
                    | CommitError::Corrupt { .. }),
                ) => {
                    warn!(
                        entity = %entity,
                        batch_id = %staged.batch_id,
                        location = %staged.location,
                        error = %err,
                        "staged copy unusable, dropping manifest entry"
                    );
                    self.discard(&staged).await?;
                    report.discarded += 1;
                    held_jobs.insert(staged.job_id.clone());
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            entity = %entity,
            replayed = report.replayed,
            quarantined = report.quarantined,
            discarded = report.discarded,
            rows = report.rows_written,
            "recovery pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::loader::{LoadTarget, Loader, staging_path};
    use chrono::{Duration as ChronoDuration, Utc};
    use connectors::{staging::MemoryStagingStore, warehouse::MemoryWarehouse};
    use engine_core::{
        connectors::staging::StagingStore,
        state::{StateStore, sled_store::SledStateStore},
    };
    use model::{
        core::{identifiers::EntityId, watermark::Watermark},
        records::{
            batch::{Batch, manifest_for},
            record::Record,
            staged::StagedBatch,
        },
        schema::field_map::FieldMap,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn batch(seq: u32, job: &str, records: Vec<serde_json::Value>) -> Batch {
        let records: Vec<Record> = records
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        Batch {
            id: format!("bat-{job}-{seq}"),
            entity: "fb.campaigns".into(),
            job_id: job.into(),
            seq,
            page_token: None,
            next_token: None,
            manifest: manifest_for(&records),
            records,
            schema_version: None,
            fetched_at: Utc::now(),
        }
    }

    /// Stages a batch the way a commit would, then stops as if the process
    /// died before the warehouse write.
    async fn stage_only(
        state: &SledStateStore,
        staging: &MemoryStagingStore,
        batch: &Batch,
        schema_version: u32,
        advances: bool,
        offset_secs: i64,
    ) -> StagedBatch {
        let location = staging_path(batch);
        staging
            .put(&location, &serde_json::to_vec(batch).unwrap())
            .await
            .unwrap();
        let staged = StagedBatch {
            batch_id: batch.id.clone(),
            entity: batch.entity.clone(),
            job_id: batch.job_id.clone(),
            seq: batch.seq,
            location,
            validated: false,
            schema_version,
            watermark: None,
            advances_checkpoint: advances,
            staged_at: Utc::now() + ChronoDuration::seconds(offset_secs),
        };
        state.put_staged(&staged).await.unwrap();
        staged
    }

    #[tokio::test]
    async fn replays_staged_batches_and_advances_checkpoint() {
        let state = Arc::new(SledStateStore::temporary().unwrap());
        let staging = Arc::new(MemoryStagingStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new());
        let entity = EntityId::new("fb.campaigns");

        let b0 = batch(0, "job-a", vec![json!({"id": 1, "date": "2025-06-01"})]);
        let b1 = batch(1, "job-a", vec![json!({"id": 2, "date": "2025-06-02"})]);
        let schema = state
            .append_schema(&entity, None, FieldMap::infer(&b0.records).unwrap())
            .await
            .unwrap();
        stage_only(&state, &staging, &b0, schema.version, true, 0).await;
        stage_only(&state, &staging, &b1, schema.version, true, 1).await;

        let loader = Loader::new(
            LoadTarget::new(entity.clone(), "date").with_primary_key(vec!["id".into()]),
            state.clone(),
            staging.clone(),
            warehouse.clone(),
        );
        let report = loader.recover().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.rows_written, 2);

        let cp = state.load_checkpoint(&entity).await.unwrap().unwrap();
        assert_eq!(cp.watermark, "2025-06-02".parse::<Watermark>().unwrap());
        assert!(state.list_staged(&entity).await.unwrap().is_empty());
        assert_eq!(warehouse.keys("fb__campaigns").await, vec!["1", "2"]);

        // nothing left to do on a second pass
        assert!(loader.recover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_entry_holds_checkpoint_for_rest_of_job() {
        let state = Arc::new(SledStateStore::temporary().unwrap());
        let staging = Arc::new(MemoryStagingStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new());
        let entity = EntityId::new("fb.campaigns");

        let bad = batch(0, "job-a", vec![json!({"id": 1})]);
        let good = batch(1, "job-a", vec![json!({"id": 2, "date": "2025-06-02"})]);
        let schema = state
            .append_schema(&entity, None, FieldMap::infer(&good.records).unwrap())
            .await
            .unwrap();
        stage_only(&state, &staging, &bad, schema.version, true, 0).await;
        stage_only(&state, &staging, &good, schema.version, true, 1).await;

        let loader = Loader::new(
            LoadTarget::new(entity.clone(), "date").with_primary_key(vec!["id".into()]),
            state.clone(),
            staging.clone(),
            warehouse.clone(),
        );
        let report = loader.recover().await.unwrap();
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.replayed, 1);
        assert!(state.load_checkpoint(&entity).await.unwrap().is_none());
        assert_eq!(warehouse.keys("fb__campaigns").await, vec!["2"]);
    }

    #[tokio::test]
    async fn missing_staged_copy_is_discarded() {
        let state = Arc::new(SledStateStore::temporary().unwrap());
        let staging = Arc::new(MemoryStagingStore::new());
        let entity = EntityId::new("fb.campaigns");

        let b0 = batch(0, "job-a", vec![json!({"id": 1, "date": "2025-06-01"})]);
        let staged = StagedBatch {
            batch_id: b0.id.clone(),
            entity: entity.clone(),
            job_id: b0.job_id.clone(),
            seq: 0,
            location: staging_path(&b0),
            validated: true,
            schema_version: 1,
            watermark: None,
            advances_checkpoint: true,
            staged_at: Utc::now(),
        };
        state.put_staged(&staged).await.unwrap();

        let loader = Loader::new(
            LoadTarget::new(entity.clone(), "date"),
            state.clone(),
            staging,
            Arc::new(MemoryWarehouse::new()),
        );
        let report = loader.recover().await.unwrap();
        assert_eq!(report.discarded, 1);
        assert!(state.list_staged(&entity).await.unwrap().is_empty());
    }
}
