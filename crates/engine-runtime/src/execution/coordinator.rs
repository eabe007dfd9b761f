use crate::{
    error::SyncError,
    execution::context::{EntityPipeline, SyncContext},
};
use chrono::Utc;
use engine_core::{connectors::source::PageRequest, error::StateError, metrics::Metrics};
use engine_processing::{
    drift::{DriftDetector, DriftOutcome},
    error::{CommitError, DriftError, ExtractError},
    extractor::Extractor,
    loader::{CommitOutcome, Loader},
};
use model::{
    core::{
        identifiers::{EntityId, new_job_id},
        watermark::Watermark,
    },
    events::sync::SyncEvent,
    execution::{
        quarantine::QuarantineReason,
        report::SyncReport,
        sync_job::{SyncJob, SyncStatus},
    },
    records::batch::Batch,
    schema::drift::FieldChange,
};
use std::{fmt::Display, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const TIMEOUT_CAUSE: &str = "timeout";
pub const CANCELLED_CAUSE: &str = "cancelled";

/// Why a job stopped before the source ran out of pages.
enum Halt {
    Cancelled,
    Failed(String),
}

impl Halt {
    fn failed(err: impl Display) -> Self {
        Halt::Failed(err.to_string())
    }

    fn from_commit(err: CommitError) -> Self {
        if err.is_cancelled() {
            Halt::Cancelled
        } else {
            Halt::failed(err)
        }
    }
}

struct RunTally {
    committed: u64,
    quarantined: u64,
    failed: u64,
    recovered: u64,
    /// Cleared by the first batch of this run that does not commit.
    gate_open: bool,
    first_error: Option<String>,
}

impl RunTally {
    fn new() -> Self {
        Self {
            committed: 0,
            quarantined: 0,
            failed: 0,
            recovered: 0,
            gate_open: true,
            first_error: None,
        }
    }

    fn record_failure(&mut self, err: impl Display) {
        self.gate_open = false;
        self.failed += 1;
        self.first_error.get_or_insert_with(|| err.to_string());
    }

    fn record_quarantine(&mut self) {
        self.gate_open = false;
        self.quarantined += 1;
    }

    fn is_clean(&self) -> bool {
        self.quarantined == 0 && self.failed == 0
    }

    fn failure_cause(&self) -> String {
        let mut cause = format!(
            "{} batch(es) quarantined, {} failed",
            self.quarantined, self.failed
        );
        if let Some(first) = &self.first_error {
            cause.push_str(": ");
            cause.push_str(first);
        }
        cause
    }
}

/// Runs sync jobs for one entity: recovery pass, watermark read, then
/// fetch, classify and commit page by page until the source is drained.
pub struct SyncCoordinator {
    ctx: SyncContext,
    pipeline: EntityPipeline,
}

impl SyncCoordinator {
    pub fn new(ctx: SyncContext, pipeline: EntityPipeline) -> Self {
        Self { ctx, pipeline }
    }

    pub fn entity(&self) -> &EntityId {
        self.pipeline.entity()
    }

    /// Runs one job to a terminal state.
    ///
    /// `since` overrides the checkpoint as the starting watermark. The
    /// checkpoint itself still only moves forward.
    ///
    /// Cancelling `cancel`, or running past the configured timeout, stops the
    /// job cooperatively; it then ends `failed` and whatever was staged stays
    /// in the manifest for the next recovery pass.
    pub async fn run(
        &self,
        since: Option<Watermark>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let entity = self.entity().clone();
        let metrics = Metrics::new();
        let job_cancel = cancel.child_token();
        let mut job = SyncJob::new(entity.clone());
        let job_id = job.id.clone();
        let mut tally = RunTally::new();
        let mut timed_out = false;

        let deadline = tokio::time::Instant::now() + self.ctx.run_timeout;
        let halt = {
            let drive = self.drive(&mut job, &mut tally, since.clone(), &metrics, &job_cancel);
            tokio::pin!(drive);

            let finished = tokio::select! {
                halt = &mut drive => Some(halt),
                _ = tokio::time::sleep_until(deadline) => None,
            };
            match finished {
                Some(halt) => halt,
                None => {
                    warn!(
                        entity = %entity,
                        job_id = %job_id,
                        timeout_secs = self.ctx.run_timeout.as_secs(),
                        "sync job timed out, cancelling"
                    );
                    timed_out = true;
                    job_cancel.cancel();
                    drive.await
                }
            }
        };

        if job.status == SyncStatus::Pending {
            // stopped during the recovery pass
            let start = self.starting_watermark(since).await?;
            self.start_job(&mut job, start).await?;
        }
        if let Some(checkpoint) = self.ctx.state.load_checkpoint(&entity).await?
            && job.watermark_end.as_ref() != Some(&checkpoint.watermark)
        {
            job.advance(checkpoint.watermark);
        }

        let (status, cause) = match halt {
            Err(Halt::Cancelled) if timed_out => (SyncStatus::Failed, Some(TIMEOUT_CAUSE.to_string())),
            Err(Halt::Cancelled) => (SyncStatus::Failed, Some(CANCELLED_CAUSE.to_string())),
            Err(Halt::Failed(cause)) if tally.committed > 0 => {
                (SyncStatus::PartiallyFailed, Some(cause))
            }
            Err(Halt::Failed(cause)) => (SyncStatus::Failed, Some(cause)),
            Ok(()) if tally.is_clean() => (SyncStatus::Succeeded, None),
            Ok(()) if tally.committed > 0 => {
                (SyncStatus::PartiallyFailed, Some(tally.failure_cause()))
            }
            Ok(()) => (SyncStatus::Failed, Some(tally.failure_cause())),
        };

        job.finish(status, cause)?;
        self.ctx
            .state
            .append_event(&SyncEvent::JobFinished {
                entity: entity.clone(),
                job_id: job.id.clone(),
                status: job.status,
                cause: job.cause.clone(),
                at: Utc::now(),
            })
            .await?;

        let snapshot = metrics.snapshot();
        let report = SyncReport {
            job_id: job.id,
            entity: job.entity,
            status: job.status,
            rows_written: snapshot.rows_written,
            quarantine_count: tally.quarantined,
            batches_committed: tally.committed,
            batches_recovered: tally.recovered,
            watermark_start: job.watermark_start,
            watermark_end: job.watermark_end,
            requests: snapshot.requests,
            retries: snapshot.retries,
            duration_ms: started.elapsed().as_millis() as u64,
            cause: job.cause,
        };

        info!(
            entity = %report.entity,
            job_id = %report.job_id,
            status = %report.status,
            rows = report.rows_written,
            quarantined = report.quarantine_count,
            watermark = ?report.watermark_end,
            duration_ms = report.duration_ms,
            cause = ?report.cause,
            "sync job finished"
        );
        Ok(report)
    }

    async fn drive(
        &self,
        job: &mut SyncJob,
        tally: &mut RunTally,
        since: Option<Watermark>,
        metrics: &Metrics,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        let entity = self.entity();
        let loader = Loader::new(
            self.pipeline.target.clone(),
            self.ctx.state.clone(),
            self.ctx.staging.clone(),
            self.ctx.warehouse.clone(),
        )
        .with_retry(self.ctx.retry.clone())
        .with_metrics(metrics.clone())
        .with_cancel(cancel.clone());

        let recovered = loader.recover().await.map_err(Halt::from_commit)?;
        tally.recovered = recovered.replayed;
        tally.quarantined += recovered.quarantined;

        let start = self
            .starting_watermark(since)
            .await
            .map_err(Halt::failed)?;
        self.start_job(job, start.clone())
            .await
            .map_err(Halt::failed)?;

        let request = PageRequest {
            watermark: start,
            until: Utc::now().date_naive(),
            cursor: None,
        };
        let mut extractor = Extractor::new(
            entity.clone(),
            job.id.clone(),
            self.pipeline.source.clone(),
            request,
        )
        .with_limiter(self.pipeline.limiter.clone())
        .with_retry(self.ctx.retry.clone())
        .with_breaker(self.ctx.breakers.clone())
        .with_metrics(metrics.clone())
        .with_cancel(cancel.clone());
        let detector = DriftDetector::new(self.ctx.state.clone());

        loop {
            let mut batch = match extractor.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => return Ok(()),
                Err(ExtractError::Cancelled) => return Err(Halt::Cancelled),
                Err(err) => {
                    error!(entity = %entity, job_id = %job.id, error = %err, "extraction failed");
                    return Err(Halt::failed(err));
                }
            };
            if batch.is_empty() {
                debug!(entity = %entity, batch_id = %batch.id, "empty page");
                continue;
            }
            self.process(&loader, &detector, job, tally, &mut batch)
                .await?;
        }
    }

    async fn process(
        &self,
        loader: &Loader,
        detector: &DriftDetector,
        job: &mut SyncJob,
        tally: &mut RunTally,
        batch: &mut Batch,
    ) -> Result<(), Halt> {
        let outcome = match detector.evaluate(batch).await {
            Ok(outcome) => outcome,
            Err(DriftError::Inference(err)) => {
                let reason = QuarantineReason::Validation(err.to_string());
                park(loader, tally, batch, reason, Vec::new()).await;
                return Ok(());
            }
            Err(err @ DriftError::State(_)) => return Err(Halt::failed(err)),
        };

        let (report, schema) = match outcome {
            DriftOutcome::Accepted { report, schema } => (report, schema),
            DriftOutcome::Breaking { report, .. } => {
                park(loader, tally, batch, QuarantineReason::BreakingDrift, report.changes).await;
                return Ok(());
            }
        };

        match loader
            .commit(batch, &schema, report.class, tally.gate_open)
            .await
        {
            Ok(CommitOutcome::Committed(result)) => {
                tally.committed += 1;
                if let Some(watermark) = result.new_watermark {
                    job.advance(watermark);
                }
                Ok(())
            }
            Ok(CommitOutcome::Quarantined(_)) => {
                tally.record_quarantine();
                Ok(())
            }
            Err(err) if err.is_cancelled() => Err(Halt::Cancelled),
            Err(err) => {
                error!(
                    entity = %batch.entity,
                    batch_id = %batch.id,
                    error = %err,
                    "batch commit failed"
                );
                tally.record_failure(err);
                Ok(())
            }
        }
    }

    async fn starting_watermark(
        &self,
        since: Option<Watermark>,
    ) -> Result<Option<Watermark>, StateError> {
        if since.is_some() {
            return Ok(since);
        }
        let checkpoint = self.ctx.state.load_checkpoint(self.entity()).await?;
        Ok(checkpoint
            .map(|cp| cp.watermark)
            .or_else(|| self.pipeline.start_watermark.clone()))
    }

    async fn start_job(
        &self,
        job: &mut SyncJob,
        watermark: Option<Watermark>,
    ) -> Result<(), SyncError> {
        job.start(watermark)?;
        self.ctx
            .state
            .append_event(&SyncEvent::JobStarted {
                entity: job.entity.clone(),
                job_id: job.id.clone(),
                watermark: job.watermark_start.clone(),
                at: Utc::now(),
            })
            .await?;
        info!(
            entity = %job.entity,
            job_id = %job.id,
            watermark = ?job.watermark_start,
            "sync job started"
        );
        Ok(())
    }
}

async fn park(
    loader: &Loader,
    tally: &mut RunTally,
    batch: &Batch,
    reason: QuarantineReason,
    diff: Vec<FieldChange>,
) {
    match loader.quarantine().park(batch, reason, diff, None).await {
        Ok(_) => tally.record_quarantine(),
        Err(err) => {
            error!(
                entity = %batch.entity,
                batch_id = %batch.id,
                error = %err,
                "failed to quarantine batch"
            );
            tally.record_failure(err);
        }
    }
}

/// Report for a job that could not be run at all.
pub fn failed_report(entity: EntityId, cause: impl Display) -> SyncReport {
    SyncReport {
        job_id: new_job_id(),
        entity,
        status: SyncStatus::Failed,
        rows_written: 0,
        quarantine_count: 0,
        batches_committed: 0,
        batches_recovered: 0,
        watermark_start: None,
        watermark_end: None,
        requests: 0,
        retries: 0,
        duration_ms: 0,
        cause: Some(cause.to_string()),
    }
}
