use crate::{
    error::SyncError,
    execution::{
        context::{EntityPipeline, SyncContext},
        coordinator::{SyncCoordinator, failed_report},
        factory,
    },
};
use engine_config::settings::AdSyncConfig;
use engine_core::connectors::secrets::SecretStore;
use futures::{StreamExt, stream};
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    execution::report::SyncReport,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What the scheduler asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncRequest {
    /// Entities to run; empty means every configured entity.
    pub entities: Vec<EntityId>,
    /// Overrides the stored checkpoint as the starting watermark.
    pub since: Option<Watermark>,
}

/// Builds everything from `config` and runs the requested entities.
pub async fn run(
    config: &AdSyncConfig,
    secrets: Arc<dyn SecretStore>,
    request: SyncRequest,
    cancel: CancellationToken,
) -> Result<Vec<SyncReport>, SyncError> {
    let ctx = factory::create_context(config, secrets.as_ref()).await?;

    let ids = if request.entities.is_empty() {
        config.entity_ids()
    } else {
        request.entities
    };
    let mut pipelines = Vec::with_capacity(ids.len());
    for id in &ids {
        pipelines.push(factory::create_pipeline(config, id, secrets.clone())?);
    }

    let executor = SyncExecutor::new(ctx, pipelines, config.sync.max_concurrent_entities);
    Ok(executor.execute(request.since, &cancel).await)
}

/// Runs one job per entity, up to `max_concurrent` at a time.
pub struct SyncExecutor {
    ctx: SyncContext,
    pipelines: Vec<EntityPipeline>,
    max_concurrent: usize,
}

impl SyncExecutor {
    /// Duplicate entities are dropped so no entity ever runs two jobs at
    /// once.
    pub fn new(ctx: SyncContext, pipelines: Vec<EntityPipeline>, max_concurrent: usize) -> Self {
        let mut unique: Vec<EntityPipeline> = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            if !unique.iter().any(|p| p.entity() == pipeline.entity()) {
                unique.push(pipeline);
            }
        }
        Self {
            ctx,
            pipelines: unique,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Returns one report per entity, in the order the pipelines were given.
    pub async fn execute(
        &self,
        since: Option<Watermark>,
        cancel: &CancellationToken,
    ) -> Vec<SyncReport> {
        info!(
            entities = self.pipelines.len(),
            max_concurrent = self.max_concurrent,
            "Starting sync run"
        );

        let jobs = self.pipelines.iter().enumerate().map(|(idx, pipeline)| {
            let coordinator = SyncCoordinator::new(self.ctx.clone(), pipeline.clone());
            let since = since.clone();
            async move {
                let report = match coordinator.run(since, cancel).await {
                    Ok(report) => report,
                    Err(err) => {
                        error!(entity = %coordinator.entity(), error = %err, "sync job aborted");
                        failed_report(coordinator.entity().clone(), err)
                    }
                };
                (idx, report)
            }
        });

        let mut reports: Vec<(usize, SyncReport)> = stream::iter(jobs)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        reports.sort_by_key(|(idx, _)| *idx);

        let reports: Vec<SyncReport> = reports.into_iter().map(|(_, r)| r).collect();
        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = reports.len() - succeeded,
            "Sync run finished"
        );
        reports
    }
}
