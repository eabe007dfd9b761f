use engine_core::{
    connectors::{source::AdSource, staging::StagingStore, warehouse::Warehouse},
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    state::StateStore,
};
use engine_processing::{cb::BreakerRegistry, loader::LoadTarget};
use model::core::{identifiers::EntityId, watermark::Watermark};
use std::{sync::Arc, time::Duration};

/// Collaborators shared by every job in one process.
#[derive(Clone)]
pub struct SyncContext {
    pub state: Arc<dyn StateStore>,
    pub staging: Arc<dyn StagingStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub breakers: Arc<BreakerRegistry>,
    pub retry: RetryPolicy,
    pub run_timeout: Duration,
}

impl SyncContext {
    pub fn new(
        state: Arc<dyn StateStore>,
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            state,
            staging,
            warehouse,
            breakers: Arc::new(BreakerRegistry::default()),
            retry: RetryPolicy::default(),
            run_timeout: Duration::from_secs(900),
        }
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }
}

/// Everything specific to one entity's sync.
#[derive(Clone)]
pub struct EntityPipeline {
    pub source: Arc<dyn AdSource>,
    pub limiter: Arc<RateLimiter>,
    pub target: LoadTarget,
    /// Used when the entity has no checkpoint yet.
    pub start_watermark: Option<Watermark>,
}

impl EntityPipeline {
    pub fn new(source: Arc<dyn AdSource>, target: LoadTarget) -> Self {
        Self {
            source,
            limiter: Arc::new(RateLimiter::unlimited()),
            target,
            start_watermark: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_start_watermark(mut self, watermark: Option<Watermark>) -> Self {
        self.start_watermark = watermark;
        self
    }

    pub fn entity(&self) -> &EntityId {
        &self.target.entity
    }
}
