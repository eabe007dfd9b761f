#![allow(dead_code)]

use async_trait::async_trait;
use connectors::{staging::MemoryStagingStore, warehouse::MemoryWarehouse};
use engine_core::{
    connectors::source::{AdSource, Page, PageRequest},
    error::SourceError,
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    state::sled_store::SledStateStore,
};
use engine_processing::{cb::BreakerRegistry, loader::LoadTarget};
use engine_runtime::execution::{EntityPipeline, SyncContext, SyncCoordinator};
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    execution::report::SyncReport,
    records::record::Record,
};
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod engine;

pub const ENTITY: &str = "fb.campaigns";
pub const TABLE: &str = "fb__campaigns";

/// One campaign row; `budget` is passed through so tests can flip its type.
pub fn campaign(id: i64, date: &str, budget: Value) -> Value {
    json!({"id": id, "date": date, "budget": budget, "status": "ACTIVE"})
}

/// Three single-row pages for 2025-06-01..03 with string budgets.
pub fn three_pages() -> Vec<Vec<Value>> {
    vec![
        vec![campaign(1, "2025-06-01", json!("100"))],
        vec![campaign(2, "2025-06-02", json!("200"))],
        vec![campaign(3, "2025-06-03", json!("300"))],
    ]
}

pub fn watermark(raw: &str) -> Watermark {
    raw.parse().expect("valid watermark")
}

/// In-process ad source. Pages are addressed by `page-{n}` cursors; errors
/// queued with [`ScriptedSource::then_fail`] are served first.
pub struct ScriptedSource {
    pages: Vec<Vec<Record>>,
    queued: Mutex<VecDeque<SourceError>>,
    always: Option<SourceError>,
    calls: Mutex<Vec<Instant>>,
    watermarks: Mutex<Vec<Option<Watermark>>>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|page| {
                page.into_iter()
                    .map(|v| v.as_object().cloned().expect("record object"))
                    .collect()
            })
            .collect();
        Self {
            pages,
            queued: Mutex::new(VecDeque::new()),
            always: None,
            calls: Mutex::new(Vec::new()),
            watermarks: Mutex::new(Vec::new()),
        }
    }

    /// A source whose every request fails with `err`.
    pub fn always_failing(err: SourceError) -> Self {
        Self {
            always: Some(err),
            ..Self::new(Vec::new())
        }
    }

    pub fn then_fail(self, errors: Vec<SourceError>) -> Self {
        *self.queued.lock().unwrap() = errors.into();
        self
    }

    pub fn requests(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Gaps between consecutive requests.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }

    pub fn requested_watermarks(&self) -> Vec<Option<Watermark>> {
        self.watermarks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted source".to_string()
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.watermarks
            .lock()
            .unwrap()
            .push(request.watermark.clone());

        if let Some(err) = &self.always {
            return Err(err.clone());
        }
        if let Some(err) = self.queued.lock().unwrap().pop_front() {
            return Err(err);
        }

        let index = request
            .cursor
            .as_deref()
            .and_then(|c| c.strip_prefix("page-"))
            .map_or(0, |n| n.parse::<usize>().expect("numeric cursor"));
        match self.pages.get(index) {
            Some(records) => Ok(Page {
                records: records.clone(),
                next_cursor: (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1)),
            }),
            None => Ok(Page {
                records: Vec::new(),
                next_cursor: None,
            }),
        }
    }
}

/// Memory-backed collaborators shared by every job a test runs.
pub struct Harness {
    pub state: Arc<SledStateStore>,
    pub staging: Arc<MemoryStagingStore>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub breakers: Arc<BreakerRegistry>,
    pub retry: RetryPolicy,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SledStateStore::temporary().expect("temporary state store")),
            staging: Arc::new(MemoryStagingStore::new()),
            warehouse: Arc::new(MemoryWarehouse::new()),
            breakers: Arc::new(BreakerRegistry::new(3, Duration::from_secs(300))),
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
                .with_jitter(0.0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breakers(mut self, breakers: BreakerRegistry) -> Self {
        self.breakers = Arc::new(breakers);
        self
    }

    pub fn context(&self) -> SyncContext {
        SyncContext::new(
            self.state.clone(),
            self.staging.clone(),
            self.warehouse.clone(),
        )
        .with_breakers(self.breakers.clone())
        .with_retry(self.retry.clone())
        .with_run_timeout(Duration::from_secs(60))
    }

    pub fn pipeline(&self, source: Arc<ScriptedSource>) -> EntityPipeline {
        let target = LoadTarget::new(EntityId::new(ENTITY), "date")
            .with_primary_key(vec!["id".to_string()]);
        EntityPipeline::new(source, target)
    }

    pub fn limited_pipeline(&self, source: Arc<ScriptedSource>, limiter: RateLimiter) -> EntityPipeline {
        self.pipeline(source).with_limiter(Arc::new(limiter))
    }

    /// Runs one job for [`ENTITY`] to completion.
    pub async fn run(&self, source: Arc<ScriptedSource>, since: Option<Watermark>) -> SyncReport {
        self.run_pipeline(self.pipeline(source), since).await
    }

    pub async fn run_pipeline(&self, pipeline: EntityPipeline, since: Option<Watermark>) -> SyncReport {
        SyncCoordinator::new(self.context(), pipeline)
            .run(since, &CancellationToken::new())
            .await
            .expect("sync job runs")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
