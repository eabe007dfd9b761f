use crate::execution::{EntityPipeline, SyncContext};
use async_trait::async_trait;
use connectors::{staging::MemoryStagingStore, warehouse::MemoryWarehouse};
use engine_core::{
    connectors::source::{AdSource, Page, PageRequest},
    error::SourceError,
    retry::RetryPolicy,
    state::sled_store::SledStateStore,
};
use engine_processing::loader::LoadTarget;
use model::{
    core::{identifiers::EntityId, watermark::Watermark},
    records::record::Record,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};


/// Serves a fixed list of pages addressed by `p{index}` cursors.
pub(crate) struct PagedSource {
    pages: Vec<Vec<Record>>,
    failures: Mutex<VecDeque<SourceError>>,
    hang_at: Option<usize>,
    broken_page: Option<(usize, SourceError)>,
    requests: AtomicUsize,
    watermarks: Mutex<Vec<Option<Watermark>>>,
}

impl PagedSource {
    pub(crate) fn new(pages: Vec<Vec<serde_json::Value>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|page| {
                page.into_iter()
                    .map(|v| v.as_object().cloned().unwrap())
                    .collect()
            })
            .collect();
        Self {
            pages,
            failures: Mutex::new(VecDeque::new()),
            hang_at: None,
            broken_page: None,
            requests: AtomicUsize::new(0),
            watermarks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_with(self, errors: Vec<SourceError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    /// Never answers the request for page `index`.
    pub(crate) fn hanging_at(mut self, index: usize) -> Self {
        self.hang_at = Some(index);
        self
    }

    /// Every request for page `index` fails with `err`.
    pub(crate) fn failing_at(mut self, index: usize, err: SourceError) -> Self {
        self.broken_page = Some((index, err));
        self
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn requested_watermarks(&self) -> Vec<Option<Watermark>> {
        self.watermarks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdSource for PagedSource {
    fn describe(&self) -> String {
        "paged test source".to_string()
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.watermarks
            .lock()
            .unwrap()
            .push(request.watermark.clone());

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let index = match request.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor.trim_start_matches('p').parse().unwrap(),
        };
        if let Some((broken, err)) = &self.broken_page
            && *broken == index
        {
            return Err(err.clone());
        }
        if self.hang_at == Some(index) {
            std::future::pending::<()>().await;
        }
        let next_cursor = (index + 1 < self.pages.len()).then(|| format!("p{}", index + 1));
        Ok(Page {
            records: self.pages[index].clone(),
            next_cursor,
        })
    }
}

pub(crate) fn campaign_pages() -> Vec<Vec<serde_json::Value>> {
    use serde_json::json;
    vec![
        vec![json!({"id": 1, "date": "2025-06-01", "budget": "100"})],
        vec![json!({"id": 2, "date": "2025-06-02", "budget": "200"})],
        vec![json!({"id": 3, "date": "2025-06-03", "budget": "300"})],
    ]
}

pub(crate) fn watermark(raw: &str) -> Watermark {
    raw.parse().unwrap()
}

pub(crate) struct Harness {
    pub state: Arc<SledStateStore>,
    pub staging: Arc<MemoryStagingStore>,
    pub warehouse: Arc<MemoryWarehouse>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(SledStateStore::temporary().unwrap()),
            staging: Arc::new(MemoryStagingStore::new()),
            warehouse: Arc::new(MemoryWarehouse::new()),
        }
    }

    pub(crate) fn context(&self) -> SyncContext {
        SyncContext::new(
            self.state.clone(),
            self.staging.clone(),
            self.warehouse.clone(),
        )
        .with_retry(
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
                .with_jitter(0.0),
        )
        .with_run_timeout(Duration::from_secs(60))
    }

    pub(crate) fn pipeline(&self, entity: &str, source: Arc<PagedSource>) -> EntityPipeline {
        let target = LoadTarget::new(EntityId::new(entity), "date")
            .with_primary_key(vec!["id".to_string()]);
        EntityPipeline::new(source, target)
    }
}
