use crate::{
    cb::{BreakerRegistry, CircuitBreakerState},
    error::ExtractError,
    retry::classify_source_error,
};
use chrono::Utc;
use engine_core::{
    connectors::source::{AdSource, Page, PageRequest},
    error::SourceError,
    metrics::Metrics,
    rate_limit::RateLimiter,
    retry::{RetryError, RetryPolicy},
};
use futures::Stream;
use model::{
    core::identifiers::EntityId,
    records::batch::{Batch, manifest_for},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pulls pages for one entity, one at a time, under the rate limiter, the
/// retry policy and the entity's circuit breaker.
///
/// The page cursor only moves once a page has been fetched completely and
/// returned to the caller, so a failure or cancellation mid-page leaves the
/// extractor positioned on that same page.
pub struct Extractor {
    entity: EntityId,
    job_id: String,
    source: Arc<dyn AdSource>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    breaker: Arc<BreakerRegistry>,
    metrics: Metrics,
    cancel: CancellationToken,
    request: PageRequest,
    seq: u32,
    finished: bool,
}

impl Extractor {
    pub fn new(
        entity: EntityId,
        job_id: impl Into<String>,
        source: Arc<dyn AdSource>,
        request: PageRequest,
    ) -> Self {
        Self {
            entity,
            job_id: job_id.into(),
            source,
            limiter: Arc::new(RateLimiter::unlimited()),
            retry: RetryPolicy::default(),
            breaker: Arc::new(BreakerRegistry::default()),
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
            request,
            seq: 0,
            finished: false,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<BreakerRegistry>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Cursor of the page the next call will request.
    pub fn cursor(&self) -> Option<&str> {
        self.request.cursor.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetches the next page as a batch, or `None` once the source has no
    /// more pages.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, ExtractError> {
        if self.finished {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let page = self.fetch_with_retry().await?;

        if page.next_cursor.is_some() && page.next_cursor == self.request.cursor {
            return Err(ExtractError::Fatal {
                entity: self.entity.clone(),
                source: SourceError::Decode(format!(
                    "pagination cursor {:?} did not advance",
                    self.request.cursor
                )),
            });
        }

        let seq = self.seq;
        let page_token = self.request.cursor.clone();
        let batch = Batch {
            id: self.batch_id(seq, page_token.as_deref()),
            entity: self.entity.clone(),
            job_id: self.job_id.clone(),
            seq,
            page_token,
            next_token: page.next_cursor.clone(),
            manifest: manifest_for(&page.records),
            records: page.records,
            schema_version: None,
            fetched_at: Utc::now(),
        };

        debug!(
            entity = %self.entity,
            batch_id = %batch.id,
            seq,
            rows = batch.records.len(),
            last = page.next_cursor.is_none(),
            "page fetched"
        );

        self.finished = page.next_cursor.is_none();
        self.request.cursor = page.next_cursor;
        self.seq += 1;
        Ok(Some(batch))
    }

    /// The remaining pages as a stream. Stops after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch, ExtractError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut extractor = state?;
            match extractor.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), Some(extractor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn batch_id(&self, seq: u32, page_token: Option<&str>) -> String {
        let mut h = blake3::Hasher::new();
        h.update(self.entity.as_str().as_bytes());
        h.update(self.job_id.as_bytes());
        h.update(&seq.to_le_bytes());
        h.update(page_token.unwrap_or_default().as_bytes());
        format!("bat-{}", &h.finalize().to_hex()[..24])
    }

    async fn fetch_with_retry(&self) -> Result<Page, ExtractError> {
        if let Err(retry_in) = self.breaker.check(&self.entity).await {
            return Err(ExtractError::SourceUnavailable {
                entity: self.entity.clone(),
                retry_in,
            });
        }

        let this = self;
        let request = &self.request;
        let result = self
            .retry
            .run(
                move |attempt| this.fetch_attempt(request, attempt),
                classify_source_error,
                |attempt, delay, err| {
                    self.metrics.increment_retries(1);
                    warn!(
                        entity = %self.entity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        cursor = ?request.cursor,
                        error = %err,
                        "retrying fetch"
                    );
                },
                &self.cancel,
            )
            .await;

        match result {
            Ok(page) => {
                self.breaker.record_success(&self.entity).await;
                Ok(page)
            }
            Err(RetryError::Fatal(source)) => Err(ExtractError::Fatal {
                entity: self.entity.clone(),
                source,
            }),
            Err(RetryError::AttemptsExceeded { error, attempts }) => {
                match self.breaker.record_failure(&self.entity).await {
                    CircuitBreakerState::Open { remaining } => {
                        warn!(entity = %self.entity, attempts, error = %error, "retries exhausted");
                        Err(ExtractError::SourceUnavailable {
                            entity: self.entity.clone(),
                            retry_in: remaining,
                        })
                    }
                    CircuitBreakerState::Closed { .. } => Err(ExtractError::RetriesExhausted {
                        entity: self.entity.clone(),
                        attempts,
                        source: error,
                    }),
                }
            }
            Err(RetryError::Cancelled) => Err(ExtractError::Cancelled),
        }
    }

    async fn fetch_attempt(&self, request: &PageRequest, attempt: u32) -> Result<Page, SourceError> {
        let Some(waited) = self.limiter.acquire(&self.cancel).await else {
            // the retry loop is selecting on the same token and will observe
            // the cancellation
            return std::future::pending().await;
        };
        if !waited.is_zero() {
            debug!(
                entity = %self.entity,
                waited_ms = waited.as_millis() as u64,
                "rate limiter delayed request"
            );
        }

        debug!(
            entity = %self.entity,
            attempt,
            cursor = ?request.cursor,
            watermark = ?request.watermark,
            source = %self.source.describe(),
            "fetch attempt"
        );
        self.metrics.increment_requests(1);
        let result = self.source.fetch_page(request).await;
        if let Err(SourceError::Throttled { .. }) = &result {
            self.metrics.increment_throttled(1);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use futures::StreamExt;
    use serde_json::json;
    use std::{collections::VecDeque, sync::Mutex, time::Duration};

    /// Replays a fixed script of responses and records every request.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Page, SourceError>>>,
        fallback: Option<SourceError>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Page, SourceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn always(err: SourceError) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Some(err),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AdSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.responses.lock().unwrap().pop_front() {
                Some(response) => response,
                None => match &self.fallback {
                    Some(err) => Err(err.clone()),
                    None => Ok(Page::default()),
                },
            }
        }
    }

    fn page(rows: &[i64], next: Option<&str>) -> Result<Page, SourceError> {
        Ok(Page {
            records: rows
                .iter()
                .map(|id| json!({ "id": id }).as_object().cloned().unwrap())
                .collect(),
            next_cursor: next.map(str::to_string),
        })
    }

    fn request() -> PageRequest {
        PageRequest {
            watermark: None,
            until: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            cursor: None,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_secs(2))
            .with_max_total_wait(Duration::from_secs(60))
            .with_jitter(0.0)
    }

    fn extractor(source: Arc<ScriptedSource>) -> Extractor {
        Extractor::new("fb.campaigns".into(), "job-1", source, request()).with_retry(policy(3))
    }

    #[tokio::test(start_paused = true)]
    async fn walks_pages_in_order() {
        let source = Arc::new(ScriptedSource::new(vec![
            page(&[1, 2], Some("c1")),
            page(&[3], Some("c2")),
            page(&[4], None),
        ]));
        let mut ex = extractor(source.clone());

        let mut seqs = Vec::new();
        while let Some(batch) = ex.next_batch().await.unwrap() {
            assert!(batch.verify().is_ok());
            seqs.push((batch.seq, batch.page_token.clone(), batch.records.len()));
        }
        assert_eq!(
            seqs,
            vec![
                (0, None, 2),
                (1, Some("c1".to_string()), 1),
                (2, Some("c2".to_string()), 1)
            ]
        );
        assert!(ex.is_finished());
        assert!(ex.next_batch().await.unwrap().is_none());
        assert_eq!(source.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reuse_the_same_cursor() {
        let source = Arc::new(ScriptedSource::new(vec![
            page(&[1], Some("c1")),
            Err(SourceError::Server { status: 502 }),
            Err(SourceError::Throttled {
                retry_after: Some(Duration::from_secs(1)),
            }),
            page(&[2], None),
        ]));
        let metrics = Metrics::new();
        let mut ex = extractor(source.clone()).with_metrics(metrics.clone());

        ex.next_batch().await.unwrap().unwrap();
        let second = ex.next_batch().await.unwrap().unwrap();
        assert_eq!(second.page_token.as_deref(), Some("c1"));

        let cursors: Vec<_> = source.requests().into_iter().map(|r| r.cursor).collect();
        assert_eq!(
            cursors,
            vec![None, Some("c1".into()), Some("c1".into()), Some("c1".into())]
        );
        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_keeps_cursor_in_place() {
        let source = Arc::new(ScriptedSource::new(vec![
            page(&[1], Some("c1")),
            Err(SourceError::Timeout),
            Err(SourceError::Timeout),
            Err(SourceError::Timeout),
        ]));
        let mut ex = extractor(source);
        ex.next_batch().await.unwrap();

        let err = ex.next_batch().await.unwrap_err();
        assert!(matches!(err, ExtractError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(ex.cursor(), Some("c1"));
        assert!(!ex.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let source = Arc::new(ScriptedSource::always(SourceError::Auth { status: 401 }));
        let mut ex = extractor(source.clone());
        let err = ex.next_batch().await.unwrap_err();
        assert!(matches!(err, ExtractError::Fatal { .. }));
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rounds_trip_the_breaker() {
        let source = Arc::new(ScriptedSource::always(SourceError::Throttled {
            retry_after: None,
        }));
        let breaker = Arc::new(BreakerRegistry::new(2, Duration::from_secs(300)));

        let mut first = extractor(source.clone()).with_breaker(breaker.clone());
        assert!(matches!(
            first.next_batch().await.unwrap_err(),
            ExtractError::RetriesExhausted { .. }
        ));
        assert_eq!(source.requests().len(), 3);

        let mut second = extractor(source.clone()).with_breaker(breaker.clone());
        assert!(matches!(
            second.next_batch().await.unwrap_err(),
            ExtractError::SourceUnavailable { .. }
        ));
        assert_eq!(source.requests().len(), 6);

        // open breaker: no request goes out
        let mut third = extractor(source.clone()).with_breaker(breaker);
        assert!(matches!(
            third.next_batch().await.unwrap_err(),
            ExtractError::SourceUnavailable { .. }
        ));
        assert_eq!(source.requests().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_a_cursor_that_does_not_advance() {
        let source = Arc::new(ScriptedSource::new(vec![
            page(&[1], Some("c1")),
            page(&[2], Some("c1")),
        ]));
        let mut ex = extractor(source);
        ex.next_batch().await.unwrap();
        assert!(matches!(
            ex.next_batch().await.unwrap_err(),
            ExtractError::Fatal {
                source: SourceError::Decode(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_backoff() {
        let source = Arc::new(ScriptedSource::always(SourceError::Server { status: 503 }));
        let cancel = CancellationToken::new();
        let mut ex = Extractor::new("fb.campaigns".into(), "job-1", source, request())
            .with_retry(
                RetryPolicy::new(10, Duration::from_secs(30), Duration::from_secs(30))
                    .with_max_total_wait(Duration::from_secs(600))
                    .with_jitter(0.0),
            )
            .with_cancel(cancel.clone());

        let handle = tokio::spawn(async move { ex.next_batch().await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ExtractError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_every_page() {
        let source = Arc::new(ScriptedSource::new(vec![
            page(&[1], Some("c1")),
            page(&[], Some("c2")),
            page(&[2, 3], None),
        ]));
        let batches: Vec<_> = extractor(source).into_stream().collect().await;
        let rows: Vec<usize> = batches
            .into_iter()
            .map(|b| b.unwrap().records.len())
            .collect();
        assert_eq!(rows, vec![1, 0, 2]);
    }
}
