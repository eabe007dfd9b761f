#[cfg(test)]
mod tests {
    use crate::{ENTITY, Harness, ScriptedSource, TABLE, campaign, three_pages, watermark};
    use engine_core::{
        error::SourceError, rate_limit::RateLimiter, retry::RetryPolicy, state::StateStore,
    };
    use engine_processing::cb::BreakerRegistry;
    use model::{
        core::{identifiers::EntityId, watermark::Watermark},
        events::sync::SyncEvent,
        execution::sync_job::SyncStatus,
    };
    use serde_json::json;
    use std::{sync::Arc, time::Duration};
    use tracing_test::traced_test;

    async fn checkpoint(harness: &Harness) -> Option<Watermark> {
        harness
            .state
            .load_checkpoint(&EntityId::new(ENTITY))
            .await
            .unwrap()
            .map(|c| c.watermark)
    }

    async fn checkpoint_history(harness: &Harness) -> Vec<Watermark> {
        harness
            .state
            .events(&EntityId::new(ENTITY), 1_000)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::CheckpointAdvanced { watermark, .. } => Some(watermark),
                _ => None,
            })
            .collect()
    }

    // Replaying already loaded pages leaves the warehouse exactly as it was.
    #[traced_test]
    #[tokio::test]
    async fn replayed_pages_do_not_duplicate_rows() {
        let harness = Harness::new();
        harness.run(Arc::new(ScriptedSource::new(three_pages())), None).await;
        let once = harness.warehouse.rows(TABLE).await;

        let report = harness
            .run(
                Arc::new(ScriptedSource::new(three_pages())),
                Some(watermark("2025-06-01")),
            )
            .await;

        assert_eq!(report.status, SyncStatus::Succeeded);
        assert_eq!(report.rows_written, 3);
        assert_eq!(harness.warehouse.rows(TABLE).await, once);
        assert_eq!(once.len(), 3);
    }

    // A batch staged when the load failed is replayed by the next run, and the
    // result matches a run that never failed.
    #[traced_test]
    #[tokio::test]
    async fn interrupted_load_recovers_to_uninterrupted_result() {
        let reference = Harness::new();
        reference
            .run(Arc::new(ScriptedSource::new(three_pages())), None)
            .await;

        let harness = Harness::new().with_retry(
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)).with_jitter(0.0),
        );
        harness.warehouse.fail_next_upserts(1);
        let first = harness
            .run(Arc::new(ScriptedSource::new(three_pages())), None)
            .await;

        assert_eq!(first.status, SyncStatus::PartiallyFailed);
        assert_eq!(checkpoint(&harness).await, None);
        let staged = harness
            .state
            .list_staged(&EntityId::new(ENTITY))
            .await
            .unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].seq, 0);

        let second = harness
            .run(Arc::new(ScriptedSource::new(three_pages())), None)
            .await;

        assert_eq!(second.status, SyncStatus::Succeeded);
        assert_eq!(second.batches_recovered, 1);
        assert_eq!(
            harness.warehouse.rows(TABLE).await,
            reference.warehouse.rows(TABLE).await
        );
        assert_eq!(checkpoint(&harness).await, checkpoint(&reference).await);
        assert!(
            harness
                .state
                .list_staged(&EntityId::new(ENTITY))
                .await
                .unwrap()
                .is_empty()
        );
    }

    // Across forward runs, a rewinding override and a drifted page, the
    // stored checkpoint never moves backwards.
    #[traced_test]
    #[tokio::test]
    async fn checkpoint_only_moves_forward() {
        let harness = Harness::new();
        harness
            .run(Arc::new(ScriptedSource::new(three_pages())), None)
            .await;

        let rewind = harness
            .run(
                Arc::new(ScriptedSource::new(vec![vec![campaign(
                    1,
                    "2025-06-01",
                    json!("150"),
                )]])),
                Some(watermark("2025-05-01")),
            )
            .await;
        assert_eq!(rewind.status, SyncStatus::Succeeded);
        assert_eq!(checkpoint(&harness).await, Some(watermark("2025-06-03")));

        let drifted = harness
            .run(
                Arc::new(ScriptedSource::new(vec![
                    vec![campaign(4, "2025-06-04", json!(400))],
                    vec![campaign(5, "2025-06-05", json!("500"))],
                ])),
                None,
            )
            .await;
        assert_eq!(drifted.status, SyncStatus::PartiallyFailed);
        assert_eq!(checkpoint(&harness).await, Some(watermark("2025-06-03")));

        harness
            .run(
                Arc::new(ScriptedSource::new(vec![vec![campaign(
                    6,
                    "2025-06-06",
                    json!("600"),
                )]])),
                None,
            )
            .await;

        let history = checkpoint_history(&harness).await;
        assert!(history.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(history.last(), Some(&watermark("2025-06-06")));
    }

    // Against a source that always throttles, each job makes at most
    // `max_attempts` calls with non-shrinking waits, and repeated exhaustion
    // opens the breaker so later jobs make no calls at all.
    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_breaker_opens() {
        let harness = Harness::new()
            .with_retry(
                RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1))
                    .with_jitter(0.0),
            )
            .with_breakers(BreakerRegistry::new(2, Duration::from_secs(300)));
        let source = Arc::new(ScriptedSource::always_failing(SourceError::Throttled {
            retry_after: None,
        }));

        let first = harness.run(source.clone(), None).await;
        assert_eq!(first.status, SyncStatus::Failed);
        assert_eq!(source.requests(), 4);
        let gaps = source.gaps();
        assert_eq!(gaps.len(), 3);
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
        assert!(gaps.iter().all(|g| *g <= Duration::from_secs(1)));
        assert!(gaps[0] >= Duration::from_millis(100));

        let second = harness.run(source.clone(), None).await;
        assert_eq!(second.status, SyncStatus::Failed);
        assert_eq!(source.requests(), 8);
        assert!(harness.breakers.is_open(&EntityId::new(ENTITY)).await);

        let third = harness.run(source.clone(), None).await;
        assert_eq!(third.status, SyncStatus::Failed);
        assert_eq!(source.requests(), 8);
        assert!(third.cause.unwrap().contains("unavailable"));
    }

    // A Retry-After hint longer than the backoff cap is still honoured.
    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_sets_the_wait() {
        let harness = Harness::new().with_retry(
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
                .with_max_total_wait(Duration::from_secs(60))
                .with_jitter(0.0),
        );
        let source = Arc::new(
            ScriptedSource::new(three_pages()).then_fail(vec![SourceError::Throttled {
                retry_after: Some(Duration::from_secs(3)),
            }]),
        );

        let report = harness.run(source.clone(), None).await;

        assert_eq!(report.status, SyncStatus::Succeeded);
        assert_eq!(report.retries, 1);
        assert!(source.gaps()[0] >= Duration::from_secs(3));
    }

    // With rate r and burst b, no window of t seconds sees more than
    // b + r*t requests.
    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn requests_respect_the_rate_limit() {
        let harness = Harness::new();
        let pages = (1..=6)
            .map(|day| vec![campaign(day, &format!("2025-06-{day:02}"), json!("100"))])
            .collect();
        let source = Arc::new(ScriptedSource::new(pages));
        let (rate, burst) = (2.0, 2u32);

        let report = harness
            .run_pipeline(
                harness.limited_pipeline(source.clone(), RateLimiter::new(rate, burst)),
                None,
            )
            .await;
        assert_eq!(report.status, SyncStatus::Succeeded);
        assert_eq!(source.requests(), 6);

        let gaps = source.gaps();
        for start in 0..gaps.len() {
            for end in start..gaps.len() {
                let window: Duration = gaps[start..=end].iter().sum();
                let requests = (end - start + 2) as f64;
                assert!(requests <= f64::from(burst) + rate * window.as_secs_f64() + 1e-6);
            }
        }
    }

    // A run that hits the wall-clock budget fails and keeps what it staged.
    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn timed_out_job_keeps_staged_batches() {
        let harness = Harness::new().with_retry(
            RetryPolicy::new(50, Duration::from_secs(1), Duration::from_secs(1))
                .with_max_total_wait(Duration::from_secs(3_600))
                .with_jitter(0.0),
        );
        harness.warehouse.fail_next_upserts(u32::MAX);
        let ctx = harness.context().with_run_timeout(Duration::from_secs(10));
        let pipeline = harness.pipeline(Arc::new(ScriptedSource::new(three_pages())));

        let report = engine_runtime::execution::SyncCoordinator::new(ctx, pipeline)
            .run(None, &tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(report.cause.as_deref(), Some("timeout"));
        assert_eq!(checkpoint(&harness).await, None);
        assert_eq!(
            harness
                .state
                .list_staged(&EntityId::new(ENTITY))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
