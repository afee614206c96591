//! Render URL batching and rate-limit retries

use std::sync::Arc;
use std::time::Duration;

use design_archiver::fetcher::{
    BatchFetcher, BatchOptions, DropReason, ImageApi, RenderParams, RetryErrorType,
};
use design_archiver::shutdown::ShutdownCoordinator;

use crate::support::FakeApi;

fn fast_options() -> BatchOptions {
    BatchOptions {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..BatchOptions::default()
    }
}

fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}:{}", i / 7, i)).collect()
}

#[tokio::test]
async fn chunk_dropped_after_exactly_the_retry_budget() {
    let options = fast_options();
    let budget = (options.retry_multiplier as usize) * options.concurrency;
    let api = Arc::new(FakeApi::rate_limited(budget));
    let fetcher = BatchFetcher::new(api.clone(), "token", options);
    assert_eq!(fetcher.max_retries() as usize, budget);

    let outcome = fetcher
        .fetch_renders("DOC", &ids(1), &RenderParams::default())
        .await
        .unwrap();

    assert!(outcome.urls.is_empty());
    assert_eq!(outcome.dropped.len(), 1);
    assert_eq!(
        outcome.dropped[0].reason,
        DropReason::RetriesExhausted {
            attempts: budget as u32,
            cause: RetryErrorType::RateLimit,
        }
    );
    assert_eq!(api.render_calls(), budget);
}

#[tokio::test]
async fn chunk_recovers_one_short_of_the_budget() {
    let options = fast_options();
    let budget = (options.retry_multiplier as usize) * options.concurrency;
    let api = Arc::new(FakeApi::rate_limited(budget - 1));
    let fetcher = BatchFetcher::new(api.clone(), "token", options);

    let outcome = fetcher
        .fetch_renders("DOC", &ids(1), &RenderParams::default())
        .await
        .unwrap();

    assert!(outcome.dropped.is_empty());
    assert_eq!(outcome.urls.len(), 1);
    assert_eq!(api.render_calls(), budget);
}

#[tokio::test]
async fn chunks_respect_url_budget_at_every_size() {
    let api = Arc::new(FakeApi::new());
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options());
    let params = RenderParams::default();
    let budget = fetcher.options().url_budget;

    for n in [1, 7, 1000, 100_000] {
        let input = ids(n);
        let plan = fetcher.chunk_ids("DOC", &input, &params).unwrap();
        assert!(plan.oversized.is_empty());

        for chunk in &plan.chunks {
            assert!(!chunk.is_empty());
            let url = api.render_url("DOC", chunk, &params).unwrap();
            assert!(
                url.as_str().len() <= budget,
                "{} ids: chunk URL of {} bytes exceeds {budget}",
                n,
                url.as_str().len()
            );
        }

        let flattened: Vec<String> = plan.chunks.into_iter().flatten().collect();
        assert_eq!(flattened, input, "{n} ids must be chunked in order without loss");
    }
}

#[tokio::test]
async fn empty_id_set_issues_no_request() {
    let api = Arc::new(FakeApi::new());
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options());

    let outcome = fetcher
        .fetch_renders("DOC", &[], &RenderParams::default())
        .await
        .unwrap();

    assert_eq!(outcome, Default::default());
    assert_eq!(api.render_calls(), 0);
}

#[tokio::test]
async fn null_urls_are_reported_as_unrendered() {
    let api = Arc::new(FakeApi::new().with_unrenderable(&["0:2"]));
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options());

    let outcome = fetcher
        .fetch_renders("DOC", &ids(4), &RenderParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.urls.len(), 3);
    assert_eq!(outcome.unrendered, vec!["0:2".to_string()]);
    assert!(outcome.urls["0:1"].ends_with("/DOC/0:1.png"));
}

#[tokio::test]
async fn fills_are_fetched_in_one_request() {
    let api = Arc::new(FakeApi::new().with_fills(&["aaa", "bbb"]));
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options());

    let outcome = fetcher.fetch_fills("DOC").await;

    assert_eq!(outcome.urls.len(), 2);
    assert_eq!(api.fill_calls(), 1);
}

#[tokio::test]
async fn shutdown_cancels_pending_chunks() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let api = Arc::new(FakeApi::new());
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options()).with_shutdown(shutdown);

    let outcome = fetcher
        .fetch_renders("DOC", &ids(3), &RenderParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.dropped.len(), 1);
    assert_eq!(outcome.dropped[0].reason, DropReason::Cancelled);
    assert_eq!(api.render_calls(), 0);
}

#[tokio::test]
async fn server_errors_spend_the_budget_and_keep_their_cause() {
    let options = fast_options();
    let budget = (options.retry_multiplier as usize) * options.concurrency;
    let api = Arc::new(FakeApi::server_errors(budget));
    let fetcher = BatchFetcher::new(api.clone(), "token", options);

    let outcome = fetcher
        .fetch_renders("DOC", &ids(3), &RenderParams::default())
        .await
        .unwrap();

    assert_eq!(outcome.dropped.len(), 1);
    assert_eq!(
        outcome.dropped[0].reason,
        DropReason::RetriesExhausted {
            attempts: budget as u32,
            cause: RetryErrorType::ServerError(502),
        }
    );
    assert_eq!(api.render_calls(), budget);
}

#[tokio::test]
async fn server_requested_delay_is_capped() {
    let api = Arc::new(FakeApi::rate_limited(1).with_retry_after(Duration::from_secs(86_400)));
    let fetcher = BatchFetcher::new(api.clone(), "token", fast_options());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        fetcher.fetch_renders("DOC", &ids(1), &RenderParams::default()),
    )
    .await
    .expect("Retry-After was not capped by max_delay")
    .unwrap();

    assert!(outcome.dropped.is_empty());
    assert_eq!(outcome.urls.len(), 1);
    assert_eq!(api.render_calls(), 2);
}
