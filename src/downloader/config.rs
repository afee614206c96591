//! Pipeline configuration constants

use std::time::Duration;

/// Default number of documents processed concurrently
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of render chunks in flight per document
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Default retry multiplier K; a chunk may fail K x concurrency times before it is dropped
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 5;

/// Base rate-limit backoff in milliseconds.
pub const BASE_BACKOFF_MS: u64 = 2_000;

/// Backoff cap in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 300_000;

/// Maximum encoded length of a render request URL
pub const DEFAULT_URL_BUDGET: usize = 4_000;

/// Downloads started together by the queue consumer
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Idle period after which the queue consumer gives up waiting
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Connect timeout for API and CDN requests
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout for API and CDN requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Linear rate-limit backoff scaled by concurrency.
///
/// Retry `n` (0-based) waits `(n + 1) * base * concurrency`, capped at `max`.
/// Scaling by concurrency spreads concurrent chunks that were throttled
/// together.
pub fn calculate_backoff(
    retry_count: u32,
    base: Duration,
    concurrency: usize,
    max: Duration,
) -> Duration {
    let factor = (retry_count as u64 + 1).saturating_mul(concurrency.max(1) as u64);
    let delay_ms = (base.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(delay_ms).min(max)
}
