//! Rate-limit aware batch fetching.
//!
//! Render requests carry their node ids in the query string, so large id sets
//! are split into chunks whose encoded URL stays within a length budget.
//! Chunks run with bounded concurrency. A throttled or transiently failing
//! chunk backs off and retries until its budget of `K x concurrency` failed
//! attempts is spent, after which it is dropped and reported with the cause
//! of its last failure rather than failing the document.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::retry::{RetryContext, RetryErrorType};
use super::{ApiResponse, FetcherError, FetcherResult, ImageApi, RenderParams};
use crate::downloader::config::{
    calculate_backoff, BASE_BACKOFF_MS, DEFAULT_FETCH_CONCURRENCY, DEFAULT_RETRY_MULTIPLIER,
    DEFAULT_URL_BUDGET, MAX_BACKOFF_MS,
};
use crate::metrics::record_retry_backoff;
use crate::shutdown::{is_requested, sleep_unless_shutdown, SharedShutdown};

/// Encoded length of the `,` joining ids in the query string
const ENCODED_SEPARATOR_LEN: usize = 3;

/// Tuning for a [`BatchFetcher`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Chunks in flight at once
    pub concurrency: usize,
    /// K in the retry budget `K x concurrency`
    pub retry_multiplier: u32,
    /// Base backoff delay
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Maximum encoded URL length
    pub url_budget: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            base_delay: Duration::from_millis(BASE_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            url_budget: DEFAULT_URL_BUDGET,
        }
    }
}

/// Ids split into request-sized chunks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPlan {
    /// Chunks in input order
    pub chunks: Vec<Vec<String>>,
    /// Ids whose URL alone exceeds the budget
    pub oversized: Vec<String>,
}

/// Why a chunk produced no URLs
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Failed transiently more often than the retry budget allows
    RetriesExhausted {
        /// Failed attempts
        attempts: u32,
        /// Classification of the last failure
        cause: RetryErrorType,
    },
    /// Upstream rejected the request
    Rejected(String),
    /// Shutdown requested while waiting
    Cancelled,
}

/// A chunk that was given up on
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedChunk {
    /// Ids of the chunk
    pub ids: Vec<String>,
    /// Cause
    pub reason: DropReason,
}

/// Aggregated result of a batch fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    /// Key to signed URL
    pub urls: BTreeMap<String, String>,
    /// Keys upstream answered with a null URL
    pub unrendered: Vec<String>,
    /// Chunks given up on
    pub dropped: Vec<DroppedChunk>,
    /// Ids skipped because a single id exceeds the URL budget
    pub oversized: Vec<String>,
}

impl FetchOutcome {
    fn absorb(&mut self, ids: Vec<String>, result: ChunkResult) {
        match result {
            ChunkResult::Resolved(mut images) => {
                for id in ids {
                    match images.remove(&id).flatten() {
                        Some(url) => {
                            self.urls.insert(id, url);
                        }
                        None => self.unrendered.push(id),
                    }
                }
            }
            ChunkResult::Dropped(reason) => self.dropped.push(DroppedChunk { ids, reason }),
        }
    }

    fn absorb_all(&mut self, images: BTreeMap<String, Option<String>>) {
        for (key, url) in images {
            match url {
                Some(url) => {
                    self.urls.insert(key, url);
                }
                None => self.unrendered.push(key),
            }
        }
    }
}

enum ChunkResult {
    Resolved(BTreeMap<String, Option<String>>),
    Dropped(DropReason),
}

/// Fetches signed URLs for one document using one access token
pub struct BatchFetcher {
    api: Arc<dyn ImageApi>,
    token: String,
    options: BatchOptions,
    shutdown: Option<SharedShutdown>,
}

impl BatchFetcher {
    /// Create a fetcher using `token` for every request
    pub fn new(api: Arc<dyn ImageApi>, token: impl Into<String>, options: BatchOptions) -> Self {
        Self {
            api,
            token: token.into(),
            options,
            shutdown: None,
        }
    }

    /// Abort backoff sleeps when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Options in effect
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Rate-limited responses a chunk may receive before it is dropped
    pub fn max_retries(&self) -> u32 {
        self.options
            .retry_multiplier
            .saturating_mul(self.options.concurrency.max(1) as u32)
    }

    /// Delay before retry number `retry_count + 1` when no `Retry-After` was given
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        calculate_backoff(
            retry_count,
            self.options.base_delay,
            self.options.concurrency,
            self.options.max_delay,
        )
    }

    /// Split `ids` greedily so every chunk's render URL fits the budget.
    pub fn chunk_ids(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
    ) -> FetcherResult<ChunkPlan> {
        let base_len = self.api.render_url(file_key, &[], params)?.as_str().len();
        let budget = self.options.url_budget;

        let mut plan = ChunkPlan::default();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = base_len;

        for id in ids {
            let id_len = encoded_len(id);
            if base_len + id_len > budget {
                warn!(file_key, node_id = %id, budget, "Node id alone exceeds URL budget");
                plan.oversized.push(id.clone());
                continue;
            }

            let added = if current.is_empty() {
                id_len
            } else {
                id_len + ENCODED_SEPARATOR_LEN
            };

            if current_len + added > budget {
                plan.chunks.push(std::mem::take(&mut current));
                current_len = base_len + id_len;
            } else {
                current_len += added;
            }
            current.push(id.clone());
        }

        if !current.is_empty() {
            plan.chunks.push(current);
        }

        Ok(plan)
    }

    /// Fetch render URLs for `ids`.
    ///
    /// An empty id set issues no request.
    pub async fn fetch_renders(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
    ) -> FetcherResult<FetchOutcome> {
        if ids.is_empty() {
            debug!(file_key, "No ids to render");
            return Ok(FetchOutcome::default());
        }

        let plan = self.chunk_ids(file_key, ids, params)?;
        info!(
            file_key,
            ids = ids.len(),
            chunks = plan.chunks.len(),
            concurrency = self.options.concurrency,
            "Fetching render URLs"
        );

        let results: Vec<(Vec<String>, ChunkResult)> = stream::iter(plan.chunks)
            .map(|chunk| async move {
                let result = self
                    .with_retry(file_key, chunk.len(), || {
                        self.api.render_images(file_key, &chunk, params, &self.token)
                    })
                    .await;
                (chunk, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut outcome = FetchOutcome {
            oversized: plan.oversized,
            ..Default::default()
        };
        for (chunk, result) in results {
            outcome.absorb(chunk, result);
        }
        Ok(outcome)
    }

    /// Fetch signed URLs for every image fill of a document
    pub async fn fetch_fills(&self, file_key: &str) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        match self
            .with_retry(file_key, 1, || self.api.image_fills(file_key, &self.token))
            .await
        {
            ChunkResult::Resolved(images) => outcome.absorb_all(images),
            ChunkResult::Dropped(reason) => outcome.dropped.push(DroppedChunk {
                ids: Vec::new(),
                reason,
            }),
        }
        outcome
    }

    async fn with_retry<F, Fut>(&self, file_key: &str, chunk_len: usize, request: F) -> ChunkResult
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ApiResponse, FetcherError>>,
    {
        let max_retries = self.max_retries();
        let mut failures: u32 = 0;

        loop {
            if is_requested(self.shutdown.as_ref()) {
                return ChunkResult::Dropped(DropReason::Cancelled);
            }

            let (delay, error_type) = match request().await {
                Ok(ApiResponse::Images(images)) => {
                    if failures > 0 {
                        debug!(file_key, retries = failures, "Chunk succeeded after retries");
                    }
                    return ChunkResult::Resolved(images);
                }
                Ok(ApiResponse::Rejected { status, reason }) => {
                    warn!(file_key, status, %reason, "Request rejected by API");
                    return ChunkResult::Dropped(DropReason::Rejected(reason));
                }
                Ok(ApiResponse::RateLimited { retry_after }) => (
                    retry_after
                        .map(|delay| delay.min(self.options.max_delay))
                        .unwrap_or_else(|| self.backoff_delay(failures)),
                    RetryErrorType::RateLimit,
                ),
                Err(e) => match e.error_type() {
                    Some(error_type) if error_type.is_retryable() => {
                        warn!(file_key, error = %e, "Transient API failure");
                        (self.backoff_delay(failures), error_type)
                    }
                    _ => {
                        warn!(file_key, error = %e, "Request failed");
                        return ChunkResult::Dropped(DropReason::Rejected(e.to_string()));
                    }
                },
            };

            failures += 1;
            let context = RetryContext {
                retry: failures,
                max_retries,
                error_type,
                backoff_duration: delay,
                file_key: file_key.to_string(),
                chunk_len,
            };

            if failures >= max_retries {
                error!(file_key, attempts = failures, "{}", context.format_failure());
                return ChunkResult::Dropped(DropReason::RetriesExhausted {
                    attempts: failures,
                    cause: error_type,
                });
            }

            info!(file_key, "{}", context.format_retry());
            record_retry_backoff(delay, failures);

            if !sleep_unless_shutdown(self.shutdown.as_ref(), delay).await {
                return ChunkResult::Dropped(DropReason::Cancelled);
            }
        }
    }
}

/// Length of `s` after `application/x-www-form-urlencoded` encoding.
///
/// Alphanumerics and `*-._` stay literal, space becomes `+`, every other byte
/// becomes `%XX`.
pub fn encoded_len(s: &str) -> usize {
    s.bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'*' | b'-' | b'.' | b'_' | b' ' => 1,
            _ => 3,
        })
        .sum()
}
