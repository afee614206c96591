//! Remote image API access.
//!
//! [`ImageApi`] is the seam between the archiver and the upstream service:
//! one call lists signed URLs for a document's image fills, another asks for
//! node renders. [`http::FigmaHttpClient`] talks to the real API; tests swap
//! in in-memory fakes. [`batch::BatchFetcher`] layers URL-length chunking,
//! bounded concurrency and rate-limit retries on top.

pub mod batch;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use reqwest::Url;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::ExportFormat;

pub use batch::{BatchFetcher, BatchOptions, ChunkPlan, DropReason, DroppedChunk, FetchOutcome};
pub use retry::RetryErrorType;

/// Errors that can occur while talking to the image API
#[derive(Error, Debug)]
pub enum FetcherError {
    /// Connection, timeout or body read failure
    #[error("Network error ({}): {message}", .kind.description())]
    NetworkError {
        /// Timeout, offline or generic
        kind: RetryErrorType,
        /// Underlying error text
        message: String,
    },

    /// Upstream answered with a server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetcherError {
    /// Retry classification, `None` for requests that could not be built
    pub fn error_type(&self) -> Option<RetryErrorType> {
        match self {
            FetcherError::NetworkError { kind, .. } => Some(*kind),
            FetcherError::ServerError(code) => Some(RetryErrorType::ServerError(*code)),
            FetcherError::InvalidRequest(_) => None,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        self.error_type().is_some_and(|kind| kind.is_retryable())
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Decoded response of an image API call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Key to signed URL; `None` when upstream could not produce the image
    Images(BTreeMap<String, Option<String>>),
    /// HTTP 429 with the server-requested delay, if any
    RateLimited {
        /// Parsed `Retry-After`
        retry_after: Option<Duration>,
    },
    /// Non-retryable rejection carried in the body or status
    Rejected {
        /// HTTP status
        status: u16,
        /// Upstream message
        reason: String,
    },
}

/// Render parameters for node exports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    /// Render scale, 0.01 to 4
    pub scale: f64,
    /// Output format
    pub format: ExportFormat,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            format: ExportFormat::Png,
        }
    }
}

/// Image API operations used by the archiver.
#[async_trait]
pub trait ImageApi: Send + Sync {
    /// Build the render URL for `ids`, used to budget chunk sizes
    fn render_url(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
    ) -> FetcherResult<Url>;

    /// List signed URLs for every image fill in a document
    async fn image_fills(&self, file_key: &str, token: &str) -> FetcherResult<ApiResponse>;

    /// Request renders of `ids`
    async fn render_images(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
        token: &str,
    ) -> FetcherResult<ApiResponse>;
}
