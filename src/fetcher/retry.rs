//! Retry classification and message formatting for image API requests.
//!
//! Classifies failed requests so the batch fetcher can decide whether to
//! retry, and formats consistent log lines for retries and dropped chunks.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of request failures for retry decisions and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Signed asset URL no longer valid (403 from the CDN)
    Expired,
    /// Authentication failures (401)
    AuthFailed,
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::Expired => "asset URL expired",
            Self::AuthFailed => "authentication failed",
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation shown with final failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower --fetch-concurrency or add more access tokens",
            Self::ServerError(_) => "The API may be experiencing issues, rerun later",
            Self::Expired => "Rerun the archive; a fresh URL will be requested",
            Self::AuthFailed => "Verify the access token and its file permissions",
            Self::ClientError(_) => "Check the document key and node ids",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the failure is typically transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::Expired | RetryErrorType::AuthFailed | RetryErrorType::ClientError(_)
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Retry number about to happen (1-based)
    pub retry: u32,
    /// Retry budget for the chunk
    pub max_retries: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Delay until the next attempt
    pub backoff_duration: Duration,
    /// Document key
    pub file_key: String,
    /// Number of ids in the chunk
    pub chunk_len: usize,
}

impl RetryContext {
    /// Format standardized retry message with counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (retry {}/{}) after {} - waiting {:.1} seconds ({}, {} ids)",
            self.retry,
            self.max_retries,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.file_key,
            self.chunk_len
        )
    }

    /// Format final failure summary with a suggestion.
    pub fn format_failure(&self) -> String {
        format!(
            "[FAILED] Chunk of {} ids for {} dropped after {} retries: {}. {}",
            self.chunk_len,
            self.file_key,
            self.max_retries,
            self.error_type.description(),
            self.error_type.suggestion()
        )
    }
}

/// Classify a response status code.
pub fn classify_status(status: u16) -> Option<RetryErrorType> {
    match status {
        200..=299 => None,
        401 => Some(RetryErrorType::AuthFailed),
        403 => Some(RetryErrorType::Expired),
        429 => Some(RetryErrorType::RateLimit),
        500..=599 => Some(RetryErrorType::ServerError(status)),
        _ => Some(RetryErrorType::ClientError(status)),
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(kind) = status.and_then(|s| classify_status(s.as_u16())) {
        return kind;
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}
