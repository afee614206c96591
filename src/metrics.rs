//! Run observability metrics
//!
//! Records API traffic, rate limiting, download outcomes and optimizer
//! savings through the `metrics` facade. Recording is always cheap; nothing
//! is exported unless [`init_metrics`] installs the Prometheus endpoint.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for an optional scrape endpoint
//! - Without an installed recorder every call is a no-op

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter and describe every metric.
///
/// Idempotent: later calls after a successful install are ignored.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(%existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "api_requests_total",
        Unit::Count,
        "Total number of image API requests by endpoint and status"
    );

    describe_counter!(
        "api_rate_limited_total",
        Unit::Count,
        "Total number of 429 responses from the image API"
    );

    describe_histogram!(
        "api_request_duration_seconds",
        Unit::Seconds,
        "Image API request duration in seconds"
    );

    describe_histogram!(
        "api_retry_backoff_seconds",
        Unit::Seconds,
        "Delay slept before retrying a rate limited chunk"
    );

    describe_counter!(
        "downloads_total",
        Unit::Count,
        "Asset downloads by outcome"
    );

    describe_counter!(
        "optimizer_bytes_saved_total",
        Unit::Bytes,
        "Bytes removed from archived images by the optimizer"
    );

    describe_counter!(
        "documents_total",
        Unit::Count,
        "Documents processed by outcome"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether the exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.get().is_some()
}

/// Times one API request and records its outcome
pub struct ApiRequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
}

impl ApiRequestMetrics {
    /// Start recording a request to `endpoint`
    pub fn start(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start_time: Instant::now(),
        }
    }

    /// Record completion with an HTTP status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "api_requests_total",
            "endpoint" => self.endpoint,
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "api_request_duration_seconds",
            "endpoint" => self.endpoint,
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("api_rate_limited_total", "endpoint" => self.endpoint).increment(1);
            warn!(
                endpoint = self.endpoint,
                duration_ms = duration.as_millis(),
                "Rate limit error (429) recorded"
            );
        }

        debug!(
            endpoint = self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "API request completed"
        );
    }

    /// Record a request that failed before a status arrived
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "api_requests_total",
            "endpoint" => self.endpoint,
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "api_request_duration_seconds",
            "endpoint" => self.endpoint,
        )
        .record(duration.as_secs_f64());

        warn!(
            endpoint = self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }
}

/// Record the delay slept before retry number `retry`
pub fn record_retry_backoff(duration: Duration, retry: u32) {
    histogram!("api_retry_backoff_seconds").record(duration.as_secs_f64());

    debug!(
        retry = retry,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record one finished download
pub fn record_download(outcome: &'static str) {
    counter!("downloads_total", "outcome" => outcome).increment(1);
}

/// Record bytes removed by the optimizer
pub fn record_bytes_saved(bytes: u64) {
    if bytes > 0 {
        counter!("optimizer_bytes_saved_total").increment(bytes);
    }
}

/// Record one finished document
pub fn record_document(outcome: &'static str) {
    counter!("documents_total", "outcome" => outcome).increment(1);
}
