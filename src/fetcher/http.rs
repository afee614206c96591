//! HTTP client for the image API.
//!
//! Single requests only: retries, chunking and backoff live in
//! [`super::batch`]. Responses are decoded into [`ApiResponse`] so callers
//! never see raw status handling.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::retry::extract_error_type;
use super::{ApiResponse, FetcherError, FetcherResult, ImageApi, RenderParams};
use crate::downloader::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::metrics::ApiRequestMetrics;

/// Production API root
pub const DEFAULT_API_BASE_URL: &str = "https://api.figma.com/v1";

const TOKEN_HEADER: &str = "X-Figma-Token";

/// Image API client over reqwest
#[derive(Debug, Clone)]
pub struct FigmaHttpClient {
    client: Client,
    base_url: String,
}

impl FigmaHttpClient {
    /// Create a client on top of a shared reqwest client
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a client for the production API with default timeouts
    pub fn with_default_client() -> FetcherResult<Self> {
        Ok(Self::new(build_client()?, DEFAULT_API_BASE_URL))
    }

    /// API root this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: Url, token: &str, endpoint: &'static str) -> FetcherResult<ApiResponse> {
        let metrics = ApiRequestMetrics::start(endpoint);
        debug!(endpoint, url_len = url.as_str().len(), "Sending API request");

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| {
                metrics.record_network_error();
                network_error(&e)
            })?;

        let status = response.status();
        metrics.record_complete(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ApiResponse::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }

        if status.is_server_error() {
            return Err(FetcherError::ServerError(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(&e))?;

        Ok(parse_images_body(status.as_u16(), &body))
    }
}

fn network_error(err: &reqwest::Error) -> FetcherError {
    FetcherError::NetworkError {
        kind: extract_error_type(None, Some(err)),
        message: err.to_string(),
    }
}

/// Build the shared reqwest client with the pipeline timeouts
pub fn build_client() -> FetcherResult<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| FetcherError::InvalidRequest(format!("Failed to build HTTP client: {e}")))
}

/// Build a render URL: `{base}/images/{key}?ids=..&scale=..&format=..&use_absolute_bounds=true`.
pub fn render_url(
    base_url: &str,
    file_key: &str,
    ids: &[String],
    params: &RenderParams,
) -> FetcherResult<Url> {
    let endpoint = format!("{}/images/{}", base_url.trim_end_matches('/'), file_key);
    Url::parse_with_params(
        &endpoint,
        &[
            ("ids", ids.join(",")),
            ("scale", format_scale(params.scale)),
            ("format", params.format.as_str().to_string()),
            ("use_absolute_bounds", "true".to_string()),
        ],
    )
    .map_err(|e| FetcherError::InvalidRequest(format!("{endpoint}: {e}")))
}

/// Format a scale the way it appears in URLs and file names: `1`, `2`, `0.5`.
pub fn format_scale(scale: f64) -> String {
    if scale.fract() == 0.0 {
        format!("{}", scale as i64)
    } else {
        format!("{scale}")
    }
}

/// Parse `Retry-After` given in seconds.
///
/// Values a [`Duration`] cannot hold are ignored like any other garbage.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    match value.parse::<f64>().ok().map(Duration::try_from_secs_f64) {
        Some(Ok(delay)) => Some(delay),
        _ => {
            warn!(value, "Ignoring unparseable Retry-After header");
            None
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetaBody {
    #[serde(default)]
    images: Option<BTreeMap<String, Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
struct ImagesBody {
    #[serde(default)]
    images: Option<BTreeMap<String, Option<String>>>,
    #[serde(default)]
    meta: Option<MetaBody>,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode an image API body.
///
/// Both the render shape (`{"images": {..}}`) and the fills shape
/// (`{"meta": {"images": {..}}}`) are accepted. An `err`/`error` field or a
/// non-success status is a rejection. A successful but undecodable body is
/// treated as an empty result.
pub fn parse_images_body(status: u16, body: &[u8]) -> ApiResponse {
    let success = (200..300).contains(&status);

    let parsed: ImagesBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) if success => {
            warn!(status, error = %e, "Undecodable API response treated as empty");
            return ApiResponse::Images(BTreeMap::new());
        }
        Err(_) => {
            return ApiResponse::Rejected {
                status,
                reason: format!("HTTP {status}"),
            }
        }
    };

    if let Some(reason) = error_reason(parsed.err.as_ref()).or_else(|| error_reason(parsed.error.as_ref())) {
        return ApiResponse::Rejected {
            status,
            reason: parsed.message.unwrap_or(reason),
        };
    }

    if !success {
        return ApiResponse::Rejected {
            status,
            reason: parsed.message.unwrap_or_else(|| format!("HTTP {status}")),
        };
    }

    let images = parsed
        .images
        .or_else(|| parsed.meta.and_then(|meta| meta.images))
        .unwrap_or_default();
    ApiResponse::Images(images)
}

fn error_reason(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("error flag set".to_string()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ImageApi for FigmaHttpClient {
    fn render_url(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
    ) -> FetcherResult<Url> {
        render_url(&self.base_url, file_key, ids, params)
    }

    async fn image_fills(&self, file_key: &str, token: &str) -> FetcherResult<ApiResponse> {
        let endpoint = format!("{}/files/{}/images", self.base_url, file_key);
        let url = Url::parse(&endpoint)
            .map_err(|e| FetcherError::InvalidRequest(format!("{endpoint}: {e}")))?;
        self.get(url, token, "image_fills").await
    }

    async fn render_images(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
        token: &str,
    ) -> FetcherResult<ApiResponse> {
        let url = render_url(&self.base_url, file_key, ids, params)?;
        self.get(url, token, "render_images").await
    }
}
