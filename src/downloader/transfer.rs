//! Byte transfers from signed asset URLs.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use super::DownloadError;

/// Raw response of a transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResponse {
    /// HTTP status
    pub status: u16,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// Response body
    pub body: Bytes,
}

/// Fetches the bytes behind a signed URL
#[async_trait]
pub trait Transfer: Send + Sync {
    /// GET `url`. Only transport failures are errors; any status is a response.
    async fn get(&self, url: &str) -> Result<TransferResponse, DownloadError>;
}

/// [`Transfer`] over reqwest
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client with the pipeline timeouts
    pub fn with_default_client() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DownloadError::ClientError(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn get(&self, url: &str) -> Result<TransferResponse, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::NetworkError(e.to_string()))?;

        Ok(TransferResponse {
            status,
            content_type,
            body,
        })
    }
}

/// File extension for a response content type; `bin` when unknown.
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/svg+xml") => "svg",
        Some("application/pdf") => "pdf",
        _ => "bin",
    }
}
