//! Shared fakes and fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use design_archiver::downloader::{DownloadError, Transfer, TransferResponse};
use design_archiver::fetcher::http::render_url;
use design_archiver::fetcher::{ApiResponse, FetcherError, FetcherResult, ImageApi, RenderParams};

pub const TEST_API_BASE: &str = "https://api.test/v1";
pub const CDN_BASE: &str = "https://cdn.test";

/// Image API double that counts calls and can rate limit
#[derive(Default)]
pub struct FakeApi {
    render_calls: AtomicUsize,
    fill_calls: AtomicUsize,
    rate_limits_left: Mutex<usize>,
    server_errors_left: Mutex<usize>,
    retry_after: Option<Duration>,
    requested: Mutex<Vec<Vec<String>>>,
    unrenderable: BTreeSet<String>,
    fills: BTreeMap<String, Option<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` requests with 429
    pub fn rate_limited(n: usize) -> Self {
        Self {
            rate_limits_left: Mutex::new(n),
            ..Self::default()
        }
    }

    /// Answer the next `n` requests with HTTP 502
    pub fn server_errors(n: usize) -> Self {
        Self {
            server_errors_left: Mutex::new(n),
            ..Self::default()
        }
    }

    /// Send this `Retry-After` with 429s instead of 1ms
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Answer these ids with a null URL
    pub fn with_unrenderable(mut self, ids: &[&str]) -> Self {
        self.unrenderable = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Serve these fills; each hash maps to `{CDN_BASE}/fills/{hash}`
    pub fn with_fills(mut self, hashes: &[&str]) -> Self {
        self.fills = hashes
            .iter()
            .map(|h| (h.to_string(), Some(format!("{CDN_BASE}/fills/{h}"))))
            .collect();
        self
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    pub fn fill_calls(&self) -> usize {
        self.fill_calls.load(Ordering::SeqCst)
    }

    /// Id lists of every render request, in arrival order
    pub fn requested_ids(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }

    /// Canned failure for the next request, if any are left
    fn take_failure(&self) -> Option<FetcherResult<ApiResponse>> {
        let mut errors = self.server_errors_left.lock().unwrap();
        if *errors > 0 {
            *errors -= 1;
            return Some(Err(FetcherError::ServerError(502)));
        }
        let mut limits = self.rate_limits_left.lock().unwrap();
        if *limits > 0 {
            *limits -= 1;
            return Some(Ok(ApiResponse::RateLimited {
                retry_after: Some(self.retry_after.unwrap_or(Duration::from_millis(1))),
            }));
        }
        None
    }
}

#[async_trait]
impl ImageApi for FakeApi {
    fn render_url(&self, file_key: &str, ids: &[String], params: &RenderParams) -> FetcherResult<Url> {
        render_url(TEST_API_BASE, file_key, ids, params)
    }

    async fn image_fills(&self, _file_key: &str, _token: &str) -> FetcherResult<ApiResponse> {
        self.fill_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.take_failure() {
            return failure;
        }
        Ok(ApiResponse::Images(self.fills.clone()))
    }

    async fn render_images(
        &self,
        file_key: &str,
        ids: &[String],
        params: &RenderParams,
        _token: &str,
    ) -> FetcherResult<ApiResponse> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(ids.to_vec());
        if let Some(failure) = self.take_failure() {
            return failure;
        }

        let images = ids
            .iter()
            .map(|id| {
                let url = (!self.unrenderable.contains(id))
                    .then(|| format!("{CDN_BASE}/{file_key}/{id}.{}", params.format));
                (id.clone(), url)
            })
            .collect();
        Ok(ApiResponse::Images(images))
    }
}

/// Transfer double serving canned responses by URL
#[derive(Default)]
pub struct FakeTransfer {
    responses: Mutex<BTreeMap<String, TransferResponse>>,
    fallback: Option<TransferResponse>,
    calls: AtomicUsize,
}

impl FakeTransfer {
    /// Unknown URLs get a 404
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown URLs get `body` as a PNG
    pub fn serving_png(body: Vec<u8>) -> Self {
        Self {
            fallback: Some(png_response(body)),
            ..Self::default()
        }
    }

    pub fn respond(&self, url: &str, response: TransferResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn get(&self, url: &str) -> Result<TransferResponse, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(response) = self.responses.lock().unwrap().get(url) {
            return Ok(response.clone());
        }
        Ok(self.fallback.clone().unwrap_or(TransferResponse {
            status: 404,
            content_type: None,
            body: Bytes::new(),
        }))
    }
}

pub fn png_response(body: Vec<u8>) -> TransferResponse {
    TransferResponse {
        status: 200,
        content_type: Some("image/png".to_string()),
        body: Bytes::from(body),
    }
}

pub fn forbidden() -> TransferResponse {
    TransferResponse {
        status: 403,
        content_type: Some("application/xml".to_string()),
        body: Bytes::from_static(b"<Error>AccessDenied</Error>"),
    }
}

/// Deterministic noisy RGB image encoded as PNG
pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9E37_79B9;
    let image = image::RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    });
    encode(image::DynamicImage::ImageRgb8(image), image::ImageFormat::Png)
}

/// Single-colour RGB image encoded as PNG
pub fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([40, 120, 200]));
    encode(image::DynamicImage::ImageRgb8(image), image::ImageFormat::Png)
}

/// Smooth gradient encoded as JPEG
pub fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encode(image::DynamicImage::ImageRgb8(image), image::ImageFormat::Jpeg)
}

fn encode(image: image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// Cached document: one canvas holding frame `12:3` (80x40) with a FIT fill
/// `fillhash` and an unrotated translation of (10, 20).
pub fn single_frame_document() -> serde_json::Value {
    serde_json::json!({
        "name": "Single frame",
        "version": "42",
        "lastModified": "2024-05-01T10:00:00Z",
        "thumbnailUrl": format!("{CDN_BASE}/thumbs/single"),
        "document": {
            "id": "0:0",
            "type": "DOCUMENT",
            "children": [{
                "id": "0:1",
                "type": "CANVAS",
                "children": [{
                    "id": "12:3",
                    "type": "FRAME",
                    "size": {"x": 80.0, "y": 40.0},
                    "relativeTransform": [[1.0, 0.0, 10.0], [0.0, 1.0, 20.0]],
                    "fills": [{"type": "IMAGE", "imageRef": "fillhash", "scaleMode": "FIT"}]
                }]
            }]
        }
    })
}

pub fn write_document(source_dir: &Path, key: &str, document: &serde_json::Value) {
    std::fs::write(
        source_dir.join(format!("{key}.json")),
        serde_json::to_vec(document).unwrap(),
    )
    .unwrap();
}
