//! # Design Archiver Library
//!
//! Mirrors large corpora of hierarchical design documents together with the
//! raster assets they reference: per-node rendered exports and the
//! content-addressed image fills embedded in paint properties. Runs are
//! idempotent and resumable: everything already archived is rediscovered from
//! the output directory at the start of each document.
//!
//! ## Architecture
//!
//! - [`document`] - Document tree model, geometry resolution and node indexing
//! - [`fills`] - Paint usage mapping and scale-mode aware render sizing
//! - [`fetcher`] - Remote image API client and rate-limit aware batch fetching
//! - [`downloader`] - Download tasks, the backpressured download queue and transfers
//! - [`optimize`] - In-place image shrinking with embedded original-size metadata
//! - [`manifest`] - Archive manifests rebuilt from what is actually on disk
//! - [`archiver`] - Per-document workers and the orchestrator driving them
//! - [`report`] - Shared run statistics and the durable failure log
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use design_archiver::archiver::{ArchiveConfig, Archiver, Credentials};
//! use design_archiver::downloader::HttpTransfer;
//! use design_archiver::fetcher::http::FigmaHttpClient;
//! use design_archiver::report::FailureLog;
//! use design_archiver::shutdown::ShutdownCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ArchiveConfig::new("./files", "./archive");
//! let failures = Arc::new(FailureLog::open(&config.error_log)?);
//! let archiver = Archiver::new(
//!     config,
//!     Credentials::parse("figd_token")?,
//!     Arc::new(FigmaHttpClient::with_default_client()?),
//!     Arc::new(HttpTransfer::with_default_client()?),
//!     failures,
//!     ShutdownCoordinator::shared(),
//! );
//! let summary = archiver.run().await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-document workers and run orchestration
pub mod archiver;

/// Atomic file replacement helpers
pub mod atomic;

/// CLI command implementations
pub mod cli;

/// Design document model
pub mod document;

/// Download tasks, queue and transfers
pub mod downloader;

/// Remote image API access
pub mod fetcher;

/// Paint usage mapping and fill sizing
pub mod fills;

/// Archive manifests
pub mod manifest;

/// Metrics facade
pub mod metrics;

/// In-place image optimisation
pub mod optimize;

/// Run statistics and failure log
pub mod report;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use archiver::{ArchiveConfig, Archiver};
pub use document::{DesignDocument, Node, Paint};

/// Pixel dimensions of a raster image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimension pair
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both sides fit inside `other`
    pub fn fits_within(&self, other: &Dimensions) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Width divided by height, or `None` for degenerate images
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height == 0 {
            None
        } else {
            Some(self.width as f64 / self.height as f64)
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Render format requested from the image API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Portable network graphics
    #[serde(rename = "png")]
    Png,
    /// JPEG
    #[serde(rename = "jpg")]
    Jpg,
    /// Scalable vector graphics
    #[serde(rename = "svg")]
    Svg,
    /// PDF document
    #[serde(rename = "pdf")]
    Pdf,
}

impl ExportFormat {
    /// Lowercase name as used in query strings and file extensions
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpg => "jpg",
            ExportFormat::Svg => "svg",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// Whether the in-place optimizer can rewrite files of this format
    pub fn is_raster(&self) -> bool {
        matches!(self, ExportFormat::Png | ExportFormat::Jpg)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpg" | "jpeg" => Ok(ExportFormat::Jpg),
            "svg" => Ok(ExportFormat::Svg),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(format!(
                "Invalid export format: {s}. Valid options: png, jpg, svg, pdf"
            )),
        }
    }
}
