//! Download task specifications.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::optimize::{OptimizeError, OptimizeOutcome};

/// Work run on a file after it has been written.
///
/// Runs on the blocking pool.
pub trait PostProcess: Send + Sync {
    /// Process the file at `path` in place
    fn process(&self, path: &Path) -> Result<OptimizeOutcome, OptimizeError>;
}

/// One asset to fetch
#[derive(Clone)]
pub struct DownloadTask {
    /// Document the asset belongs to
    pub file_key: String,
    /// Signed source URL
    pub url: String,
    /// Target path; the extension is replaced when inferring from content type
    pub destination: PathBuf,
    /// Pick the extension from the response content type
    pub infer_extension: bool,
    /// Optional in-place processing after the write
    pub post_process: Option<Arc<dyn PostProcess>>,
}

impl DownloadTask {
    /// Create a task writing `url` to `destination` as-is
    pub fn new(
        file_key: impl Into<String>,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_key: file_key.into(),
            url: url.into(),
            destination: destination.into(),
            infer_extension: false,
            post_process: None,
        }
    }

    /// Choose the file extension from the response content type
    pub fn with_inferred_extension(mut self) -> Self {
        self.infer_extension = true;
        self
    }

    /// Run `post_process` after the file is written
    pub fn with_post_process(mut self, post_process: Arc<dyn PostProcess>) -> Self {
        self.post_process = Some(post_process);
        self
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("file_key", &self.file_key)
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("infer_extension", &self.infer_extension)
            .field("post_process", &self.post_process.is_some())
            .finish()
    }
}

/// Result of one task
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// File written
    Completed {
        /// Final path
        path: PathBuf,
        /// Bytes downloaded
        bytes: u64,
        /// Bytes removed by post-processing
        saved: u64,
    },
    /// URL rejected with 403; nothing written
    Expired,
    /// Transfer failed; nothing written
    Failed(String),
    /// Skipped because shutdown was requested
    Abandoned,
}

impl DownloadOutcome {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            DownloadOutcome::Completed { .. } => "completed",
            DownloadOutcome::Expired => "expired",
            DownloadOutcome::Failed(_) => "failed",
            DownloadOutcome::Abandoned => "abandoned",
        }
    }

    /// Whether the asset landed on disk
    pub fn is_completed(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }
}
