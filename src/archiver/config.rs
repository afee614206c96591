//! Run configuration and credentials.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::layout::{DEFAULT_SOURCE_PATTERN, KEY_PLACEHOLDER};
use super::ArchiveError;
use crate::document::IndexOptions;
use crate::downloader::config::DEFAULT_WORKERS;
use crate::downloader::QueueOptions;
use crate::fetcher::{BatchOptions, RenderParams};
use crate::fills::DEFAULT_DENSITY;
use crate::report::FAILURE_LOG_FILE;

/// Smallest render scale the API accepts
pub const MIN_SCALE: f64 = 0.01;
/// Largest render scale the API accepts
pub const MAX_SCALE: f64 = 4.0;

/// What a run does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Download missing assets, then rebuild manifests
    #[default]
    Archive,
    /// Report what would be downloaded; write nothing
    DryRun,
    /// Rebuild manifests from disk only
    SyncOnly,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Archive => "archive",
            RunMode::DryRun => "dry-run",
            RunMode::SyncOnly => "sync-only",
        };
        f.write_str(s)
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(RunMode::Archive),
            "dry-run" => Ok(RunMode::DryRun),
            "sync-only" | "sync" => Ok(RunMode::SyncOnly),
            _ => Err(format!(
                "Invalid run mode: {s}. Valid options: archive, dry-run, sync-only"
            )),
        }
    }
}

/// Access tokens, assigned to workers round-robin
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    tokens: Vec<String>,
}

impl Credentials {
    /// Parse a single token, a comma-separated list or a JSON array of tokens
    pub fn parse(raw: &str) -> Result<Self, ArchiveError> {
        let raw = raw.trim();
        let tokens: Vec<String> = if raw.starts_with('[') {
            serde_json::from_str::<Vec<String>>(raw)
                .map_err(|e| ArchiveError::InvalidConfig(format!("token list is not a JSON array of strings: {e}")))?
        } else {
            raw.split(',').map(str::to_string).collect()
        };

        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(ArchiveError::MissingCredentials);
        }
        Ok(Self { tokens })
    }

    /// Token for worker `index`
    pub fn token_for(&self, index: usize) -> Option<&str> {
        if self.tokens.is_empty() {
            None
        } else {
            Some(&self.tokens[index % self.tokens.len()])
        }
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is configured
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({} tokens)", self.tokens.len())
    }
}

/// Everything a run needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveConfig {
    /// Directory of cached documents
    pub source_dir: PathBuf,
    /// Archive root
    pub output_dir: PathBuf,
    /// Cached document file name with `{key}`
    pub source_pattern: String,
    /// Render scale and format
    pub render: RenderParams,
    /// Which nodes to render
    pub index: IndexOptions,
    /// Documents processed concurrently
    pub workers: usize,
    /// Render request chunking and retries
    pub fetch: BatchOptions,
    /// Download queue batching
    pub queue: QueueOptions,
    /// Byte budget for optimized images
    pub max_bytes: Option<u64>,
    /// Render density for FIT and FILL fills
    pub density: f64,
    /// Run mode
    pub mode: RunMode,
    /// Skip image fills
    pub skip_fills: bool,
    /// Skip node renders
    pub skip_exports: bool,
    /// Skip thumbnails
    pub skip_thumbnail: bool,
    /// Failure log path
    pub error_log: PathBuf,
    /// Restrict the run to these document keys
    pub only_keys: Option<BTreeSet<String>>,
}

impl ArchiveConfig {
    /// Defaults for reading from `source_dir` and writing to `output_dir`
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            source_dir: source_dir.into(),
            error_log: output_dir.join(FAILURE_LOG_FILE),
            output_dir,
            source_pattern: DEFAULT_SOURCE_PATTERN.to_string(),
            render: RenderParams::default(),
            index: IndexOptions::default(),
            workers: DEFAULT_WORKERS,
            fetch: BatchOptions::default(),
            queue: QueueOptions::default(),
            max_bytes: None,
            density: DEFAULT_DENSITY,
            mode: RunMode::Archive,
            skip_fills: false,
            skip_exports: false,
            skip_thumbnail: false,
            only_keys: None,
        }
    }

    /// Whether anything may be written besides manifests
    pub fn downloads_enabled(&self) -> bool {
        self.mode == RunMode::Archive
    }

    /// Whether `file_key` is part of this run
    pub fn includes(&self, file_key: &str) -> bool {
        self.only_keys
            .as_ref()
            .map_or(true, |keys| keys.contains(file_key))
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<(), ArchiveError> {
        fn invalid(message: String) -> Result<(), ArchiveError> {
            Err(ArchiveError::InvalidConfig(message))
        }

        if !is_dir(&self.source_dir) {
            return invalid(format!(
                "source directory {} does not exist",
                self.source_dir.display()
            ));
        }
        if !self.source_pattern.contains(KEY_PLACEHOLDER) {
            return invalid(format!(
                "source pattern '{}' must contain {KEY_PLACEHOLDER}",
                self.source_pattern
            ));
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if self.fetch.concurrency == 0 {
            return invalid("fetch concurrency must be at least 1".to_string());
        }
        if self.fetch.retry_multiplier == 0 {
            return invalid("retry multiplier must be at least 1".to_string());
        }
        if self.queue.batch_size == 0 {
            return invalid("batch size must be at least 1".to_string());
        }
        if !(MIN_SCALE..=MAX_SCALE).contains(&self.render.scale) {
            return invalid(format!(
                "scale {} outside {MIN_SCALE}..={MAX_SCALE}",
                self.render.scale
            ));
        }
        if !self.density.is_finite() || self.density <= 0.0 {
            return invalid(format!("density {} must be positive", self.density));
        }
        Ok(())
    }
}

fn is_dir(path: &Path) -> bool {
    path.is_dir()
}
