//! Durable failure log.
//!
//! Every item the run gives up on is appended as one JSON line to
//! `errors.jsonl` in the output directory and mirrored to tracing. The log is
//! append-only across runs and can drive a follow-up run restricted to the
//! documents that failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{error, warn};

/// File name of the failure log inside the output directory
pub const FAILURE_LOG_FILE: &str = "errors.jsonl";

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Chunk dropped after the retry budget was spent on 429s
    RateLimitExhausted,
    /// Chunk dropped after the retry budget was spent on server or network errors
    UpstreamUnavailable,
    /// Signed URL rejected with 403
    AssetExpired,
    /// Transfer failed or returned an unexpected status
    DownloadFailed,
    /// Document could not be parsed or mapped
    MalformedDocument,
    /// Upstream returned a null URL for a node
    RenderFailed,
    /// Fill hashes still missing after download
    IncompleteFills,
    /// Optimizer failed on a downloaded image
    OptimizeFailed,
    /// Download enqueued after the queue was closed
    QueueClosed,
    /// Node id too long for any request URL
    OversizedId,
    /// Upstream rejected a request
    RequestRejected,
    /// Document processing stopped on an unexpected error
    DocumentFailed,
}

impl FailureKind {
    /// Snake-case name as written to the log
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimitExhausted => "rate_limit_exhausted",
            FailureKind::UpstreamUnavailable => "upstream_unavailable",
            FailureKind::AssetExpired => "asset_expired",
            FailureKind::DownloadFailed => "download_failed",
            FailureKind::MalformedDocument => "malformed_document",
            FailureKind::RenderFailed => "render_failed",
            FailureKind::IncompleteFills => "incomplete_fills",
            FailureKind::OptimizeFailed => "optimize_failed",
            FailureKind::QueueClosed => "queue_closed",
            FailureKind::OversizedId => "oversized_id",
            FailureKind::RequestRejected => "request_rejected",
            FailureKind::DocumentFailed => "document_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the failure log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Document key
    pub file_key: String,
    /// Failure category
    pub kind: FailureKind,
    /// Node id, image hash or URL concerned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Human-readable detail
    pub message: String,
}

/// Append-only failure log shared by all workers
#[derive(Debug)]
pub struct FailureLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    count: AtomicU64,
}

impl FailureLog {
    /// Open (or create) the log at `path` for appending
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Mutex::new(Some(file)),
            count: AtomicU64::new(0),
        })
    }

    /// A log that only reports through tracing
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
            count: AtomicU64::new(0),
        }
    }

    /// Location of the log, if it is backed by a file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Failures recorded by this process
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Record a failure.
    ///
    /// Write errors are reported through tracing and otherwise ignored.
    pub fn record(
        &self,
        file_key: &str,
        kind: FailureKind,
        target: Option<&str>,
        message: impl fmt::Display,
    ) {
        let entry = FailureEntry {
            timestamp: Utc::now(),
            file_key: file_key.to_string(),
            kind,
            target: target.map(str::to_string),
            message: message.to_string(),
        };

        error!(
            file_key = %entry.file_key,
            kind = %entry.kind,
            target = entry.target.as_deref().unwrap_or(""),
            "{}",
            entry.message
        );
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(file) = guard.as_mut() else {
            return;
        };

        let written = serde_json::to_string(&entry)
            .map_err(io::Error::other)
            .and_then(|line| {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                file.flush()
            });
        if let Err(e) = written {
            warn!(error = %e, "Failed to append to failure log");
        }
    }

    /// Read every well-formed entry from a log file; malformed lines are skipped
    pub fn read_entries(path: &Path) -> io::Result<Vec<FailureEntry>> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed failure log line"),
            }
        }
        Ok(entries)
    }

    /// Document keys with at least one recorded failure
    pub fn failed_file_keys(path: &Path) -> io::Result<BTreeSet<String>> {
        Ok(Self::read_entries(path)?
            .into_iter()
            .map(|entry| entry.file_key)
            .collect())
    }
}
