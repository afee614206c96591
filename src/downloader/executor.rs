//! Download execution.
//!
//! A [`Downloader`] performs single transfers, classifies the response, writes
//! the body atomically and runs the task's post-processing on the blocking
//! pool. It never retries: an expired URL is reported and left for the next
//! run, which requests a fresh one.

use futures::stream::{self, StreamExt};
use std::io;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

use super::task::{DownloadOutcome, DownloadTask};
use super::transfer::{extension_for_content_type, Transfer};
use crate::atomic::write_atomic;
use crate::fetcher::retry::{classify_status, RetryErrorType};
use crate::metrics::{record_bytes_saved, record_download};
use crate::optimize::{OptimizeError, OptimizeOutcome};
use crate::report::{ArchiveStats, FailureKind, FailureLog};
use crate::shutdown::{is_requested, SharedShutdown};

/// Executes download tasks
pub struct Downloader {
    transfer: Arc<dyn Transfer>,
    failures: Arc<FailureLog>,
    stats: Arc<ArchiveStats>,
    shutdown: Option<SharedShutdown>,
}

impl Downloader {
    /// Create a downloader reporting into `failures` and `stats`
    pub fn new(
        transfer: Arc<dyn Transfer>,
        failures: Arc<FailureLog>,
        stats: Arc<ArchiveStats>,
    ) -> Self {
        Self {
            transfer,
            failures,
            stats,
            shutdown: None,
        }
    }

    /// Skip tasks that start after shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Download one asset.
    pub async fn download(&self, task: DownloadTask) -> DownloadOutcome {
        if is_requested(self.shutdown.as_ref()) {
            record_download("abandoned");
            return DownloadOutcome::Abandoned;
        }

        let span = info_span!("download", file_key = %task.file_key, destination = %task.destination.display());
        let outcome = self.execute(task).instrument(span).await;
        record_download(outcome.label());
        outcome
    }

    async fn execute(&self, task: DownloadTask) -> DownloadOutcome {
        let response = match self.transfer.get(&task.url).await {
            Ok(response) => response,
            Err(e) => return self.fail(&task, e.to_string()),
        };

        if let Some(kind) = classify_status(response.status) {
            if kind == RetryErrorType::Expired {
                self.failures.record(
                    &task.file_key,
                    FailureKind::AssetExpired,
                    Some(task.url.as_str()),
                    format!(
                        "HTTP 403 for {}; rerun to request a fresh URL",
                        task.destination.display()
                    ),
                );
                self.stats.add_downloads_expired(1);
                return DownloadOutcome::Expired;
            }
            return self.fail(
                &task,
                format!("HTTP {}: {}", response.status, kind.description()),
            );
        }

        if response.body.is_empty() {
            return self.fail(&task, "empty response body".to_string());
        }

        let path = if task.infer_extension {
            task.destination
                .with_extension(extension_for_content_type(response.content_type.as_deref()))
        } else {
            task.destination.clone()
        };

        let bytes = response.body.len() as u64;
        let body = response.body;
        let post_process = task.post_process.clone();
        let write_path = path.clone();

        let written = tokio::task::spawn_blocking(
            move || -> io::Result<Option<Result<OptimizeOutcome, OptimizeError>>> {
                write_atomic(&write_path, &body)?;
                Ok(post_process.map(|p| p.process(&write_path)))
            },
        )
        .await;

        let post_result = match written {
            Ok(Ok(post_result)) => post_result,
            Ok(Err(e)) => return self.fail(&task, format!("write failed: {e}")),
            Err(e) => return self.fail(&task, format!("write task failed: {e}")),
        };

        let saved = match post_result {
            None => 0,
            Some(Ok(outcome)) => outcome.bytes_saved(),
            Some(Err(e)) => {
                self.failures.record(
                    &task.file_key,
                    FailureKind::OptimizeFailed,
                    Some(path.to_string_lossy().as_ref()),
                    e,
                );
                0
            }
        };

        self.stats.add_downloads_completed(1);
        self.stats.add_bytes_downloaded(bytes);
        self.stats.add_bytes_saved(saved);
        record_bytes_saved(saved);
        debug!(path = %path.display(), bytes, saved, "Download completed");

        DownloadOutcome::Completed { path, bytes, saved }
    }

    fn fail(&self, task: &DownloadTask, message: String) -> DownloadOutcome {
        warn!(url = %task.url, %message, "Download failed");
        self.failures.record(
            &task.file_key,
            FailureKind::DownloadFailed,
            Some(task.url.as_str()),
            &message,
        );
        self.stats.add_downloads_failed(1);
        DownloadOutcome::Failed(message)
    }

    /// Download `tasks` with at most `pool_size` transfers in flight
    pub async fn download_all(&self, tasks: Vec<DownloadTask>, pool_size: usize) -> Vec<DownloadOutcome> {
        stream::iter(tasks)
            .map(|task| self.download(task))
            .buffer_unordered(pool_size.max(1))
            .collect()
            .await
    }

    /// Run one batch as independent tasks and wait for all of them
    pub async fn run_batch(self: &Arc<Self>, batch: Vec<DownloadTask>) -> Vec<DownloadOutcome> {
        let mut set = JoinSet::new();
        for task in batch {
            let downloader = Arc::clone(self);
            set.spawn(async move { downloader.download(task).await });
        }

        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "Download task panicked");
                    self.stats.add_downloads_failed(1);
                    outcomes.push(DownloadOutcome::Failed(format!("task failed: {e}")));
                }
            }
        }
        outcomes
    }
}
