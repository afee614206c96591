//! Run orchestration.
//!
//! The [`Archiver`] discovers cached documents, partitions them round-robin
//! across [`FileWorker`]s (one per access token slot), shares a single
//! download queue between them, and once every worker and the queue have
//! finished rebuilds the manifests of every document from disk.
//!
//! Shutdown is cooperative: workers stop taking new documents, in-flight
//! requests are abandoned at their next wait, the queue drains, and manifest
//! synchronization is skipped so the next run rebuilds them.

pub mod config;
pub mod layout;
pub mod worker;

use indicatif::ProgressBar;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::document::{DesignDocument, DocumentError};
use crate::downloader::{DownloadError, DownloadQueue, Downloader, Transfer};
use crate::fetcher::{BatchFetcher, FetcherError, ImageApi};
use crate::fills::FillError;
use crate::manifest::{ManifestError, ManifestSynchronizer};
use crate::report::{ArchiveStats, ArchiveSummary, FailureKind, FailureLog};
use crate::shutdown::SharedShutdown;

pub use config::{ArchiveConfig, Credentials, RunMode};
pub use layout::{discover_documents, DocumentLayout, DocumentSource};
pub use worker::{DocumentReport, FileWorker};

/// Errors that stop a document or a run
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Settings the pipeline cannot honor
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No access token supplied
    #[error("No access token configured")]
    MissingCredentials,

    /// Filesystem failure
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Document could not be read
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// Fill usages could not be mapped
    #[error(transparent)]
    Fill(#[from] FillError),

    /// Image API failure
    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// Download machinery failure
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Manifest failure
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Background task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl ArchiveError {
    /// Failure log category for a document abandoned with this error
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ArchiveError::Document(_) | ArchiveError::Fill(_) => FailureKind::MalformedDocument,
            ArchiveError::Manifest(ManifestError::Document(_)) => FailureKind::MalformedDocument,
            ArchiveError::Fetcher(_) => FailureKind::RequestRejected,
            _ => FailureKind::DocumentFailed,
        }
    }
}

/// Split `items` round-robin into `buckets` non-empty lists
pub fn partition<T>(items: Vec<T>, buckets: usize) -> Vec<Vec<T>> {
    let buckets = buckets.max(1).min(items.len());
    let mut parts: Vec<Vec<T>> = (0..buckets).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        parts[i % buckets].push(item);
    }
    parts
}

/// Drives a whole run
pub struct Archiver {
    config: Arc<ArchiveConfig>,
    credentials: Credentials,
    api: Arc<dyn ImageApi>,
    transfer: Arc<dyn Transfer>,
    failures: Arc<FailureLog>,
    stats: Arc<ArchiveStats>,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl Archiver {
    /// Assemble an archiver from its collaborators
    pub fn new(
        config: ArchiveConfig,
        credentials: Credentials,
        api: Arc<dyn ImageApi>,
        transfer: Arc<dyn Transfer>,
        failures: Arc<FailureLog>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            config: Arc::new(config),
            credentials,
            api,
            transfer,
            failures,
            stats: Arc::new(ArchiveStats::new()),
            shutdown,
            progress: None,
        }
    }

    /// Report per-document progress on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Counters for this run
    pub fn stats(&self) -> Arc<ArchiveStats> {
        Arc::clone(&self.stats)
    }

    /// Run configuration
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Cached documents selected for this run
    pub fn discover(&self) -> Result<Vec<DocumentSource>, ArchiveError> {
        let mut documents =
            discover_documents(&self.config.source_dir, &self.config.source_pattern)?;
        documents.retain(|source| self.config.includes(&source.file_key));
        Ok(documents)
    }

    /// Archive every selected document and rebuild manifests
    pub async fn run(&self) -> Result<ArchiveSummary, ArchiveError> {
        self.config.validate()?;
        if self.config.mode == RunMode::Archive && self.credentials.is_empty() {
            return Err(ArchiveError::MissingCredentials);
        }

        let documents = self.discover()?;
        info!(
            documents = documents.len(),
            mode = %self.config.mode,
            source = %self.config.source_dir.display(),
            output = %self.config.output_dir.display(),
            "Starting run"
        );
        if let Some(progress) = &self.progress {
            progress.set_length(documents.len() as u64);
        }

        if self.config.mode != RunMode::SyncOnly {
            self.archive(documents.clone()).await?;
        }

        match self.config.mode {
            RunMode::DryRun => info!("Dry run; manifests left untouched"),
            _ if self.shutdown.is_shutdown_requested() => {
                warn!("Shutdown requested; skipping manifest synchronization")
            }
            _ => self.synchronize(documents).await?,
        }

        let summary = self.stats.summary();
        info!(
            archived = summary.documents_archived,
            failed = summary.documents_failed,
            skipped = summary.documents_skipped,
            downloads = summary.downloads_completed,
            failures = self.failures.count(),
            "Run finished"
        );
        Ok(summary)
    }

    async fn archive(&self, documents: Vec<DocumentSource>) -> Result<(), ArchiveError> {
        if documents.is_empty() {
            return Ok(());
        }

        let downloader = Arc::new(
            Downloader::new(
                Arc::clone(&self.transfer),
                Arc::clone(&self.failures),
                Arc::clone(&self.stats),
            )
            .with_shutdown(self.shutdown.clone()),
        );
        let queue = DownloadQueue::spawn(Arc::clone(&downloader), self.config.queue.clone());

        let mut workers = JoinSet::new();
        for (id, share) in partition(documents, self.config.workers).into_iter().enumerate() {
            let token = self.credentials.token_for(id).unwrap_or_default();
            let fetcher = BatchFetcher::new(Arc::clone(&self.api), token, self.config.fetch.clone())
                .with_shutdown(self.shutdown.clone());
            let mut worker = FileWorker::new(
                id,
                Arc::clone(&self.config),
                fetcher,
                Arc::clone(&downloader),
                queue.handle(),
                Arc::clone(&self.failures),
                Arc::clone(&self.stats),
                self.shutdown.clone(),
            );
            if let Some(progress) = &self.progress {
                worker = worker.with_progress(progress.clone());
            }
            workers.spawn(worker.run(share));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        let report = queue.close().await?;
        info!(
            batches = report.batches,
            largest_batch = report.largest_batch,
            completed = report.completed,
            expired = report.expired,
            failed = report.failed,
            abandoned = report.abandoned,
            idle_exit = report.idle_exit,
            "Download queue drained"
        );
        Ok(())
    }

    async fn synchronize(&self, documents: Vec<DocumentSource>) -> Result<(), ArchiveError> {
        let config = Arc::clone(&self.config);
        let failures = Arc::clone(&self.failures);
        let stats = Arc::clone(&self.stats);

        tokio::task::spawn_blocking(move || {
            let synchronizer = ManifestSynchronizer::new(config.index.include_canvas);
            for source in documents {
                let layout = DocumentLayout::new(&config.output_dir, &source.file_key);
                if !layout.root().is_dir() {
                    continue;
                }
                let synced = DesignDocument::load(&source.path)
                    .map_err(ManifestError::from)
                    .and_then(|document| synchronizer.sync(&document, &layout));
                match synced {
                    Ok(report) => stats.add_manifests_written(report.written()),
                    Err(e) => {
                        let e = ArchiveError::from(e);
                        failures.record(&source.file_key, e.failure_kind(), None, &e);
                    }
                }
            }
        })
        .await
        .map_err(|e| ArchiveError::TaskFailed(e.to_string()))
    }
}
