//! Per-document archiving.
//!
//! A [`FileWorker`] owns one access token and processes its share of the
//! documents sequentially: thumbnail, then image fills, then node renders.
//! Fills are downloaded before the worker moves on, since their completeness
//! is checked right away. Render downloads are handed to the shared download
//! queue so the next document's API calls overlap them.

use indicatif::ProgressBar;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::ArchiveConfig;
use super::layout::{
    export_file_name, fills_on_disk, list_file_names, DocumentLayout, DocumentSource,
};
use super::ArchiveError;
use crate::document::{index_nodes, DesignDocument, NodeIndex};
use crate::downloader::{DownloadTask, Downloader, QueueHandle};
use crate::fetcher::http::format_scale;
use crate::fetcher::{BatchFetcher, DropReason, FetchOutcome, RetryErrorType};
use crate::fills::PaintUsageMapper;
use crate::metrics::record_document;
use crate::optimize::{BudgetPostProcess, FillPostProcess, ImageOptimizer, OptimizeBudget};
use crate::report::{ArchiveStats, FailureKind, FailureLog};
use crate::shutdown::SharedShutdown;
use crate::ExportFormat;

/// What one document needed and got
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentReport {
    /// Document key
    pub file_key: String,
    /// Thumbnail downloaded in this run
    pub thumbnail: bool,
    /// Fills that were missing at the start
    pub fills_needed: usize,
    /// Fills still missing at the end
    pub fills_missing: usize,
    /// Renders that were missing at the start
    pub exports_pending: usize,
    /// Render downloads handed to the queue
    pub exports_enqueued: usize,
}

/// Processes a share of the documents with one token
pub struct FileWorker {
    id: usize,
    config: Arc<ArchiveConfig>,
    fetcher: BatchFetcher,
    downloader: Arc<Downloader>,
    queue: QueueHandle,
    failures: Arc<FailureLog>,
    stats: Arc<ArchiveStats>,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl FileWorker {
    /// Create worker `id`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        config: Arc<ArchiveConfig>,
        fetcher: BatchFetcher,
        downloader: Arc<Downloader>,
        queue: QueueHandle,
        failures: Arc<FailureLog>,
        stats: Arc<ArchiveStats>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            id,
            config,
            fetcher,
            downloader,
            queue,
            failures,
            stats,
            shutdown,
            progress: None,
        }
    }

    /// Advance `progress` once per document
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process `documents` in order, stopping early on shutdown
    pub async fn run(self, documents: Vec<DocumentSource>) -> Vec<DocumentReport> {
        let mut reports = Vec::with_capacity(documents.len());
        let total = documents.len();

        for source in documents {
            if self.shutdown.is_shutdown_requested() {
                self.stats.add_documents_skipped(1);
                record_document("skipped");
                continue;
            }

            match self.process(&source).await {
                Ok(report) => {
                    self.stats.add_documents_archived(1);
                    record_document("archived");
                    reports.push(report);
                }
                Err(e) => {
                    self.failures
                        .record(&source.file_key, e.failure_kind(), None, &e);
                    self.stats.add_documents_failed(1);
                    record_document("failed");
                }
            }

            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        debug!(worker = self.id, total, processed = reports.len(), "Worker finished");
        reports
    }

    /// Archive one document
    pub async fn process(&self, source: &DocumentSource) -> Result<DocumentReport, ArchiveError> {
        let span = info_span!("archive_document", file_key = %source.file_key, worker = self.id);
        self.process_inner(source).instrument(span).await
    }

    async fn process_inner(&self, source: &DocumentSource) -> Result<DocumentReport, ArchiveError> {
        let path = source.path.clone();
        let document = tokio::task::spawn_blocking(move || DesignDocument::load(&path))
            .await
            .map_err(|e| ArchiveError::TaskFailed(e.to_string()))??;

        let key = source.file_key.as_str();
        let layout = DocumentLayout::new(&self.config.output_dir, key);
        if self.config.downloads_enabled() {
            layout.ensure_dirs()?;
        }

        let mut report = DocumentReport {
            file_key: key.to_string(),
            ..Default::default()
        };

        if !self.config.skip_thumbnail {
            report.thumbnail = self.archive_thumbnail(key, &document, &layout).await;
        }
        if !self.config.skip_fills {
            self.archive_fills(key, &document, &layout, &mut report).await?;
        }
        if !self.config.skip_exports {
            self.archive_exports(key, &document, &layout, &mut report).await?;
        }

        info!(
            fills_needed = report.fills_needed,
            fills_missing = report.fills_missing,
            exports_pending = report.exports_pending,
            exports_enqueued = report.exports_enqueued,
            "Document processed"
        );
        Ok(report)
    }

    async fn archive_thumbnail(&self, key: &str, document: &DesignDocument, layout: &DocumentLayout) -> bool {
        let Some(url) = document.thumbnail_url.as_deref() else {
            return false;
        };
        let path = layout.thumbnail_path();
        if path.is_file() {
            return false;
        }
        if !self.config.downloads_enabled() {
            info!(path = %path.display(), "Would download thumbnail");
            return false;
        }
        self.downloader
            .download(DownloadTask::new(key, url, path))
            .await
            .is_completed()
    }

    async fn archive_fills(
        &self,
        key: &str,
        document: &DesignDocument,
        layout: &DocumentLayout,
        report: &mut DocumentReport,
    ) -> Result<(), ArchiveError> {
        let usage = PaintUsageMapper::new(self.config.density).map(&document.document)?;
        if usage.is_empty() {
            return Ok(());
        }

        let images_dir = layout.images_dir();
        let on_disk = fills_on_disk(&images_dir)?;
        let needed: Vec<&String> = usage.hashes().filter(|h| !on_disk.contains_key(*h)).collect();
        report.fills_needed = needed.len();
        if needed.is_empty() {
            debug!(fills = usage.len(), "All image fills present");
            return Ok(());
        }
        if !self.config.downloads_enabled() {
            info!(missing = needed.len(), fills = usage.len(), "Would download image fills");
            report.fills_missing = needed.len();
            return Ok(());
        }

        let outcome = self.fetcher.fetch_fills(key).await;
        self.record_fetch_failures(key, &outcome);

        let mut tasks = Vec::with_capacity(needed.len());
        for hash in needed {
            let (Some(url), Some(record)) = (outcome.urls.get(hash), usage.get(hash)) else {
                continue;
            };
            let post = FillPostProcess::new(
                ImageOptimizer::new(),
                record.clone(),
                self.config.density,
                self.config.max_bytes,
            );
            tasks.push(
                DownloadTask::new(key, url.as_str(), layout.fill_path(hash))
                    .with_inferred_extension()
                    .with_post_process(post),
            );
        }
        self.downloader
            .download_all(tasks, self.config.queue.batch_size)
            .await;

        let after = fills_on_disk(&images_dir)?;
        let missing: Vec<&str> = usage
            .hashes()
            .filter(|h| !after.contains_key(*h))
            .map(String::as_str)
            .collect();
        report.fills_missing = missing.len();
        if !missing.is_empty() {
            self.failures.record(
                key,
                FailureKind::IncompleteFills,
                None,
                format!(
                    "{} of {} image fills missing after download: {}",
                    missing.len(),
                    usage.len(),
                    missing.join(", ")
                ),
            );
        }
        Ok(())
    }

    async fn archive_exports(
        &self,
        key: &str,
        document: &DesignDocument,
        layout: &DocumentLayout,
        report: &mut DocumentReport,
    ) -> Result<(), ArchiveError> {
        let render = self.config.render;
        let index = index_nodes(&document.document, &self.config.index);
        let existing = list_file_names(&layout.exports_dir())?;
        let pending = pending_exports(&index, &existing, render.scale, render.format);
        report.exports_pending = pending.len();

        if pending.is_empty() {
            debug!(nodes = index.len(), "All renders present");
            return Ok(());
        }
        if !self.config.downloads_enabled() {
            info!(pending = pending.len(), nodes = index.len(), "Would render nodes");
            return Ok(());
        }

        let outcome = self.fetcher.fetch_renders(key, &pending, &render).await?;
        self.stats.add_renders_requested(pending.len() as u64);
        self.record_fetch_failures(key, &outcome);
        for id in &outcome.unrendered {
            self.failures.record(
                key,
                FailureKind::RenderFailed,
                Some(id.as_str()),
                "upstream returned no image for node",
            );
        }

        let post = match self.config.max_bytes {
            Some(max_bytes) if render.format.is_raster() => Some(BudgetPostProcess::new(
                ImageOptimizer::new(),
                OptimizeBudget {
                    max_bytes: Some(max_bytes),
                    ..Default::default()
                },
            )),
            _ => None,
        };

        let requested: BTreeSet<&str> = pending.iter().map(String::as_str).collect();
        for (id, url) in outcome.urls {
            if !requested.contains(id.as_str()) {
                warn!(node_id = %id, "Ignoring URL for a node that was not requested");
                continue;
            }
            let mut task = DownloadTask::new(
                key,
                url,
                layout.export_path(&id, render.scale, render.format.as_str()),
            );
            if let Some(post) = &post {
                task = task.with_post_process(post.clone());
            }
            match self.queue.enqueue(task) {
                Ok(()) => {
                    report.exports_enqueued += 1;
                    self.stats.add_exports_enqueued(1);
                }
                Err(e) => self
                    .failures
                    .record(key, FailureKind::QueueClosed, Some(id.as_str()), e),
            }
        }
        Ok(())
    }

    fn record_fetch_failures(&self, key: &str, outcome: &FetchOutcome) {
        let dropped: usize = outcome
            .dropped
            .iter()
            .filter(|chunk| chunk.reason != DropReason::Cancelled)
            .map(|chunk| chunk.ids.len())
            .sum();
        self.stats
            .add_ids_dropped((outcome.oversized.len() + dropped) as u64);

        for id in &outcome.oversized {
            self.failures.record(
                key,
                FailureKind::OversizedId,
                Some(id.as_str()),
                "node id alone exceeds the request URL budget",
            );
        }

        for chunk in &outcome.dropped {
            let target = chunk.ids.first().map(|first| {
                if chunk.ids.len() == 1 {
                    first.clone()
                } else {
                    format!("{first} (+{} more)", chunk.ids.len() - 1)
                }
            });
            match &chunk.reason {
                DropReason::RetriesExhausted { attempts, cause } => {
                    let kind = match cause {
                        RetryErrorType::RateLimit => FailureKind::RateLimitExhausted,
                        _ => FailureKind::UpstreamUnavailable,
                    };
                    self.failures.record(
                        key,
                        kind,
                        target.as_deref(),
                        format!(
                            "gave up after {attempts} attempts, last: {}; rerun to retry",
                            cause.description()
                        ),
                    )
                }
                DropReason::Rejected(reason) => self.failures.record(
                    key,
                    FailureKind::RequestRejected,
                    target.as_deref(),
                    reason,
                ),
                DropReason::Cancelled => {
                    debug!(ids = chunk.ids.len(), "Request cancelled by shutdown")
                }
            }
        }
    }
}

/// Indexed ids without a render file for `scale` and `format`.
///
/// At scale 1 both `{id}.{fmt}` and `{id}@1x.{fmt}` count as present.
pub fn pending_exports(
    index: &NodeIndex,
    existing: &BTreeSet<String>,
    scale: f64,
    format: ExportFormat,
) -> Vec<String> {
    let format = format.as_str();
    index
        .ids
        .iter()
        .filter(|id| {
            let primary = export_file_name(id, scale, format);
            let suffixed = format!("{id}@{}x.{format}", format_scale(scale));
            !existing.contains(&primary) && !existing.contains(&suffixed)
        })
        .cloned()
        .collect()
}
