//! Shared download queue.
//!
//! Workers enqueue render downloads without waiting on them. A single
//! consumer task drains the channel in bounded batches: it waits for one
//! task, greedily takes whatever else is already queued up to the batch size,
//! runs the batch to completion and repeats. The queue ends when every
//! handle is dropped and the channel is drained, or when no task arrives
//! within the idle timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{DEFAULT_BATCH_SIZE, DEFAULT_IDLE_TIMEOUT};
use super::executor::Downloader;
use super::task::{DownloadOutcome, DownloadTask};
use super::DownloadError;

/// Consumer tuning
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Maximum downloads run together
    pub batch_size: usize,
    /// Exit when nothing arrives for this long
    pub idle_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// What the consumer did over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Batches run
    pub batches: usize,
    /// Largest batch run
    pub largest_batch: usize,
    /// Downloads written
    pub completed: usize,
    /// Downloads whose URL had expired
    pub expired: usize,
    /// Downloads that failed
    pub failed: usize,
    /// Downloads skipped on shutdown
    pub abandoned: usize,
    /// Consumer stopped because of the idle timeout
    pub idle_exit: bool,
}

impl QueueReport {
    fn record(&mut self, outcomes: &[DownloadOutcome]) {
        self.batches += 1;
        self.largest_batch = self.largest_batch.max(outcomes.len());
        for outcome in outcomes {
            match outcome {
                DownloadOutcome::Completed { .. } => self.completed += 1,
                DownloadOutcome::Expired => self.expired += 1,
                DownloadOutcome::Failed(_) => self.failed += 1,
                DownloadOutcome::Abandoned => self.abandoned += 1,
            }
        }
    }
}

/// Producer side of the queue
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: mpsc::UnboundedSender<DownloadTask>,
}

impl QueueHandle {
    /// Enqueue a task; fails once the consumer has exited
    pub fn enqueue(&self, task: DownloadTask) -> Result<(), DownloadError> {
        self.sender
            .send(task)
            .map_err(|rejected| DownloadError::QueueClosed(rejected.0.url))
    }

    /// Whether the consumer has exited
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Owner of the consumer task
pub struct DownloadQueue {
    handle: QueueHandle,
    consumer: JoinHandle<QueueReport>,
}

impl DownloadQueue {
    /// Start the consumer on the current runtime
    pub fn spawn(downloader: Arc<Downloader>, options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume(downloader, receiver, options));
        Self {
            handle: QueueHandle { sender },
            consumer,
        }
    }

    /// A new producer handle
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Drop this owner's handle and wait for the consumer to drain.
    ///
    /// Returns once every other handle has been dropped too.
    pub async fn close(self) -> Result<QueueReport, DownloadError> {
        drop(self.handle);
        self.consumer
            .await
            .map_err(|e| DownloadError::TaskFailed(e.to_string()))
    }
}

async fn consume(
    downloader: Arc<Downloader>,
    mut receiver: mpsc::UnboundedReceiver<DownloadTask>,
    options: QueueOptions,
) -> QueueReport {
    let batch_size = options.batch_size.max(1);
    let mut report = QueueReport::default();

    loop {
        let first = match tokio::time::timeout(options.idle_timeout, receiver.recv()).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(_) => {
                warn!(
                    idle_secs = options.idle_timeout.as_secs(),
                    "Download queue idle, stopping consumer"
                );
                report.idle_exit = true;
                break;
            }
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match receiver.try_recv() {
                Ok(task) => batch.push(task),
                Err(_) => break,
            }
        }

        debug!(size = batch.len(), "Running download batch");
        let outcomes = downloader.run_batch(batch).await;
        report.record(&outcomes);
    }

    info!(
        batches = report.batches,
        completed = report.completed,
        expired = report.expired,
        failed = report.failed,
        "Download queue drained"
    );
    report
}
