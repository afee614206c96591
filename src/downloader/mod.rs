//! Asset downloads.
//!
//! Signed asset URLs go through the same path whether they come from the
//! fills listing or from node renders:
//!
//! 1. **Task**: describe what to fetch and where it lands with [`task::DownloadTask`]
//! 2. **Transfer**: fetch the bytes through a [`transfer::Transfer`]
//! 3. **Execution**: [`executor::Downloader`] writes atomically and runs post-processing
//! 4. **Queueing**: [`queue::DownloadQueue`] batches tasks from many workers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use design_archiver::downloader::{DownloadQueue, DownloadTask, Downloader, HttpTransfer, QueueOptions};
//! use design_archiver::report::{ArchiveStats, FailureLog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Arc::new(Downloader::new(
//!     Arc::new(HttpTransfer::with_default_client()?),
//!     Arc::new(FailureLog::disabled()),
//!     Arc::new(ArchiveStats::new()),
//! ));
//! let queue = DownloadQueue::spawn(downloader, QueueOptions::default());
//! queue.handle().enqueue(DownloadTask::new("KEY", "https://cdn.example/a.png", "./out/a.png"))?;
//! let report = queue.close().await?;
//! println!("{} downloads completed", report.completed);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Per-asset failures never abort a run. They are recorded in the failure log
//! and surface as a [`task::DownloadOutcome`]. Only queue misuse and worker
//! panics are returned as [`DownloadError`].

pub mod config;
pub mod executor;
pub mod queue;
pub mod task;
pub mod transfer;

pub use executor::Downloader;
pub use queue::{DownloadQueue, QueueHandle, QueueOptions, QueueReport};
pub use task::{DownloadOutcome, DownloadTask, PostProcess};
pub use transfer::{HttpTransfer, Transfer, TransferResponse};

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Task enqueued after the queue was closed
    #[error("download queue closed, dropped {0}")]
    QueueClosed(String),

    /// A download or consumer task panicked
    #[error("download task failed: {0}")]
    TaskFailed(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    ClientError(String),
}
