//! Run statistics shared across workers.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by workers and the download queue
#[derive(Debug, Default)]
pub struct ArchiveStats {
    documents_archived: AtomicU64,
    documents_skipped: AtomicU64,
    documents_failed: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_expired: AtomicU64,
    downloads_failed: AtomicU64,
    renders_requested: AtomicU64,
    exports_enqueued: AtomicU64,
    ids_dropped: AtomicU64,
    bytes_downloaded: AtomicU64,
    bytes_saved: AtomicU64,
    manifests_written: AtomicU64,
}

/// Snapshot of [`ArchiveStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    /// Documents fully processed
    pub documents_archived: u64,
    /// Documents not processed because of shutdown
    pub documents_skipped: u64,
    /// Documents abandoned on error
    pub documents_failed: u64,
    /// Assets written to disk
    pub downloads_completed: u64,
    /// Assets whose URL had expired
    pub downloads_expired: u64,
    /// Assets that failed for other reasons
    pub downloads_failed: u64,
    /// Node renders requested from the API
    pub renders_requested: u64,
    /// Render downloads handed to the queue
    pub exports_enqueued: u64,
    /// Ids dropped after rejection, rate limiting or URL overflow
    pub ids_dropped: u64,
    /// Bytes written by downloads
    pub bytes_downloaded: u64,
    /// Bytes removed by the optimizer
    pub bytes_saved: u64,
    /// Manifests written by synchronization
    pub manifests_written: u64,
}

macro_rules! counter_methods {
    ($($field:ident => $add:ident),* $(,)?) => {
        $(
            #[doc = concat!("Add to `", stringify!($field), "`")]
            pub fn $add(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl ArchiveStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    counter_methods! {
        documents_archived => add_documents_archived,
        documents_skipped => add_documents_skipped,
        documents_failed => add_documents_failed,
        downloads_completed => add_downloads_completed,
        downloads_expired => add_downloads_expired,
        downloads_failed => add_downloads_failed,
        renders_requested => add_renders_requested,
        exports_enqueued => add_exports_enqueued,
        ids_dropped => add_ids_dropped,
        bytes_downloaded => add_bytes_downloaded,
        bytes_saved => add_bytes_saved,
        manifests_written => add_manifests_written,
    }

    /// Current values
    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary {
            documents_archived: self.documents_archived.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_expired: self.downloads_expired.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            renders_requested: self.renders_requested.load(Ordering::Relaxed),
            exports_enqueued: self.exports_enqueued.load(Ordering::Relaxed),
            ids_dropped: self.ids_dropped.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            manifests_written: self.manifests_written.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for ArchiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Documents: {} archived, {} failed, {} skipped",
            self.documents_archived, self.documents_failed, self.documents_skipped
        )?;
        writeln!(
            f,
            "Downloads: {} completed, {} expired, {} failed ({:.1} MiB)",
            self.downloads_completed,
            self.downloads_expired,
            self.downloads_failed,
            self.bytes_downloaded as f64 / (1024.0 * 1024.0)
        )?;
        writeln!(
            f,
            "Renders: {} requested, {} enqueued, {} ids dropped",
            self.renders_requested, self.exports_enqueued, self.ids_dropped
        )?;
        writeln!(
            f,
            "Optimizer saved: {:.1} MiB",
            self.bytes_saved as f64 / (1024.0 * 1024.0)
        )?;
        write!(f, "Manifests written: {}", self.manifests_written)
    }
}
