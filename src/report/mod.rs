//! Run reporting: shared counters and the durable failure log.

pub mod failures;
pub mod stats;

pub use failures::{FailureEntry, FailureKind, FailureLog, FAILURE_LOG_FILE};
pub use stats::{ArchiveStats, ArchiveSummary};
