//! CLI command implementations

pub mod archive;
pub mod error;
pub mod failures;
pub mod sync;

pub use archive::{ArchiveArgs, Cli, Commands, OutputFormat};
pub use error::CliError;
pub use failures::FailuresArgs;
pub use sync::SyncArgs;
