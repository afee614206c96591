//! CLI error types and conversions

use crate::archiver::ArchiveError;
use crate::downloader::DownloadError;
use crate::fetcher::FetcherError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Run error
    #[error("archive error: {0}")]
    ArchiveError(#[from] ArchiveError),

    /// Download error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Filesystem error
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
