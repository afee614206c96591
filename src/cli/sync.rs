//! Sync command implementation

use clap::Args;
use std::sync::Arc;

use super::archive::{output_summary, SourceArgs};
use super::{Cli, CliError};
use crate::archiver::{Archiver, Credentials, RunMode};
use crate::downloader::HttpTransfer;
use crate::fetcher::http::FigmaHttpClient;
use crate::report::FailureLog;
use crate::shutdown::SharedShutdown;

/// Rebuild `meta.json` manifests without contacting the API
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Document locations
    #[command(flatten)]
    pub source: SourceArgs,
}

impl SyncArgs {
    /// Execute the sync command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let mut config = self.source.base_config();
        config.mode = RunMode::SyncOnly;
        config.validate()?;

        let failures = Arc::new(FailureLog::open(&config.error_log)?);
        let archiver = Archiver::new(
            config,
            Credentials::default(),
            Arc::new(FigmaHttpClient::with_default_client()?),
            Arc::new(HttpTransfer::with_default_client()?),
            failures.clone(),
            shutdown,
        );

        let summary = archiver.run().await?;
        output_summary(cli.output_format, &summary, failures.count());
        Ok(())
    }
}
