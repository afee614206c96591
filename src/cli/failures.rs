//! Failures command implementation

use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::archive::OutputFormat;
use super::{Cli, CliError};
use crate::report::{FailureEntry, FailureKind, FailureLog, FAILURE_LOG_FILE};

/// Summarize a failure log
#[derive(Args, Debug)]
pub struct FailuresArgs {
    /// Archive root containing errors.jsonl
    #[arg(long, short = 'o', default_value = "archive")]
    pub output: PathBuf,

    /// Failure log path; overrides --output
    #[arg(long)]
    pub error_log: Option<PathBuf>,

    /// Print only the affected document keys, one per line
    #[arg(long, default_value_t = false)]
    pub keys_only: bool,
}

/// Failure counts grouped by kind and by document
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct FailureReport {
    /// Entries read
    pub total: usize,
    /// Entries per kind
    pub by_kind: BTreeMap<FailureKind, usize>,
    /// Entries per document key
    pub by_document: BTreeMap<String, usize>,
}

impl FailureReport {
    /// Group `entries`
    pub fn from_entries(entries: &[FailureEntry]) -> Self {
        let mut report = Self {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            *report.by_kind.entry(entry.kind).or_default() += 1;
            *report.by_document.entry(entry.file_key.clone()).or_default() += 1;
        }
        report
    }
}

impl FailuresArgs {
    /// Execute the failures command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let path = self
            .error_log
            .clone()
            .unwrap_or_else(|| self.output.join(FAILURE_LOG_FILE));
        if !path.is_file() {
            return Err(CliError::InvalidArgument(format!(
                "failure log {} does not exist",
                path.display()
            )));
        }

        let entries = FailureLog::read_entries(&path)?;
        let report = FailureReport::from_entries(&entries);

        if self.keys_only {
            for key in report.by_document.keys() {
                println!("{key}");
            }
            return Ok(());
        }

        match cli.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&report)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("{} failures in {}", report.total, path.display());
                for (kind, count) in &report.by_kind {
                    println!("  {kind:<22} {count}");
                }
                println!("{} documents affected", report.by_document.len());
            }
        }
        Ok(())
    }
}
