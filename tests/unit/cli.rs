//! Argument parsing and binary smoke tests

use assert_cmd::Command;
use clap::Parser;
use tempfile::TempDir;

use design_archiver::cli::{Cli, Commands, OutputFormat};
use design_archiver::report::{FailureKind, FailureLog};
use design_archiver::ExportFormat;

use crate::support::{noisy_png, single_frame_document, write_document};

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("design-archiver").unwrap();
    cmd.env_remove("FIGMA_ACCESS_TOKEN");
    cmd
}

#[test]
fn test_archive_defaults() {
    let cli = Cli::parse_from(["design-archiver", "archive", "--token", "t"]);
    assert_eq!(cli.output_format, OutputFormat::Human);
    assert!(cli.metrics_addr.is_none());

    let Commands::Archive(args) = cli.command else {
        panic!("expected archive command");
    };
    assert_eq!(args.workers, 4);
    assert_eq!(args.fetch_concurrency, 4);
    assert_eq!(args.format, ExportFormat::Png);
    assert_eq!(args.scale, 1.0);
    assert_eq!(args.retry_multiplier, 5);
    assert_eq!(args.url_budget, 4000);
    assert_eq!(args.source.source_dir.to_str(), Some("files"));
    assert_eq!(args.source.output.to_str(), Some("archive"));
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::parse_from([
        "design-archiver",
        "sync",
        "--output-format",
        "json",
        "--metrics-addr",
        "127.0.0.1:9000",
    ]);
    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(cli.metrics_addr.map(|a| a.port()), Some(9000));
}

#[test]
fn test_out_of_range_values_rejected() {
    assert!(Cli::try_parse_from(["design-archiver", "archive", "--workers", "0"]).is_err());
    assert!(Cli::try_parse_from(["design-archiver", "archive", "--workers", "33"]).is_err());
    assert!(Cli::try_parse_from(["design-archiver", "archive", "--scale", "5"]).is_err());
    assert!(Cli::try_parse_from(["design-archiver", "archive", "--format", "gif"]).is_err());
    assert!(Cli::try_parse_from(["design-archiver", "archive", "--url-budget", "10"]).is_err());
}

#[test]
fn test_help_lists_commands() {
    let output = bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("archive"));
    assert!(stdout.contains("sync"));
    assert!(stdout.contains("failures"));
}

#[test]
fn test_archive_without_token_fails() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("files");
    std::fs::create_dir_all(&src).unwrap();

    bin()
        .args(["archive", "--src"])
        .arg(&src)
        .arg("-o")
        .arg(dir.path().join("archive"))
        .assert()
        .failure();
}

#[test]
fn test_sync_command_writes_manifests() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("files");
    let out = dir.path().join("archive");
    std::fs::create_dir_all(&src).unwrap();
    write_document(&src, "DOC", &single_frame_document());
    let images = out.join("DOC").join("images");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::write(images.join("fillhash.png"), noisy_png(8, 8)).unwrap();

    let output = bin()
        .args(["sync", "--output-format", "json", "--src"])
        .arg(&src)
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["summary"]["manifests_written"], 1);
    assert!(images.join("meta.json").is_file());
}

#[test]
fn test_failures_command_groups_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("errors.jsonl");
    let log = FailureLog::open(&path).unwrap();
    log.record("A", FailureKind::AssetExpired, Some("https://cdn/x"), "HTTP 403");
    log.record("B", FailureKind::RenderFailed, Some("1:2"), "null url");
    log.record("B", FailureKind::RenderFailed, Some("1:3"), "null url");
    drop(log);

    let output = bin()
        .args(["failures", "--output-format", "json", "--error-log"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["total"], 3);
    assert_eq!(json["by_kind"]["render_failed"], 2);
    assert_eq!(json["by_document"]["A"], 1);

    let keys = bin()
        .args(["failures", "--keys-only", "--error-log"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&keys.stdout), "A\nB\n");
}

#[test]
fn test_failures_command_missing_log_fails() {
    let dir = TempDir::new().unwrap();
    bin()
        .args(["failures", "-o"])
        .arg(dir.path())
        .assert()
        .failure();
}
