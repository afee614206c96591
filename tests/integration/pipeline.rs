//! End-to-end runs of the archiver against fake upstreams

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use design_archiver::archiver::{ArchiveConfig, Archiver, Credentials, RunMode};
use design_archiver::manifest::ArchiveManifest;
use design_archiver::report::{FailureKind, FailureLog};
use design_archiver::shutdown::ShutdownCoordinator;

use crate::support::{noisy_png, single_frame_document, write_document, FakeApi, FakeTransfer};

struct Fixture {
    _dir: TempDir,
    src: std::path::PathBuf,
    out: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("files");
        let out = dir.path().join("archive");
        std::fs::create_dir_all(&src).unwrap();
        Self { _dir: dir, src, out }
    }

    fn config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::new(&self.src, &self.out);
        config.workers = 2;
        config.fetch.base_delay = Duration::from_millis(1);
        config.fetch.max_delay = Duration::from_millis(5);
        config.queue.idle_timeout = Duration::from_secs(5);
        config
    }

    fn archiver(&self, config: ArchiveConfig, api: Arc<FakeApi>, transfer: Arc<FakeTransfer>) -> Archiver {
        let failures = Arc::new(FailureLog::open(&config.error_log).unwrap());
        Archiver::new(
            config,
            Credentials::parse("token-a,token-b").unwrap(),
            api,
            transfer,
            failures,
            ShutdownCoordinator::shared(),
        )
    }
}

fn image_size(path: &Path) -> (u32, u32) {
    image::image_dimensions(path).unwrap()
}

#[tokio::test]
async fn existing_render_means_no_render_request() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());
    let exports = fixture.out.join("DOC").join("exports");
    std::fs::create_dir_all(&exports).unwrap();
    std::fs::write(exports.join("12:3.png"), noisy_png(16, 8)).unwrap();

    let api = Arc::new(FakeApi::new().with_fills(&["fillhash"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(800, 400)));
    let archiver = fixture.archiver(fixture.config(), api.clone(), transfer.clone());

    let summary = archiver.run().await.unwrap();

    assert_eq!(api.render_calls(), 0);
    assert_eq!(summary.documents_archived, 1);
    assert_eq!(summary.renders_requested, 0);

    let manifest = ArchiveManifest::load(&exports.join("meta.json")).unwrap();
    assert_eq!(
        serde_json::to_value(&manifest.resolutions).unwrap(),
        json!([[0, 1, "png"]])
    );
    assert_eq!(manifest.document_version.as_deref(), Some("42"));
    assert_eq!(manifest.map["12:3"], vec![".png"]);
}

#[tokio::test]
async fn fills_are_downloaded_and_sized_to_their_usage() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());

    let api = Arc::new(FakeApi::new().with_fills(&["fillhash"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(800, 400)));
    let mut config = fixture.config();
    config.skip_exports = true;
    let archiver = fixture.archiver(config, api.clone(), transfer.clone());

    let summary = archiver.run().await.unwrap();

    let doc = fixture.out.join("DOC");
    let fill = doc.join("images").join("fillhash.png");
    assert_eq!(image_size(&fill), (200, 100));
    assert!(doc.join("thumbnail.png").is_file());
    assert_eq!(api.fill_calls(), 1);
    assert!(summary.bytes_saved > 0);

    let manifest = ArchiveManifest::load(&doc.join("images").join("meta.json")).unwrap();
    assert_eq!(manifest.map["fillhash"], vec![".png"]);
    assert!(manifest.missing.is_empty());
}

#[tokio::test]
async fn second_run_requests_nothing() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());
    let api = Arc::new(FakeApi::new().with_fills(&["fillhash"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(64, 32)));

    let first = fixture
        .archiver(fixture.config(), api.clone(), transfer.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(api.render_calls(), 1);
    assert_eq!(first.exports_enqueued, 1);
    assert_eq!(first.ids_dropped, 0);
    assert!(fixture.out.join("DOC").join("exports").join("12:3.png").is_file());
    let transfers_after_first = transfer.calls();

    let summary = fixture
        .archiver(fixture.config(), api.clone(), transfer.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(api.render_calls(), 1);
    assert_eq!(api.fill_calls(), 1);
    assert_eq!(transfer.calls(), transfers_after_first);
    assert_eq!(summary.downloads_completed, 0);
    assert_eq!(summary.manifests_written, 2);
}

#[tokio::test]
async fn malformed_document_is_logged_and_others_continue() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "GOOD", &single_frame_document());
    std::fs::write(fixture.src.join("BAD.json"), b"{\"document\": [").unwrap();

    let api = Arc::new(FakeApi::new().with_fills(&["fillhash"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(64, 32)));
    let config = fixture.config();
    let log_path = config.error_log.clone();

    let summary = fixture.archiver(config, api, transfer).run().await.unwrap();

    assert_eq!(summary.documents_archived, 1);
    assert_eq!(summary.documents_failed, 1);
    let entries = FailureLog::read_entries(&log_path).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.file_key == "BAD" && e.kind == FailureKind::MalformedDocument));
}

#[tokio::test]
async fn unrendered_nodes_are_logged() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());

    let api = Arc::new(FakeApi::new().with_unrenderable(&["12:3"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(64, 32)));
    let mut config = fixture.config();
    config.skip_fills = true;
    config.skip_thumbnail = true;
    let log_path = config.error_log.clone();

    fixture.archiver(config, api, transfer).run().await.unwrap();

    let entries = FailureLog::read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, FailureKind::RenderFailed);
    assert_eq!(entries[0].target.as_deref(), Some("12:3"));
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());

    let api = Arc::new(FakeApi::new().with_fills(&["fillhash"]));
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(64, 32)));
    let mut config = fixture.config();
    config.mode = RunMode::DryRun;
    let archiver = Archiver::new(
        config,
        Credentials::default(),
        api.clone(),
        transfer.clone(),
        Arc::new(FailureLog::disabled()),
        ShutdownCoordinator::shared(),
    );

    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.documents_archived, 1);
    assert_eq!(api.render_calls() + api.fill_calls(), 0);
    assert_eq!(transfer.calls(), 0);
    assert!(!fixture.out.join("DOC").exists());
}

#[tokio::test]
async fn sync_only_rebuilds_manifests_of_archived_documents() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());
    write_document(&fixture.src, "NEVER", &single_frame_document());
    let images = fixture.out.join("DOC").join("images");
    std::fs::create_dir_all(&images).unwrap();
    std::fs::write(images.join("fillhash.png"), noisy_png(8, 8)).unwrap();

    let mut config = fixture.config();
    config.mode = RunMode::SyncOnly;
    let archiver = Archiver::new(
        config,
        Credentials::default(),
        Arc::new(FakeApi::new()),
        Arc::new(FakeTransfer::new()),
        Arc::new(FailureLog::disabled()),
        ShutdownCoordinator::shared(),
    );

    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.manifests_written, 1);
    assert!(images.join("meta.json").is_file());
    assert!(!fixture.out.join("NEVER").exists());
}

#[tokio::test]
async fn archive_mode_requires_a_token() {
    let fixture = Fixture::new();
    let archiver = Archiver::new(
        fixture.config(),
        Credentials::default(),
        Arc::new(FakeApi::new()),
        Arc::new(FakeTransfer::new()),
        Arc::new(FailureLog::disabled()),
        ShutdownCoordinator::shared(),
    );

    assert!(archiver.run().await.is_err());
}

#[tokio::test]
async fn exhausted_server_errors_are_logged_as_upstream_unavailable() {
    let fixture = Fixture::new();
    write_document(&fixture.src, "DOC", &single_frame_document());

    let mut config = fixture.config();
    config.skip_fills = true;
    config.skip_thumbnail = true;
    let budget = config.fetch.retry_multiplier as usize * config.fetch.concurrency;
    let log_path = config.error_log.clone();
    let api = Arc::new(FakeApi::server_errors(budget));
    let transfer = Arc::new(FakeTransfer::new());

    let summary = fixture.archiver(config, api, transfer).run().await.unwrap();

    assert_eq!(summary.ids_dropped, 1);
    let entries = FailureLog::read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, FailureKind::UpstreamUnavailable);
    assert_eq!(entries[0].target.as_deref(), Some("12:3"));
    assert!(entries[0].message.contains("bad gateway"));
}
