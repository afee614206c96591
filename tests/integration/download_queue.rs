//! Download queue batching, expiry handling and closing

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use design_archiver::downloader::{DownloadOutcome, DownloadQueue, DownloadTask, Downloader, QueueOptions};
use design_archiver::report::{ArchiveStats, FailureKind, FailureLog};

use crate::support::{forbidden, noisy_png, png_response, FakeTransfer, CDN_BASE};

fn setup(dir: &TempDir, transfer: Arc<FakeTransfer>) -> (Arc<Downloader>, Arc<FailureLog>, Arc<ArchiveStats>) {
    let failures = Arc::new(FailureLog::open(&dir.path().join("errors.jsonl")).unwrap());
    let stats = Arc::new(ArchiveStats::new());
    let downloader = Arc::new(Downloader::new(transfer, failures.clone(), stats.clone()));
    (downloader, failures, stats)
}

#[tokio::test]
async fn expired_url_writes_nothing_while_siblings_complete() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FakeTransfer::new());
    let expired_url = format!("{CDN_BASE}/DOC/1:1.png");
    transfer.respond(&expired_url, forbidden());
    transfer.respond(&format!("{CDN_BASE}/DOC/1:2.png"), png_response(noisy_png(8, 8)));
    transfer.respond(&format!("{CDN_BASE}/DOC/1:3.png"), png_response(noisy_png(8, 8)));

    let (downloader, failures, stats) = setup(&dir, transfer.clone());
    let queue = DownloadQueue::spawn(downloader, QueueOptions::default());
    let handle = queue.handle();

    let exports = dir.path().join("DOC").join("exports");
    for id in ["1:1", "1:2", "1:3"] {
        handle
            .enqueue(DownloadTask::new(
                "DOC",
                format!("{CDN_BASE}/DOC/{id}.png"),
                exports.join(format!("{id}.png")),
            ))
            .unwrap();
    }
    drop(handle);

    let report = queue.close().await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);
    assert!(!report.idle_exit);

    assert!(!exports.join("1:1.png").exists());
    assert!(exports.join("1:2.png").is_file());
    assert!(exports.join("1:3.png").is_file());
    let leftovers: Vec<_> = std::fs::read_dir(&exports)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind");

    let entries = FailureLog::read_entries(failures.path().unwrap()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, FailureKind::AssetExpired);
    assert_eq!(entries[0].target.as_deref(), Some(expired_url.as_str()));

    let summary = stats.summary();
    assert_eq!(summary.downloads_completed, 2);
    assert_eq!(summary.downloads_expired, 1);
    assert_eq!(transfer.calls(), 3);
}

#[tokio::test]
async fn batches_never_exceed_batch_size() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(4, 4)));
    let (downloader, _failures, _stats) = setup(&dir, transfer);
    let queue = DownloadQueue::spawn(
        downloader,
        QueueOptions {
            batch_size: 3,
            ..QueueOptions::default()
        },
    );

    let handle = queue.handle();
    for i in 0..10 {
        handle
            .enqueue(DownloadTask::new(
                "DOC",
                format!("{CDN_BASE}/DOC/{i}.png"),
                dir.path().join(format!("{i}.png")),
            ))
            .unwrap();
    }
    drop(handle);

    let report = queue.close().await.unwrap();
    assert_eq!(report.completed, 10);
    assert!(report.largest_batch <= 3);
    assert!(report.batches >= 4);
}

#[tokio::test]
async fn idle_queue_exits_and_rejects_late_tasks() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(4, 4)));
    let (downloader, _failures, _stats) = setup(&dir, transfer);
    let queue = DownloadQueue::spawn(
        downloader,
        QueueOptions {
            batch_size: 4,
            idle_timeout: Duration::from_millis(30),
        },
    );
    let handle = queue.handle();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_closed());
    let late = handle.enqueue(DownloadTask::new("DOC", "https://cdn.test/late.png", dir.path().join("late.png")));
    assert!(late.is_err());
    drop(handle);

    let report = queue.close().await.unwrap();
    assert!(report.idle_exit);
    assert_eq!(report.batches, 0);
}

#[tokio::test]
async fn inferred_extension_follows_content_type() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(4, 4)));
    let (downloader, _failures, _stats) = setup(&dir, transfer);

    let outcome = downloader
        .download(
            DownloadTask::new("DOC", "https://cdn.test/fills/abc", dir.path().join("images").join("abc"))
                .with_inferred_extension(),
        )
        .await;

    match outcome {
        DownloadOutcome::Completed { path, bytes, saved } => {
            assert_eq!(path, dir.path().join("images").join("abc.png"));
            assert!(bytes > 0);
            assert_eq!(saved, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn missing_asset_is_logged_as_failed() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(FakeTransfer::new());
    let (downloader, failures, stats) = setup(&dir, transfer);

    let outcome = downloader
        .download(DownloadTask::new("DOC", "https://cdn.test/gone.png", dir.path().join("gone.png")))
        .await;

    assert!(matches!(outcome, DownloadOutcome::Failed(_)));
    assert!(!dir.path().join("gone.png").exists());
    assert_eq!(failures.count(), 1);
    assert_eq!(stats.summary().downloads_failed, 1);
}
