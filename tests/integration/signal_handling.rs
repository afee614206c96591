use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use design_archiver::archiver::{ArchiveConfig, Archiver, Credentials};
use design_archiver::report::FailureLog;
use design_archiver::shutdown::ShutdownCoordinator;

use crate::support::{noisy_png, single_frame_document, write_document, FakeApi, FakeTransfer};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Requesting shutdown before anyone waits must not be missed.
#[tokio::test]
async fn shutdown_requested_before_wait_no_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

#[tokio::test]
async fn backoff_sleep_is_cut_short() {
    let shutdown = ShutdownCoordinator::shared();
    let handle = shutdown.clone();
    let sleeper = tokio::spawn(async move { handle.sleep_or_shutdown(Duration::from_secs(60)).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.request_shutdown();

    let completed = tokio::time::timeout(Duration::from_secs(1), sleeper)
        .await
        .expect("sleep was not interrupted")
        .unwrap();
    assert!(!completed);
}

#[tokio::test]
async fn run_after_shutdown_skips_documents_and_manifests() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("files");
    std::fs::create_dir_all(&src).unwrap();
    write_document(&src, "A", &single_frame_document());
    write_document(&src, "B", &single_frame_document());

    let out = dir.path().join("archive");
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let api = Arc::new(FakeApi::new());
    let transfer = Arc::new(FakeTransfer::serving_png(noisy_png(8, 8)));
    let archiver = Archiver::new(
        ArchiveConfig::new(&src, &out),
        Credentials::parse("token").unwrap(),
        api.clone(),
        transfer.clone(),
        Arc::new(FailureLog::disabled()),
        shutdown,
    );

    let summary = archiver.run().await.unwrap();

    assert_eq!(summary.documents_skipped, 2);
    assert_eq!(summary.documents_archived, 0);
    assert_eq!(summary.manifests_written, 0);
    assert_eq!(api.render_calls(), 0);
    assert_eq!(transfer.calls(), 0);
}
