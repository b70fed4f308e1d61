//! Bounded fan-out: concurrency ceiling, first error, cancellation

use crate::support::{items, RecordingDownloader};
use mix_downloader::downloader::{DownloadError, FanOut, JitterRange};
use mix_downloader::fetcher::{FetcherError, ItemDownloader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Run every item through `downloader`, writing below `dir`
async fn run_with(
    fanout: &FanOut,
    cancel: &CancellationToken,
    downloader: Arc<RecordingDownloader>,
    count: usize,
    dir: PathBuf,
) -> Result<usize, DownloadError> {
    fanout
        .run(cancel, items(count), move |token, item| {
            let downloader = downloader.clone();
            let destination = dir.join(format!("{:03}-{}.flac", item.position, item.id));
            async move {
                downloader
                    .download_item(&token, &item, &destination)
                    .await
                    .map_err(DownloadError::from)
            }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_every_item_is_written() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(RecordingDownloader::new().with_delay(Duration::from_millis(20)));
    let fanout = FanOut::new(4, JitterRange::none());

    let completed = run_with(
        &fanout,
        &CancellationToken::new(),
        downloader.clone(),
        12,
        temp.path().to_path_buf(),
    )
    .await
    .unwrap();

    assert_eq!(completed, 12);
    assert_eq!(downloader.written().len(), 12);
    for position in 0..12 {
        let path = temp.path().join(format!("{position:03}-t{position}.flac"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), format!("t{position}"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_never_exceeds_concurrency() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(RecordingDownloader::new().with_delay(Duration::from_millis(50)));
    let fanout = FanOut::new(3, JitterRange::none());

    run_with(
        &fanout,
        &CancellationToken::new(),
        downloader.clone(),
        20,
        temp.path().to_path_buf(),
    )
    .await
    .unwrap();

    assert!(downloader.max_in_flight() <= 3);
    assert!(downloader.max_in_flight() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_first_failure_cancels_siblings() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(
        RecordingDownloader::new()
            .with_delay(Duration::from_millis(100))
            .failing_on("t3"),
    );
    let fanout = FanOut::new(2, JitterRange::none());

    let result = run_with(
        &fanout,
        &CancellationToken::new(),
        downloader.clone(),
        20,
        temp.path().to_path_buf(),
    )
    .await;

    match result {
        Err(DownloadError::Fetch(FetcherError::ApiError(message))) => {
            assert!(message.contains("t3"));
        }
        other => panic!("expected the failing track's error, got {other:?}"),
    }

    // At most one permit's worth of items beyond the failure ever started
    assert!(downloader.started() <= 5, "{} started", downloader.started());
    // The sibling still sleeping saw the cancellation
    assert!(downloader.cancelled() >= 1);
    assert!(!temp.path().join("019-t19.flac").exists());
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_stops_dispatch() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(RecordingDownloader::new().with_delay(Duration::from_millis(100)));
    let fanout = FanOut::new(2, JitterRange::none());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let result = run_with(
        &fanout,
        &cancel,
        downloader.clone(),
        20,
        temp.path().to_path_buf(),
    )
    .await;

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert!(downloader.started() < 20);
}

#[tokio::test]
async fn test_pre_cancelled_group_starts_nothing() {
    let temp = TempDir::new().unwrap();
    let downloader = Arc::new(RecordingDownloader::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_with(
        &FanOut::new(4, JitterRange::none()),
        &cancel,
        downloader.clone(),
        5,
        temp.path().to_path_buf(),
    )
    .await;

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert_eq!(downloader.started(), 0);
}

#[tokio::test]
async fn test_panicking_task_is_a_worker_error() {
    let result = FanOut::new(2, JitterRange::none())
        .run(&CancellationToken::new(), items(3), |_token, item| async move {
            if item.position == 1 {
                panic!("decoder blew up");
            }
            Ok(())
        })
        .await;

    match result {
        Err(DownloadError::Worker(message)) => assert!(message.contains("decoder blew up")),
        other => panic!("expected a worker error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_task_cancels_siblings() {
    let started = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));
    let (start_counter, cancel_counter) = (started.clone(), cancelled.clone());

    let result = FanOut::new(2, JitterRange::none())
        .run(&CancellationToken::new(), items(20), move |token, item| {
            let started = start_counter.clone();
            let cancelled = cancel_counter.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                if item.position == 0 {
                    panic!("boom");
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                        Err(DownloadError::Cancelled)
                    }
                    _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(()),
                }
            }
        })
        .await;

    assert!(matches!(result, Err(DownloadError::Worker(_))));
    // The panicking item plus at most one sibling holding the other permit
    assert!(started.load(Ordering::SeqCst) <= 2, "started {}", started.load(Ordering::SeqCst));
    assert!(cancelled.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn test_cancel_after_last_item_still_succeeds() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let result = FanOut::new(1, JitterRange::none())
        .run(&cancel, items(3), move |_token, item| {
            let trigger = trigger.clone();
            async move {
                if item.position == 2 {
                    trigger.cancel();
                }
                Ok(())
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_delays_each_task() {
    let jitter = JitterRange::new(Duration::from_secs(2), Duration::from_secs(2));
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let begin = Instant::now();

    FanOut::new(8, jitter)
        .run(&CancellationToken::new(), items(4), move |_token, _item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(started.load(Ordering::SeqCst), 4);
    assert!(begin.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_jitter_skips_work() {
    let jitter = JitterRange::new(Duration::from_secs(30), Duration::from_secs(30));
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = FanOut::new(4, jitter)
        .run(&cancel, items(4), move |_token, _item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert_eq!(started.load(Ordering::SeqCst), 0);
}
