use super::*;
use crate::types::TaskRecord;
use std::sync::OnceLock;

#[tokio::test]
async fn test_pause_then_resume_reaches_terminal_state() {
    let (downloader, fetcher, _output) = create_test_downloader(test_config(2));
    let sink = RecordingSink::new();
    fetcher.fallback(Script::slow(b"frame data", 5, Duration::from_millis(20)));

    let ids = downloader
        .add_tasks((1..=4).map(|i| image(&i.to_string())))
        .await;
    let handle = spawn_start(&downloader, sink.clone());

    wait_for(&downloader, |s| s.downloading == 2).await;
    downloader.pause().await;

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Paused));

    // The two in-flight tasks were abandoned, the rest never started
    let stats = downloader.get_stats().await;
    assert_eq!(stats.downloading, 0);
    assert_eq!(stats.paused, 2);
    assert_eq!(stats.pending, 2);
    assert_eq!(sink.complete_calls(), 0);

    let outcome = downloader.resume().await.unwrap();
    match outcome {
        Some(RunOutcome::Completed(report)) => {
            assert_eq!(report.succeeded, 4);
            assert_eq!(report.failed, 0);
        }
        other => panic!("expected completion after resume, got {other:?}"),
    }

    // Nothing was lost: every task completed, the paused ones on a second attempt
    let snapshot = downloader.snapshot().await;
    assert_eq!(snapshot.len(), 4);
    assert!(snapshot.iter().all(|t| t.status() == TaskStatus::Completed));
    assert_eq!(snapshot[0].attempts(), 2);
    assert_eq!(snapshot[0].retry_count(), 0, "pausing does not spend retries");

    use TaskStatus::*;
    assert_eq!(
        sink.status_history(&ids[0]),
        [Downloading, Paused, Pending, Downloading, Completed]
    );
    assert_eq!(sink.complete_calls(), 1);
}

#[tokio::test]
async fn test_pause_when_idle_is_noop() {
    let (downloader, _fetcher, _output) = create_test_downloader(test_config(1));
    downloader.add_tasks(vec![image("1")]).await;

    downloader.pause().await;
    downloader.pause().await;

    let stats = downloader.get_stats().await;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.paused, 0);
}

#[tokio::test]
async fn test_resume_without_pause_returns_none() {
    let (downloader, _fetcher, _output) = create_test_downloader(test_config(1));
    assert!(downloader.resume().await.unwrap().is_none());

    downloader.add_tasks(vec![image("1")]).await;
    assert!(downloader.resume().await.unwrap().is_none());
    assert_eq!(downloader.get_stats().await.pending, 1);
}

#[tokio::test]
async fn test_pause_twice_and_resume_twice() {
    let (downloader, fetcher, _output) = create_test_downloader(test_config(1));
    fetcher.fallback(Script::Hang);
    downloader.add_tasks(vec![image("1")]).await;

    let handle = spawn_start(&downloader, RecordingSink::new());
    wait_for(&downloader, |s| s.downloading == 1).await;

    downloader.pause().await;
    downloader.pause().await;
    assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Paused));
    assert_eq!(downloader.get_stats().await.paused, 1);

    // Resume again on a background task, then pause that run too
    let resumer = {
        let downloader = downloader.clone();
        tokio::spawn(async move { downloader.resume().await })
    };
    wait_for(&downloader, |s| s.downloading == 1).await;
    downloader.pause().await;

    let outcome = resumer.await.unwrap().unwrap();
    assert!(matches!(outcome, Some(RunOutcome::Paused)));
    assert_eq!(downloader.snapshot().await[0].attempts(), 2);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let (downloader, fetcher, _output) = create_test_downloader(test_config(1));
    fetcher.fallback(Script::Hang);
    downloader.add_tasks(vec![image("1")]).await;

    let handle = spawn_start(&downloader, RecordingSink::new());
    wait_for(&downloader, |s| s.downloading == 1).await;

    let second = downloader.start(RecordingSink::new()).await;
    assert!(matches!(second, Err(Error::AlreadyRunning)));

    downloader.cancel().await;
    assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Cancelled));
}

#[tokio::test]
async fn test_cancel_clears_registry_and_stops_callbacks() {
    let (downloader, fetcher, output) = create_test_downloader(test_config(2));
    let sink = RecordingSink::new();
    fetcher.fallback(Script::Hang);

    downloader
        .add_tasks(vec![image("1"), image("2"), image("3")])
        .await;
    let handle = spawn_start(&downloader, sink.clone());
    wait_for(&downloader, |s| s.downloading == 2).await;

    downloader.cancel().await;
    let calls_at_cancel = sink.progress_calls();

    let outcome = handle.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Cancelled));

    let stats = downloader.get_stats().await;
    assert_eq!(stats.total, 0);
    assert_eq!(stats.overall_progress, 0.0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.progress_calls(), calls_at_cancel);
    assert_eq!(sink.complete_calls(), 0);
    assert!(output.files().await.is_empty());

    // Idempotent
    downloader.cancel().await;
    assert_eq!(downloader.get_stats().await.total, 0);
}

#[tokio::test]
async fn test_cancel_while_paused_discards_tasks() {
    let (downloader, fetcher, _output) = create_test_downloader(test_config(1));
    fetcher.fallback(Script::Hang);
    downloader.add_tasks(vec![image("1"), image("2")]).await;

    let handle = spawn_start(&downloader, RecordingSink::new());
    wait_for(&downloader, |s| s.downloading == 1).await;
    downloader.pause().await;
    assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Paused));

    downloader.cancel().await;
    assert_eq!(downloader.get_stats().await.total, 0);
    assert!(downloader.resume().await.unwrap().is_none());
}

#[tokio::test]
async fn test_downloader_is_reusable_after_cancel() {
    let (downloader, fetcher, _output) = create_test_downloader(test_config(1));
    let stuck = image("stuck");
    fetcher.script(&stuck.url, [Script::Hang]);

    downloader.add_tasks(vec![stuck]).await;
    let handle = spawn_start(&downloader, RecordingSink::new());
    wait_for(&downloader, |s| s.downloading == 1).await;
    downloader.cancel().await;
    assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Cancelled));

    downloader.add_tasks(vec![image("fresh")]).await;
    let outcome = downloader.start(RecordingSink::new()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.succeeded == 1));
}

/// Cancels the run from inside its completion callback
#[derive(Default)]
struct CancelOnComplete {
    downloader: OnceLock<BatchDownloader>,
}

impl ProgressSink for CancelOnComplete {
    fn on_progress(&self, _snapshot: &[TaskRecord]) {}

    fn on_complete(&self, _snapshot: &[TaskRecord]) {
        let downloader = self.downloader.get().unwrap();
        futures::executor::block_on(downloader.cancel());
    }
}

#[tokio::test]
async fn test_cancel_before_archive_save_discards_the_archive() {
    let (downloader, _fetcher, output) = create_test_downloader(test_config(2));
    let sink = Arc::new(CancelOnComplete::default());
    sink.downloader.set(downloader.clone()).ok();
    let mut rx = downloader.subscribe();

    downloader.add_tasks(vec![image("1"), image("2")]).await;
    let outcome = downloader.start(sink).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert!(output.files().await.is_empty());
    assert_eq!(downloader.get_stats().await.total, 0);

    let mut saved = false;
    while let Ok(event) = rx.try_recv() {
        saved |= matches!(event, Event::FileSaved { .. });
    }
    assert!(!saved);
}
