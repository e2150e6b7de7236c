//! Discovery job integration tests.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use transcoder_core::{
    jobs::{DiscoveryJob, DISCOVERY_CHECKPOINT},
    task::{TaskStatus, TaskStore},
    testing::fixtures::{test_config, video_markup, TestHarness},
};

fn setup() -> (TempDir, TestHarness) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let harness = TestHarness::new(dir.path());
    (dir, harness)
}

fn discovery(harness: &TestHarness) -> DiscoveryJob {
    DiscoveryJob::new(harness.services.clone())
}

#[tokio::test]
async fn test_unreferenced_file_is_still_queued_in_fifo_order() {
    let (_dir, harness) = setup();
    let embedded = harness.add_file("talk.webm", "video/webm", b"talk");
    let attachment = harness.add_file("raw.webm", "video/webm", b"raw");
    harness.add_page(7, &video_markup("talk.webm"));

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.enqueued, 2);
    assert_eq!(report.unreferenced, 1);
    assert_eq!(report.dispatched, 0);

    let ready = harness.tasks.list_by_status(TaskStatus::Ready).unwrap();
    let sources: Vec<_> = ready.iter().map(|task| task.source_file_id).collect();
    assert_eq!(sources, vec![embedded.id, attachment.id]);
    assert!(ready[0].id < ready[1].id);
}

#[tokio::test]
async fn test_discovery_skips_files_with_tasks() {
    let (_dir, harness) = setup();
    harness.add_file("talk.webm", "video/webm", b"talk");
    harness.add_file("song.ogg", "audio/ogg", b"song");

    let first = discovery(&harness).run().await.unwrap();
    assert_eq!(first.enqueued, 2);

    // The lookback window returns the same files; both already have a task
    let second = discovery(&harness).run().await.unwrap();
    assert_eq!(second.candidates, 2);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.writes(), 0);
    assert_eq!(harness.tasks.count_by_status(TaskStatus::Ready).unwrap(), 2);
}

#[tokio::test]
async fn test_discovery_skips_terminal_tasks_too() {
    let (_dir, harness) = setup();
    let file = harness.add_file("talk.webm", "video/webm", b"talk");
    let task = harness.tasks.insert(file.id).unwrap();
    let claimed = harness.tasks.claim(task.id).unwrap().unwrap();
    harness
        .tasks
        .mark_failed(task.id, claimed.attempt.as_deref().unwrap())
        .unwrap();

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_discovery_ignores_derived_and_other_types() {
    let (_dir, harness) = setup();
    harness.add_file("talk_transcoded_20240101000000.webm", "video/webm", b"derived");
    harness.add_file("talk_transcoded_20240101000000.mp4", "video/mp4", b"mp4");
    harness.add_file("notes.pdf", "application/pdf", b"%PDF");

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.enqueued, 0);
}

#[tokio::test]
async fn test_checkpoint_advances_with_lookback() {
    let (_dir, harness) = setup();
    let now = Utc::now();
    harness.add_file_at("old.webm", "video/webm", b"old", now - Duration::days(3));

    // No checkpoint yet: everything is a candidate
    let first = discovery(&harness).run_at(now).await.unwrap();
    assert_eq!(first.enqueued, 1);
    let mark = harness.tasks.checkpoint(DISCOVERY_CHECKPOINT).unwrap().unwrap();
    assert_eq!(mark.timestamp(), now.timestamp());

    // Only files within a day before the mark are scanned now
    harness.add_file_at("stale.webm", "video/webm", b"stale", now - Duration::days(2));
    harness.add_file_at("late.webm", "video/webm", b"late", now - Duration::hours(12));

    let second = discovery(&harness)
        .run_at(now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(second.candidates, 1);
    assert_eq!(second.enqueued, 1);
}

#[tokio::test]
async fn test_discovery_dispatches_up_to_free_slots() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.worker.external_driver = false;
    config.worker.concurrency_limit = 2;
    let harness = TestHarness::with_config(config);

    for (name, page) in [("a.webm", 1), ("b.webm", 2), ("c.webm", 3)] {
        harness.add_file(name, "video/webm", name.as_bytes());
        harness.add_page(page, &video_markup(name));
    }

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.errors, 0);

    assert_eq!(harness.tasks.count_by_status(TaskStatus::Completed).unwrap(), 2);
    assert_eq!(harness.tasks.count_by_status(TaskStatus::Ready).unwrap(), 1);
    assert_eq!(harness.converter.conversion_count().await, 2);
}

#[tokio::test]
async fn test_dispatch_isolates_failing_tasks() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.worker.external_driver = false;
    config.worker.concurrency_limit = 3;
    let harness = TestHarness::with_config(config);

    harness.add_file("a.webm", "video/webm", b"a");
    harness.add_file("b.webm", "video/webm", b"b");
    harness.converter.set_fail_all(true).await;

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.completed, 0);
    assert_eq!(report.errors, 2);
    assert_eq!(
        harness.tasks.count_by_status(TaskStatus::InProgress).unwrap(),
        2
    );
}

#[tokio::test]
async fn test_dispatch_waits_when_saturated() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.worker.external_driver = false;
    let harness = TestHarness::with_config(config);

    let busy = harness.add_file("busy.webm", "video/webm", b"busy");
    let task = harness.tasks.insert(busy.id).unwrap();
    harness.tasks.claim(task.id).unwrap().unwrap();
    harness.add_file("next.webm", "video/webm", b"next");

    let report = discovery(&harness).run().await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(harness.converter.conversion_count().await, 0);
}
