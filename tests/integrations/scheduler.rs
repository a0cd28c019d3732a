//! Tick handling: containment of failures, skip-on-overlap, and shutdown.

use async_trait::async_trait;
use soilwatch::{
    config::ScheduleConfig,
    internal_metrics::Metrics,
    scheduler::{AlertScheduler, Cadence, Tick},
    test_utils::{FakeDirectory, FakeReadingSource, RecordingNotifier},
    Reading, ReadingSource, SourceError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{reading, Fakes};

fn every_second() -> Cadence {
    Cadence::from_config(&ScheduleConfig {
        cron: "* * * * * *".to_string(),
        timezone: "Asia/Kolkata".to_string(),
    })
    .unwrap()
}

fn scheduler(fakes: &Fakes) -> AlertScheduler {
    AlertScheduler::new(
        Arc::new(fakes.pipeline()),
        every_second(),
        Arc::new(Metrics::new_for_test()),
    )
}

async fn finish(tick: Tick) {
    match tick {
        Tick::Started(handle) => handle.await.expect("cycle task must not panic"),
        Tick::Skipped => panic!("expected the tick to start a cycle"),
    }
}

struct PanickingSource;

#[async_trait]
impl ReadingSource for PanickingSource {
    async fn latest(&self) -> Result<Option<Reading>, SourceError> {
        panic!("driver bug");
    }
}

#[tokio::test]
async fn test_failed_cycle_does_not_stop_later_ticks() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::failing("too many connections"),
        RecordingNotifier::new(),
    );
    let scheduler = scheduler(&fakes);

    finish(scheduler.tick()).await;
    assert!(fakes.notifier.sent().is_empty());

    fakes
        .directory
        .set_result(Ok(vec!["a@example.com".to_string()]));
    finish(scheduler.tick()).await;

    assert_eq!(fakes.directory.calls(), 2);
    assert_eq!(fakes.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_tick_during_running_cycle_is_skipped() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["slow@example.com"]),
        RecordingNotifier::new().with_delay_for("slow@example.com", Duration::from_millis(300)),
    );
    let scheduler = scheduler(&fakes);

    let first = scheduler.tick();
    assert!(!first.is_skipped());
    assert!(scheduler.tick().is_skipped());

    finish(first).await;
    finish(scheduler.tick()).await;

    assert_eq!(fakes.source.calls(), 2);
    assert_eq!(fakes.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_panicking_cycle_is_contained() {
    let fakes = Fakes::new(
        FakeReadingSource::empty(),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );
    let metrics = Arc::new(Metrics::new_for_test());
    let dispatcher = soilwatch::notification::NotificationDispatcher::new(
        Arc::new(fakes.notifier.clone()),
        &soilwatch::config::Config::default().dispatch,
        metrics.clone(),
    );
    let pipeline = soilwatch::pipeline::AlertPipeline::new(
        Arc::new(PanickingSource),
        Arc::new(fakes.directory.clone()),
        dispatcher,
        metrics.clone(),
    );
    let scheduler = AlertScheduler::new(Arc::new(pipeline), every_second(), metrics);

    finish(scheduler.tick()).await;
    // The guard was released, so the next tick starts normally.
    finish(scheduler.tick()).await;
}

#[tokio::test]
async fn test_run_fires_on_cadence_until_shutdown() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(800.0)),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler(&fakes).run(shutdown_rx));

    fakes
        .notifier
        .wait_for_sends(2, Duration::from_secs(5))
        .await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(fakes.source.calls() >= 2);
}
