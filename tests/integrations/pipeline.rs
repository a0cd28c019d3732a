//! End-to-end behavior of a single alert cycle over in-memory stores.

use soilwatch::{
    config::Config,
    cooldown::AlertCooldown,
    pipeline::{CycleError, CycleReport},
    test_utils::{FakeDirectory, FakeReadingSource, RecordingNotifier},
    AlertKind, DirectoryError, Severity, SourceError,
};
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{reading, Fakes, CLOGGING_MESSAGE_AT_50};

#[tokio::test]
async fn test_no_reading_skips_directory_and_dispatch() {
    let fakes = Fakes::new(
        FakeReadingSource::empty(),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );

    let report = fakes.pipeline().run_cycle().await.unwrap();

    assert_eq!(report, CycleReport::NoReading);
    assert_eq!(fakes.source.calls(), 1);
    assert_eq!(fakes.directory.calls(), 0);
    assert!(fakes.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_empty_directory_never_dispatches() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(Vec::<String>::new()),
        RecordingNotifier::new(),
    );

    let report = fakes.pipeline().run_cycle().await.unwrap();

    assert_eq!(report.outcome(), "no_subscribers");
    assert_eq!(fakes.directory.calls(), 1);
    assert!(fakes.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_clogging_alert_reaches_every_subscriber() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["a@example.com", "b@example.com"]),
        RecordingNotifier::new(),
    );

    let report = fakes.pipeline().run_cycle().await.unwrap();

    let alert = report.alert().expect("alert expected");
    assert_eq!(alert.kind, AlertKind::WaterClogging);
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.message, CLOGGING_MESSAGE_AT_50);

    let sent = fakes.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, message)| message == CLOGGING_MESSAGE_AT_50));
}

#[tokio::test]
async fn test_dryness_alert_for_high_reading() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(800.0)),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );

    let report = fakes.pipeline().run_cycle().await.unwrap();

    assert_eq!(report.alert().unwrap().kind, AlertKind::SoilDryness);
    assert_eq!(
        fakes.notifier.sent()[0].1,
        "Soil Dryness Alert: Soil moisture level is 800. Please water the soil."
    );
}

#[tokio::test]
async fn test_boundary_readings_do_not_alert() {
    for moisture in [100.0, 400.0, 750.0] {
        let fakes = Fakes::new(
            FakeReadingSource::with_reading(reading(moisture)),
            FakeDirectory::with_subscribers(["a@example.com"]),
            RecordingNotifier::new(),
        );
        let report = fakes.pipeline().run_cycle().await.unwrap();
        assert_eq!(report.outcome(), "within_bounds", "moisture {}", moisture);
        assert_eq!(fakes.directory.calls(), 0);
    }
}

#[tokio::test]
async fn test_one_failing_recipient_does_not_abort_siblings() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["a@example.com", "b@example.com", "c@example.com"]),
        RecordingNotifier::failing_for(["b@example.com"]),
    );

    let report = fakes.pipeline().run_cycle().await.unwrap();

    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| !o.success).count(), 1);
    assert_eq!(outcomes[1].recipient, "b@example.com");
    assert!(!outcomes[1].success);
    assert!(outcomes[1].error.as_deref().unwrap().contains("unavailable"));
    assert!(outcomes[0].success && outcomes[2].success);
}

#[tokio::test]
async fn test_directory_failure_aborts_cycle_and_next_cycle_recovers() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::failing("connection refused"),
        RecordingNotifier::new(),
    );
    let pipeline = fakes.pipeline();

    let err = pipeline.run_cycle().await.unwrap_err();
    assert_eq!(
        err,
        CycleError::Directory(DirectoryError::Query("connection refused".into()))
    );
    assert!(fakes.notifier.sent().is_empty());

    fakes
        .directory
        .set_result(Ok(vec!["a@example.com".to_string()]));
    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.outcomes().len(), 1);
    assert_eq!(fakes.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_source_failure_is_contained() {
    let fakes = Fakes::new(
        FakeReadingSource::with_result(Err(SourceError::Query("server selection timeout".into()))),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );

    let err = fakes.pipeline().run_cycle().await.unwrap_err();

    assert!(!err.is_malformed_data());
    assert_eq!(fakes.directory.calls(), 0);
}

#[tokio::test]
async fn test_malformed_reading_skips_cycle() {
    let fakes = Fakes::new(
        FakeReadingSource::with_result(Err(SourceError::Malformed(
            "field 'soil_moisture' is missing".into(),
        ))),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );

    let err = fakes.pipeline().run_cycle().await.unwrap_err();

    assert!(err.is_malformed_data());
    assert_eq!(fakes.directory.calls(), 0);
    assert!(fakes.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_consecutive_breaching_cycles_each_dispatch() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["a@example.com", "b@example.com"]),
        RecordingNotifier::new(),
    );
    let pipeline = fakes.pipeline();

    let first = pipeline.run_cycle().await.unwrap();
    let second = pipeline.run_cycle().await.unwrap();

    assert_eq!(first.outcome(), "dispatched");
    assert_eq!(second.outcome(), "dispatched");
    assert_eq!(fakes.directory.calls(), 2);
    assert_eq!(fakes.notifier.sent().len(), 4);
}

#[tokio::test]
async fn test_cooldown_suppresses_repeat_alert() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );
    let pipeline = fakes
        .pipeline()
        .with_cooldown(Some(AlertCooldown::new(Duration::from_secs(60), 16)));

    assert_eq!(pipeline.run_cycle().await.unwrap().outcome(), "dispatched");
    let second = pipeline.run_cycle().await.unwrap();

    assert!(matches!(second, CycleReport::Suppressed { .. }));
    assert_eq!(fakes.directory.calls(), 1);
    assert_eq!(fakes.notifier.sent().len(), 1);

    // A different breach kind on the same device is not suppressed.
    fakes.source.set_result(Ok(Some(reading(900.0))));
    assert_eq!(pipeline.run_cycle().await.unwrap().outcome(), "dispatched");
}

#[tokio::test]
async fn test_cooldown_not_started_when_every_send_fails() {
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::failing_for(["a@example.com"]),
    );
    let pipeline = fakes
        .pipeline()
        .with_cooldown(Some(AlertCooldown::new(Duration::from_secs(60), 16)));

    pipeline.run_cycle().await.unwrap();
    let second = pipeline.run_cycle().await.unwrap();

    assert_eq!(second.outcome(), "dispatched");
    assert_eq!(fakes.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_slow_reading_store_times_out() {
    let mut config = Config::default();
    config.stores.query_timeout_seconds = 1;
    let fakes = Fakes::new(
        FakeReadingSource::with_reading(reading(50.0)).with_delay(Duration::from_secs(3)),
        FakeDirectory::with_subscribers(["a@example.com"]),
        RecordingNotifier::new(),
    );

    let err = fakes.pipeline_with(&config).run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::Timeout { .. }));
    assert!(fakes.notifier.sent().is_empty());
}
