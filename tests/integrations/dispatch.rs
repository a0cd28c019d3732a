//! Fan-out behavior of the notification dispatcher.

use chrono::Utc;
use soilwatch::{
    config::DispatchConfig,
    internal_metrics::Metrics,
    notification::{LogNotifier, NotificationDispatcher},
    rules::{evaluate, ThresholdRule},
    test_utils::RecordingNotifier,
    Alert, Reading,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn alert() -> Alert {
    evaluate(
        &Reading::new("field-7", Utc::now(), 50.0),
        &ThresholdRule::SOIL_MOISTURE,
    )
    .unwrap()
}

fn recipients(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user{}@example.com", i)).collect()
}

fn dispatcher(notifier: RecordingNotifier, concurrency: usize) -> NotificationDispatcher {
    let config = DispatchConfig {
        concurrency,
        send_timeout_seconds: 5,
    };
    NotificationDispatcher::new(
        Arc::new(notifier),
        &config,
        Arc::new(Metrics::new_for_test()),
    )
}

#[tokio::test]
async fn test_second_of_three_failing_yields_one_failure() {
    let list = recipients(3);
    let notifier = RecordingNotifier::failing_for([list[1].clone()]);

    let outcomes = dispatcher(notifier.clone(), 8).send_all(&alert(), &list).await;

    assert_eq!(notifier.sent().len(), 3);
    assert_eq!(outcomes.len(), 3);
    let failures: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].recipient, list[1]);
    assert!(failures[0].receipt.is_none());
    assert_eq!(
        outcomes[0].receipt.as_deref(),
        Some("250 queued for user0@example.com")
    );
}

#[tokio::test]
async fn test_outcomes_keep_recipient_order_under_uneven_latency() {
    let list = recipients(4);
    let notifier = RecordingNotifier::new()
        .with_delay_for(&list[0], Duration::from_millis(150))
        .with_delay_for(&list[2], Duration::from_millis(50));

    let outcomes = dispatcher(notifier.clone(), 4).send_all(&alert(), &list).await;

    let order: Vec<_> = outcomes.iter().map(|o| o.recipient.clone()).collect();
    assert_eq!(order, list);
    // Faster sends completed before the slow first one.
    assert_ne!(notifier.sent()[0].0, list[0]);
}

#[tokio::test]
async fn test_sends_run_concurrently() {
    let list = recipients(5);
    let mut notifier = RecordingNotifier::new();
    for r in &list {
        notifier = notifier.with_delay_for(r, Duration::from_millis(200));
    }

    let start = Instant::now();
    let outcomes = dispatcher(notifier, 5).send_all(&alert(), &list).await;

    assert!(outcomes.iter().all(|o| o.success));
    assert!(
        start.elapsed() < Duration::from_millis(800),
        "sends looked sequential: {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_slow_send_times_out_without_blocking_others() {
    let list = recipients(3);
    let notifier = RecordingNotifier::new().with_delay_for(&list[0], Duration::from_secs(10));

    let outcomes = dispatcher(notifier.clone(), 3)
        .with_send_timeout(Duration::from_millis(100))
        .send_all(&alert(), &list)
        .await;

    assert!(!outcomes[0].success);
    assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
    assert!(outcomes[1].success && outcomes[2].success);
}

#[tokio::test]
async fn test_empty_recipient_list_sends_nothing() {
    let notifier = RecordingNotifier::new();
    let outcomes = dispatcher(notifier.clone(), 2).send_all(&alert(), &[]).await;
    assert!(outcomes.is_empty());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_log_notifier_delivers_everything() {
    let dispatcher = NotificationDispatcher::new(
        Arc::new(LogNotifier::new()),
        &DispatchConfig {
            concurrency: 2,
            send_timeout_seconds: 1,
        },
        Arc::new(Metrics::new_for_test()),
    );
    let outcomes = dispatcher.send_all(&alert(), &recipients(2)).await;
    assert!(outcomes.iter().all(|o| o.success));
}
