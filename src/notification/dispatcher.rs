//! Fans a single alert out to every resolved recipient.

use crate::config::DispatchConfig;
use crate::core::{Alert, DispatchOutcome, Notifier, NotifyError};
use crate::internal_metrics::Metrics;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

/// Sends one alert to many recipients. Each send runs in its own task with
/// its own timeout, so a failing, slow or panicking send only affects the
/// outcome for that recipient.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    concurrency: usize,
    send_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &DispatchConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            notifier,
            concurrency: config.concurrency.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_seconds),
            metrics,
        }
    }

    /// Overrides the per-send timeout.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Sends `alert.message` to every recipient and returns one outcome per
    /// recipient, in recipient order. Never short-circuits on failure.
    #[instrument(skip_all, fields(kind = %alert.kind, recipients = recipients.len(), notifier = self.notifier.name()))]
    pub async fn send_all(&self, alert: &Alert, recipients: &[String]) -> Vec<DispatchOutcome> {
        let message: Arc<str> = Arc::from(alert.message.as_str());

        let sends: Vec<_> = recipients
            .iter()
            .map(|recipient| self.send_one(recipient.clone(), message.clone()))
            .collect();
        let outcomes: Vec<DispatchOutcome> = stream::iter(sends)
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.success).count();
        info!(
            delivered = outcomes.len() - failed,
            failed,
            "Dispatch round finished"
        );
        outcomes
    }

    async fn send_one(&self, recipient: String, message: Arc<str>) -> DispatchOutcome {
        let notifier = self.notifier.clone();
        let send_timeout = self.send_timeout;
        let to = recipient.clone();
        let start = Instant::now();

        let task = tokio::spawn(async move {
            match tokio::time::timeout(send_timeout, notifier.send(&to, &message)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(send_timeout)),
            }
        });
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(NotifyError::Transport(format!("send task failed: {}", e))),
        };
        self.metrics
            .notification_send_duration_seconds
            .record(start.elapsed());

        match result {
            Ok(receipt) => {
                info!(recipient = %recipient, receipt = %receipt.0, "Alert delivered");
                self.metrics.increment_notification("delivered");
                DispatchOutcome::delivered(&recipient, receipt)
            }
            Err(e) => {
                error!(recipient = %recipient, error = %e, "Failed to deliver alert");
                self.metrics.increment_notification("failed");
                DispatchOutcome::failed(&recipient, &e)
            }
        }
    }
}
