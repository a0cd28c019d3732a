//! One alert cycle: read → evaluate → resolve recipients → dispatch.
//!
//! Each step depends on the previous one, so they run strictly in order.
//! Store queries are bounded by a timeout; sends are bounded by the
//! dispatcher. Nothing here retries.

use crate::cooldown::AlertCooldown;
use crate::core::{
    Alert, DirectoryError, DispatchOutcome, Reading, ReadingSource, SourceError,
    SubscriberDirectory,
};
use crate::internal_metrics::Metrics;
use crate::notification::NotificationDispatcher;
use crate::rules::{self, ThresholdRule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// What a completed cycle did.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleReport {
    /// The reading store is empty.
    NoReading,
    /// The latest reading is inside the bounds.
    WithinBounds { reading: Reading },
    /// The alert was sent recently and is still cooling down.
    Suppressed {
        alert: Alert,
        last_sent: DateTime<Utc>,
    },
    /// Nobody is opted in.
    NoSubscribers { alert: Alert },
    Dispatched {
        alert: Alert,
        outcomes: Vec<DispatchOutcome>,
    },
}

impl CycleReport {
    /// Short label used for logs and the `cycles_total` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            CycleReport::NoReading => "no_reading",
            CycleReport::WithinBounds { .. } => "within_bounds",
            CycleReport::Suppressed { .. } => "suppressed",
            CycleReport::NoSubscribers { .. } => "no_subscribers",
            CycleReport::Dispatched { .. } => "dispatched",
        }
    }

    pub fn alert(&self) -> Option<&Alert> {
        match self {
            CycleReport::Suppressed { alert, .. }
            | CycleReport::NoSubscribers { alert }
            | CycleReport::Dispatched { alert, .. } => Some(alert),
            CycleReport::NoReading | CycleReport::WithinBounds { .. } => None,
        }
    }

    pub fn outcomes(&self) -> &[DispatchOutcome] {
        match self {
            CycleReport::Dispatched { outcomes, .. } => outcomes,
            _ => &[],
        }
    }
}

/// Why a cycle stopped early. Every variant is contained by the scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },
}

impl CycleError {
    /// True when the latest reading could not be interpreted.
    pub fn is_malformed_data(&self) -> bool {
        matches!(self, CycleError::Source(SourceError::Malformed(_)))
    }

    fn metric_label(&self) -> &'static str {
        if self.is_malformed_data() {
            "malformed"
        } else {
            "error"
        }
    }
}

/// The alert pipeline with all of its collaborators injected.
pub struct AlertPipeline {
    source: Arc<dyn ReadingSource>,
    directory: Arc<dyn SubscriberDirectory>,
    dispatcher: NotificationDispatcher,
    rule: ThresholdRule,
    cooldown: Option<AlertCooldown>,
    query_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl AlertPipeline {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        directory: Arc<dyn SubscriberDirectory>,
        dispatcher: NotificationDispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            directory,
            dispatcher,
            rule: ThresholdRule::SOIL_MOISTURE,
            cooldown: None,
            query_timeout: Duration::from_secs(10),
            metrics,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Option<AlertCooldown>) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Runs one cycle and records its outcome in the metrics.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let start = Instant::now();
        let result = self.execute().await;
        self.metrics.cycle_duration_seconds.record(start.elapsed());

        match &result {
            Ok(report) => self.metrics.increment_cycle(report.outcome()),
            Err(e) => self.metrics.increment_cycle(e.metric_label()),
        }
        result
    }

    async fn execute(&self) -> Result<CycleReport, CycleError> {
        let reading = match self.bounded("reading query", self.source.latest()).await? {
            Some(reading) => reading,
            None => {
                debug!("No readings stored yet; nothing to evaluate.");
                return Ok(CycleReport::NoReading);
            }
        };
        self.metrics.set_latest_moisture(reading.moisture);

        let alert = match rules::evaluate(&reading, &self.rule) {
            Some(alert) => alert,
            None => {
                debug!(moisture = reading.moisture, "Latest reading within bounds.");
                return Ok(CycleReport::WithinBounds { reading });
            }
        };
        self.metrics.increment_alert(alert.kind.as_str());
        info!(
            kind = %alert.kind,
            device = %alert.reading.device_id,
            moisture = alert.reading.moisture,
            "Threshold breached"
        );

        if let Some(cooldown) = &self.cooldown {
            if let Some(last_sent) = cooldown.last_sent(&alert).await {
                self.metrics.alerts_suppressed_total.increment(1);
                info!(key = %alert.state_key(), %last_sent, "Alert still cooling down; not resending.");
                return Ok(CycleReport::Suppressed { alert, last_sent });
            }
        }

        let recipients = self
            .bounded("subscriber query", self.directory.list_opted_in())
            .await?;
        if recipients.is_empty() {
            warn!(kind = %alert.kind, "Alert raised but no subscribers are opted in.");
            return Ok(CycleReport::NoSubscribers { alert });
        }

        let outcomes = self.dispatcher.send_all(&alert, &recipients).await;

        if let Some(cooldown) = &self.cooldown {
            if outcomes.iter().any(|o| o.success) {
                cooldown.record_sent(&alert).await;
                self.metrics.set_cooldown_entries(cooldown.entry_count());
            }
        }

        Ok(CycleReport::Dispatched { alert, outcomes })
    }

    async fn bounded<T, E, F>(&self, stage: &'static str, fut: F) -> Result<T, CycleError>
    where
        F: Future<Output = Result<T, E>>,
        CycleError: From<E>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(CycleError::from),
            Err(_) => Err(CycleError::Timeout {
                stage,
                timeout: self.query_timeout,
            }),
        }
    }
}
