//! # Internal Metrics Module
//!
//! Infrastructure for collecting and exposing alert-pipeline metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: Installs the Prometheus recorder and prepares the
//!   `MetricsServer` when metrics are enabled.
//!
//! - **`Metrics`**: A cloneable handle used by the pipeline, dispatcher and
//!   scheduler to update the predefined metrics.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   exposing `/metrics` and the `/server_status` liveness check.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub mod server;

/// The public API for the metrics system.
#[derive(Clone)]
pub struct Metrics {
    pub cycles_skipped_total: Counter,
    pub alerts_suppressed_total: Counter,
    pub cycle_duration_seconds: Histogram,
    pub notification_send_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("cycles_total", Unit::Count, "Alert cycles run, labeled by outcome.");
        metrics::describe_counter!("cycles_skipped_total", Unit::Count, "Scheduler ticks skipped because the previous cycle was still running.");
        metrics::describe_histogram!("cycle_duration_seconds", Unit::Seconds, "Wall-clock duration of one alert cycle.");
        metrics::describe_counter!("alerts_triggered_total", Unit::Count, "Alerts produced by threshold evaluation, labeled by kind.");
        metrics::describe_counter!("alerts_suppressed_total", Unit::Count, "Alerts withheld because they were still cooling down.");
        metrics::describe_counter!("notifications_total", Unit::Count, "Per-recipient send attempts, labeled by status.");
        metrics::describe_histogram!("notification_send_duration_seconds", Unit::Seconds, "Latency of a single notification send.");
        metrics::describe_gauge!("latest_moisture_value", "Moisture value of the most recently evaluated reading.");
        metrics::describe_gauge!("cooldown_entries", Unit::Count, "Alert keys currently cooling down.");

        Self {
            cycles_skipped_total: metrics::counter!("cycles_skipped_total"),
            alerts_suppressed_total: metrics::counter!("alerts_suppressed_total"),
            cycle_duration_seconds: metrics::histogram!("cycle_duration_seconds"),
            notification_send_duration_seconds: metrics::histogram!("notification_send_duration_seconds"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    pub fn disabled() -> Self {
        Self {
            cycles_skipped_total: Counter::noop(),
            alerts_suppressed_total: Counter::noop(),
            cycle_duration_seconds: Histogram::noop(),
            notification_send_duration_seconds: Histogram::noop(),
        }
    }

    /// Increments the cycle counter for an outcome (e.g. "dispatched", "error").
    pub fn increment_cycle(&self, outcome: &'static str) {
        metrics::counter!("cycles_total", "outcome" => outcome).increment(1);
    }

    pub fn increment_alert(&self, kind: &'static str) {
        metrics::counter!("alerts_triggered_total", "kind" => kind).increment(1);
    }

    pub fn increment_notification(&self, status: &'static str) {
        metrics::counter!("notifications_total", "status" => status).increment(1);
    }

    pub fn set_latest_moisture(&self, value: f64) {
        metrics::gauge!("latest_moisture_value").set(value);
    }

    pub fn set_cooldown_entries(&self, entries: u64) {
        metrics::gauge!("cooldown_entries").set(entries as f64);
    }

    /// Creates a `Metrics` instance suitable for testing. Without an
    /// installed recorder every handle is a no-op.
    pub fn new_for_test() -> Self {
        Self::new()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer` with the address it is bound to.
    ///
    /// If metrics are disabled, or the listener or recorder cannot be set
    /// up, this returns a disabled `Metrics` instance and `None`.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!("Invalid histogram buckets: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        // The listener must be non-blocking to be used with Tokio.
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to register metrics listener: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);
        (metrics, Some((server, addr)))
    }
}
