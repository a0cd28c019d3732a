//! The main application logic, decoupled from the entry point.

use crate::{
    config::{Config, NotifierKind},
    cooldown::AlertCooldown,
    core::{Notifier, ReadingSource, SubscriberDirectory},
    internal_metrics::{Metrics, MetricsBuilder},
    notification::{LogNotifier, NotificationDispatcher, SmtpNotifier},
    pipeline::{AlertPipeline, CycleError, CycleReport},
    readings::MongoReadingSource,
    scheduler::{AlertScheduler, Cadence},
    subscribers::MySqlSubscriberDirectory,
    task_manager::TaskManager,
};
use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, instrument};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: Option<SocketAddr>,
    pipeline: Arc<AlertPipeline>,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Runs one cycle immediately, outside the schedule.
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        self.pipeline.run_cycle().await
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;
        Ok(())
    }
}

/// Builder for the main application.
///
/// Every external collaborator can be overridden, which is how the
/// integration tests run the whole application without real stores.
pub struct AppBuilder {
    config: Config,
    reading_source_override: Option<Arc<dyn ReadingSource>>,
    subscriber_directory_override: Option<Arc<dyn SubscriberDirectory>>,
    notifier_override: Option<Arc<dyn Notifier>>,
    metrics_override: Option<Metrics>,
    send_timeout_override: Option<Duration>,
    start_scheduler: bool,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            reading_source_override: None,
            subscriber_directory_override: None,
            notifier_override: None,
            metrics_override: None,
            send_timeout_override: None,
            start_scheduler: true,
        }
    }

    pub fn reading_source_override(mut self, source: Arc<dyn ReadingSource>) -> Self {
        self.reading_source_override = Some(source);
        self
    }

    pub fn subscriber_directory_override(mut self, directory: Arc<dyn SubscriberDirectory>) -> Self {
        self.subscriber_directory_override = Some(directory);
        self
    }

    pub fn notifier_override(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier_override = Some(notifier);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Overrides the per-send timeout with sub-second precision.
    pub fn send_timeout_override(mut self, timeout: Duration) -> Self {
        self.send_timeout_override = Some(timeout);
        self
    }

    /// Builds the pipeline without starting the scheduler task.
    pub fn without_scheduler(mut self) -> Self {
        self.start_scheduler = false;
        self
    }

    /// Builds and initializes all application components, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx.clone());

        // Metrics
        let (metrics, metrics_server) = match self.metrics_override {
            Some(m) => (m, None),
            None => MetricsBuilder::new(config.metrics.clone()).build(shutdown_rx.clone()),
        };
        let metrics = Arc::new(metrics);
        let metrics_addr = metrics_server.map(|(server, addr)| {
            info!("Metrics server listening on http://{}", addr);
            task_manager.spawn("MetricsServer", server.run());
            addr
        });

        // Collaborators
        let query_timeout = config.stores.query_timeout();
        let source: Arc<dyn ReadingSource> = match self.reading_source_override {
            Some(source) => source,
            None => Arc::new(MongoReadingSource::connect(&config.readings).await?),
        };
        let directory: Arc<dyn SubscriberDirectory> = match self.subscriber_directory_override {
            Some(directory) => directory,
            None => Arc::new(MySqlSubscriberDirectory::connect_lazy(
                &config.subscribers,
                query_timeout,
            )),
        };
        let send_timeout = self
            .send_timeout_override
            .unwrap_or(Duration::from_secs(config.dispatch.send_timeout_seconds));
        let notifier: Arc<dyn Notifier> = match self.notifier_override {
            Some(notifier) => notifier,
            None => match config.notifier.kind {
                NotifierKind::Smtp => {
                    Arc::new(SmtpNotifier::from_config(&config.notifier.smtp, send_timeout)?)
                }
                NotifierKind::Log => Arc::new(LogNotifier::new()),
            },
        };
        info!(notifier = notifier.name(), "Notifier ready.");

        // Pipeline
        let dispatcher = NotificationDispatcher::new(notifier, &config.dispatch, metrics.clone())
            .with_send_timeout(send_timeout);
        let pipeline = Arc::new(
            AlertPipeline::new(source, directory, dispatcher, metrics.clone())
                .with_cooldown(AlertCooldown::from_config(&config.cooldown))
                .with_query_timeout(query_timeout),
        );

        // Scheduler
        if self.start_scheduler {
            let cadence = Cadence::from_config(&config.schedule)?;
            let scheduler = AlertScheduler::new(pipeline.clone(), cadence, metrics.clone());
            task_manager.spawn("AlertScheduler", scheduler.run(shutdown_rx));
        }

        Ok(App {
            task_manager,
            metrics_addr,
            pipeline,
        })
    }
}
