//! Test helpers for running the full application instance.

use anyhow::Result;
use soilwatch::{
    app::App,
    config::{Config, NotifierKind},
    internal_metrics::Metrics,
    test_utils::{FakeDirectory, FakeReadingSource, RecordingNotifier},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};

/// A running application plus the fakes it was built over.
pub struct TestApp {
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    pub source: FakeReadingSource,
    pub directory: FakeDirectory,
    pub notifier: RecordingNotifier,
    metrics_addr: Option<SocketAddr>,
}

impl TestApp {
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
            .expect("Metrics must be enabled to get the address")
    }

    /// Shuts down the application and waits for it to terminate.
    /// Fails if the application does not shut down within the specified timeout.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .expect("Failed to send shutdown signal");

        if let Some(handle) = self.app_handle {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}

pub struct TestAppBuilder {
    pub config: Config,
    source: FakeReadingSource,
    directory: FakeDirectory,
    notifier: RecordingNotifier,
    use_real_metrics: bool,
}

impl TestAppBuilder {
    /// Defaults to a cycle every second and the log notifier, so nothing
    /// leaves the process.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.schedule.cron = "* * * * * *".to_string();
        config.notifier.kind = NotifierKind::Log;
        config.stores.query_timeout_seconds = 2;

        Self {
            config,
            source: FakeReadingSource::empty(),
            directory: FakeDirectory::with_subscribers(Vec::<String>::new()),
            notifier: RecordingNotifier::new(),
            use_real_metrics: false,
        }
    }

    pub fn with_source(mut self, source: FakeReadingSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_directory(mut self, directory: FakeDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_metrics(mut self) -> Self {
        self.use_real_metrics = true;
        self.config.metrics.enabled = true;
        self.config.metrics.listen_address = "127.0.0.1:0".parse().unwrap();
        self
    }

    pub async fn build(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut builder = App::builder(self.config)
            .reading_source_override(Arc::new(self.source.clone()))
            .subscriber_directory_override(Arc::new(self.directory.clone()))
            .notifier_override(Arc::new(self.notifier.clone()));
        if !self.use_real_metrics {
            builder = builder.metrics_override(Metrics::new_for_test());
        }

        let app = builder.build(shutdown_rx).await?;
        let metrics_addr = app.metrics_addr();
        let app_handle = tokio::spawn(app.run());

        Ok(TestApp {
            shutdown_tx,
            app_handle: Some(app_handle),
            source: self.source,
            directory: self.directory,
            notifier: self.notifier,
            metrics_addr,
        })
    }
}
