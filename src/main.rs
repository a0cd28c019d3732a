//! Soilwatch - periodic soil-moisture alerting service.

use anyhow::Result;
use clap::Parser;
use soilwatch::{
    app::App,
    cli::Cli,
    config::{Config, NotifierKind},
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            let _ = tracing_subscriber::fmt().try_init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Soilwatch starting up...");
    log_config_summary(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if cli.once {
        let app = App::builder(config)
            .without_scheduler()
            .build(shutdown_rx)
            .await?;
        let result = app.run_once().await;
        let _ = shutdown_tx.send(true);
        app.run().await?;
        let report = result?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let app = App::builder(config).build(shutdown_rx).await?;
    info!("Soilwatch initialized. Waiting for the next alert cycle...");

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down."),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("Soilwatch shut down. Exiting.");
    Ok(())
}

/// Logs the effective configuration. Credentials are never printed.
fn log_config_summary(config: &Config) {
    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_level);
    info!(
        "Schedule: '{}' ({})",
        config.schedule.cron, config.schedule.timezone
    );
    info!(
        "Readings: {}.{} (newest by '{}')",
        config.readings.database, config.readings.collection, config.readings.timestamp_field
    );
    info!(
        "Subscribers: {}@{}:{}/{}",
        config.subscribers.user,
        config.subscribers.host,
        config.subscribers.port,
        config.subscribers.database
    );
    info!("Store Query Timeout: {}s", config.stores.query_timeout_seconds);
    match config.notifier.kind {
        NotifierKind::Smtp => info!(
            "Notifier: SMTP via {}:{} as {}",
            config.notifier.smtp.relay,
            config.notifier.smtp.port,
            config.notifier.smtp.sender()
        ),
        NotifierKind::Log => info!("Notifier: log only (dry run)"),
    }
    info!(
        "Dispatch: concurrency {}, send timeout {}s",
        config.dispatch.concurrency, config.dispatch.send_timeout_seconds
    );
    if config.cooldown.enabled {
        info!("Cooldown: {}s", config.cooldown.window_seconds);
    } else {
        info!("Cooldown: Disabled");
    }
    if config.metrics.enabled {
        info!("Metrics: {}", config.metrics.listen_address);
    } else {
        info!("Metrics: Disabled");
    }
    info!("-------------------------------------------------------");
}
