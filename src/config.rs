//! Configuration management for soilwatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer, in increasing priority: built-in defaults, a
//! `soilwatch.toml` file, the environment variables of the legacy deployment
//! (`MONGODB_URI`, `DB_HOST`, `SENDER_EMAIL`, ...), `SOILWATCH_`-prefixed
//! environment variables, and finally command-line arguments.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub use crate::cli::Cli;

/// Config file read when `--config` is not given. Its absence is not an error.
pub const DEFAULT_CONFIG_FILE: &str = "soilwatch.toml";

/// Every half hour, on the hour and half hour (seconds field first).
pub const DEFAULT_CRON: &str = "0 */30 * * * *";
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

/// Plain environment variables from earlier deployments and the config keys
/// they populate.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("MONGODB_URI", "readings.uri"),
    ("DB_HOST", "subscribers.host"),
    ("DB_PORT", "subscribers.port"),
    ("DB_USER", "subscribers.user"),
    ("DB_PASSWORD", "subscribers.password"),
    ("DB_NAME", "subscribers.database"),
    ("SENDER_EMAIL", "notifier.smtp.username"),
    ("SENDER_PASS", "notifier.smtp.password"),
];

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// The logging level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// When alert cycles fire.
    pub schedule: ScheduleConfig,
    /// The document store holding sensor readings.
    pub readings: ReadingsConfig,
    /// The relational store holding users and their alert preferences.
    pub subscribers: SubscribersConfig,
    /// Settings shared by both store clients.
    pub stores: StoresConfig,
    /// The transport used to deliver alerts.
    pub notifier: NotifierConfig,
    /// Fan-out settings for a single alert.
    pub dispatch: DispatchConfig,
    /// Optional suppression of repeated alerts.
    pub cooldown: CooldownConfig,
    /// Prometheus exporter and status endpoint.
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Six-field cron expression (sec min hour day month weekday).
    pub cron: String,
    /// IANA timezone the cron expression is evaluated in.
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReadingsConfig {
    /// MongoDB connection string.
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Field the latest-first sort is applied to.
    pub timestamp_field: String,
    pub moisture_field: String,
    /// Optional device identifier field; records without it use `default_device_id`.
    pub device_field: String,
    pub default_device_id: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SubscribersConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Upper bound on pooled connections held by the pipeline.
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoresConfig {
    /// Upper bound on any single store query.
    pub query_timeout_seconds: u64,
}

impl StoresConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

/// Which `Notifier` implementation delivers alerts.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Email over an authenticated SMTP relay.
    Smtp,
    /// Log every message instead of sending it.
    Log,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SmtpConfig {
    /// SMTP relay host, e.g. `smtp.gmail.com`.
    pub relay: String,
    pub port: u16,
    /// Use STARTTLS on `port` instead of implicit TLS.
    pub starttls: bool,
    pub username: String,
    pub password: String,
    /// Sender address; defaults to `username` when unset.
    pub from: Option<String>,
    pub subject: String,
}

impl SmtpConfig {
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Maximum number of sends in flight for one alert.
    pub concurrency: usize,
    /// Upper bound on a single send.
    pub send_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CooldownConfig {
    /// When false, every breaching cycle notifies every subscriber.
    pub enabled: bool,
    /// How long an alert for the same device and kind stays suppressed.
    pub window_seconds: u64,
    /// Maximum number of tracked alert keys.
    pub capacity: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Config {
    /// Loads the configuration using the sources described in the module docs.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config: Config = Self::figment(cli)?.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the layered figment without extracting it.
    pub fn figment(cli: &Cli) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        match &cli.config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found at specified path: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }

        Ok(figment
            .merge(legacy_env())
            // e.g. SOILWATCH_DISPATCH__CONCURRENCY=4
            .merge(Env::prefixed("SOILWATCH_").split("__"))
            .merge(cli.clone()))
    }

    /// Checks settings that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        crate::scheduler::Cadence::from_config(&self.schedule)?;

        if self.dispatch.concurrency == 0 {
            bail!("dispatch.concurrency must be at least 1");
        }
        if self.dispatch.send_timeout_seconds == 0 {
            bail!("dispatch.send_timeout_seconds must be at least 1");
        }
        if self.stores.query_timeout_seconds == 0 {
            bail!("stores.query_timeout_seconds must be at least 1");
        }
        if self.cooldown.enabled && self.cooldown.window_seconds == 0 {
            bail!("cooldown.window_seconds must be positive when the cooldown is enabled");
        }
        if self.notifier.kind == NotifierKind::Smtp && self.notifier.smtp.sender().is_empty() {
            bail!("an SMTP sender is required: set SENDER_EMAIL or notifier.smtp.username");
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("unknown timezone '{}'", self.schedule.timezone))
    }
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV_KEYS.iter().map(|(name, _)| *name).collect();
    Env::raw().only(&names).map(legacy_key)
}

fn legacy_key(key: &UncasedStr) -> Uncased<'_> {
    LEGACY_ENV_KEYS
        .iter()
        .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
        .map(|(_, path)| Uncased::from(*path))
        .unwrap_or_else(|| Uncased::from(key.as_str().to_owned()))
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            schedule: ScheduleConfig {
                cron: DEFAULT_CRON.to_string(),
                timezone: DEFAULT_TIMEZONE.to_string(),
            },
            readings: ReadingsConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "smart_agriculture".to_string(),
                collection: "sensor_data".to_string(),
                timestamp_field: "timestamp".to_string(),
                moisture_field: "soil_moisture".to_string(),
                device_field: "device_id".to_string(),
                default_device_id: "default".to_string(),
            },
            subscribers: SubscribersConfig {
                host: "localhost".to_string(),
                port: 25060,
                user: "root".to_string(),
                password: String::new(),
                database: "smart_agriculture".to_string(),
                max_connections: 10,
            },
            stores: StoresConfig {
                query_timeout_seconds: 10,
            },
            notifier: NotifierConfig {
                kind: NotifierKind::Smtp,
                smtp: SmtpConfig {
                    relay: "smtp.gmail.com".to_string(),
                    port: 465,
                    starttls: false,
                    username: String::new(),
                    password: String::new(),
                    from: None,
                    subject: "Soil Moisture Alert".to_string(),
                },
            },
            dispatch: DispatchConfig {
                concurrency: 8,
                send_timeout_seconds: 30,
            },
            cooldown: CooldownConfig {
                enabled: false,
                window_seconds: 6 * 3600,
                capacity: 1024,
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_address: ([127, 0, 0, 1], 9464).into(),
            },
        }
    }
}
