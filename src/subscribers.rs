//! Opted-in subscriber lookup against the MySQL user table.

use crate::config::SubscribersConfig;
use crate::core::{DirectoryError, SubscriberDirectory};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Value of `email_alert` for users who want alerts.
pub const ALERT_OPT_IN_ACTIVE: &str = "active";

/// Non-deleted users with an active opt-in, oldest account first.
const OPTED_IN_QUERY: &str = "SELECT email FROM user_consumer \
     WHERE email_alert = ? AND deleted_at IS NULL \
     ORDER BY id";

/// Reads opted-in addresses through a shared connection pool. The pipeline
/// only ever reads from this table.
#[derive(Clone)]
pub struct MySqlSubscriberDirectory {
    pool: MySqlPool,
}

impl MySqlSubscriberDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Builds a lazily-connecting pool; connections are opened on first use.
    pub fn connect_lazy(config: &SubscribersConfig, acquire_timeout: Duration) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);
        Self::new(pool)
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl SubscriberDirectory for MySqlSubscriberDirectory {
    #[instrument(skip_all)]
    async fn list_opted_in(&self) -> Result<Vec<String>, DirectoryError> {
        let rows: Vec<Option<String>> = sqlx::query_scalar(OPTED_IN_QUERY)
            .bind(ALERT_OPT_IN_ACTIVE)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DirectoryError::Query(e.to_string()))?;
        let emails = usable_addresses(rows);

        debug!(count = emails.len(), "Resolved opted-in subscribers");
        Ok(emails)
    }
}

/// Drops rows without an address so one bad row cannot hide everyone else.
fn usable_addresses(rows: Vec<Option<String>>) -> Vec<String> {
    let total = rows.len();
    let emails: Vec<String> = rows
        .into_iter()
        .flatten()
        .filter(|email| !email.trim().is_empty())
        .collect();
    if emails.len() < total {
        warn!(
            skipped = total - emails.len(),
            "Opted-in subscribers without an email address were skipped."
        );
    }
    emails
}
