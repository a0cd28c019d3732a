//! A notifier that logs alerts instead of delivering them.
//!
//! Selected with `--dry-run` or `notifier.kind = "log"`; useful to validate
//! the pipeline against real stores without emailing anyone.

use crate::core::{DeliveryReceipt, Notifier, NotifyError};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, NotifyError> {
        info!(recipient = %recipient, "[dry-run] {}", message);
        Ok(DeliveryReceipt("logged".to_string()))
    }
}
