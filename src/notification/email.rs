//! Email notifier over an authenticated SMTP relay.

use crate::config::SmtpConfig;
use crate::core::{DeliveryReceipt, Notifier, NotifyError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, instrument};

/// Sends each alert as a plain-text email. The transport is shared by all
/// concurrent sends; each send opens its own SMTP connection.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
}

impl SmtpNotifier {
    /// Builds the transport from configuration. Credentials come from the
    /// environment via the config layer (`SENDER_EMAIL`, `SENDER_PASS`).
    pub fn from_config(config: &SmtpConfig, timeout: Duration) -> Result<Self> {
        let from: Mailbox = config
            .sender()
            .parse()
            .context("Invalid sender email address")?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.relay)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.relay)
        }
        .context("Failed to create SMTP transport")?;

        let mailer = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            mailer,
            from,
            subject: config.subject.clone(),
        })
    }

    fn build_message(&self, recipient: &str, body: &str) -> Result<Message, NotifyError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
                address: recipient.to_string(),
                reason: e.to_string(),
            })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

/// Reply code followed by every line of the relay's reply text.
fn receipt(response: &Response) -> String {
    format!(
        "{} {}",
        response.code(),
        response.message().collect::<Vec<_>>().join(" ")
    )
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    #[instrument(skip(self, message))]
    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, NotifyError> {
        let email = self.build_message(recipient, message)?;

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let receipt = receipt(&response);
        debug!(receipt = %receipt, "SMTP relay accepted message");
        Ok(DeliveryReceipt(receipt))
    }
}
