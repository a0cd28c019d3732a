//! In-memory collaborators for exercising the pipeline without real stores.

use crate::core::{
    DeliveryReceipt, DirectoryError, Notifier, NotifyError, Reading, ReadingSource, SourceError,
    SubscriberDirectory,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A reading source returning a scripted result and counting queries.
#[derive(Debug, Clone)]
pub struct FakeReadingSource {
    result: Arc<Mutex<Result<Option<Reading>, SourceError>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl FakeReadingSource {
    pub fn empty() -> Self {
        Self::with_result(Ok(None))
    }

    pub fn with_reading(reading: Reading) -> Self {
        Self::with_result(Ok(Some(reading)))
    }

    pub fn with_result(result: Result<Option<Reading>, SourceError>) -> Self {
        Self {
            result: Arc::new(Mutex::new(result)),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Makes every query take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_result(&self, result: Result<Option<Reading>, SourceError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingSource for FakeReadingSource {
    async fn latest(&self) -> Result<Option<Reading>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().unwrap().clone()
    }
}

/// A subscriber directory returning a scripted result and counting queries.
#[derive(Debug, Clone)]
pub struct FakeDirectory {
    result: Arc<Mutex<Result<Vec<String>, DirectoryError>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeDirectory {
    pub fn with_subscribers<I, S>(subscribers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_result(Ok(subscribers.into_iter().map(Into::into).collect()))
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_result(Err(DirectoryError::Query(reason.to_string())))
    }

    pub fn with_result(result: Result<Vec<String>, DirectoryError>) -> Self {
        Self {
            result: Arc::new(Mutex::new(result)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_result(&self, result: Result<Vec<String>, DirectoryError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriberDirectory for FakeDirectory {
    async fn list_opted_in(&self) -> Result<Vec<String>, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// A notifier that records every attempted send. Sends to addresses in the
/// failing set return a transport error.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing: Arc<HashSet<String>>,
    delays: Arc<HashMap<String, Duration>>,
    notify: Arc<Notify>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: Arc::new(recipients.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Delays sends to `recipient` by `delay`.
    pub fn with_delay_for(mut self, recipient: &str, delay: Duration) -> Self {
        let mut delays = (*self.delays).clone();
        delays.insert(recipient.to_string(), delay);
        self.delays = Arc::new(delays);
        self
    }

    /// Every (recipient, message) pair attempted so far, in attempt order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits until at least `count` sends have been attempted.
    pub async fn wait_for_sends(&self, count: usize, timeout: Duration) {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .expect("Timed out waiting for sends");
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, NotifyError> {
        if let Some(delay) = self.delays.get(recipient) {
            tokio::time::sleep(*delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.to_string()));
        self.notify.notify_waiters();

        if self.failing.contains(recipient) {
            Err(NotifyError::Transport(format!("mailbox {} unavailable", recipient)))
        } else {
            Ok(DeliveryReceipt(format!("250 queued for {}", recipient)))
        }
    }
}
