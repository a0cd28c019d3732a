//! Delivery of alerts to subscribers.
//!
//! `Notifier` implementations wrap a single transport call; the
//! `NotificationDispatcher` fans one alert out to every recipient and
//! collects a per-recipient outcome.
pub mod dispatcher;
pub mod email;
pub mod logging;

pub use dispatcher::NotificationDispatcher;
pub use email::SmtpNotifier;
pub use logging::LogNotifier;
