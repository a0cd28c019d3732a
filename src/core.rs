//! Core domain types and service traits for soilwatch
//!
//! This module defines the data structures that flow through an alert cycle
//! and the trait contracts for the external collaborators the pipeline
//! talks to: the reading store, the subscriber directory and the message
//! transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single soil-moisture sample captured by a field device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Identifier of the device that produced the sample.
    pub device_id: String,
    /// When the device captured the sample.
    pub captured_at: DateTime<Utc>,
    /// Raw moisture value as reported by the sensor.
    pub moisture: f64,
}

impl Reading {
    pub fn new(device_id: impl Into<String>, captured_at: DateTime<Utc>, moisture: f64) -> Self {
        Self {
            device_id: device_id.into(),
            captured_at,
            moisture,
        }
    }
}

/// The kind of threshold breach an alert reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Moisture below the low bound: the soil is waterlogged.
    WaterClogging,
    /// Moisture above the high bound: the soil is too dry.
    SoilDryness,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::WaterClogging => "water_clogging",
            AlertKind::SoilDryness => "soil_dryness",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently recipients should act on an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// An alert raised for a breaching reading. Built fresh every cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// When the evaluator produced the alert.
    pub triggered_at: DateTime<Utc>,
    /// The reading that breached a bound.
    pub reading: Reading,
    pub kind: AlertKind,
    pub severity: Severity,
    /// The human-readable message sent to every recipient.
    pub message: String,
}

impl Alert {
    /// Key identifying "the same alert" across cycles: one device breaching
    /// one bound.
    pub fn state_key(&self) -> String {
        format!("{}::{}", self.reading.device_id, self.kind)
    }
}

/// Acknowledgement returned by a transport after accepting a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt(pub String);

/// Result of one send attempt to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchOutcome {
    pub recipient: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered(recipient: &str, receipt: DeliveryReceipt) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: true,
            receipt: Some(receipt.0),
            error: None,
        }
    }

    pub fn failed(recipient: &str, error: &NotifyError) -> Self {
        Self {
            recipient: recipient.to_string(),
            success: false,
            receipt: None,
            error: Some(error.to_string()),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reading the latest sample from the reading store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("reading store query failed: {0}")]
    Query(String),

    /// The latest record exists but cannot be interpreted as a reading.
    #[error("malformed reading: {0}")]
    Malformed(String),
}

/// Failures resolving the opted-in subscribers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("subscriber directory query failed: {0}")]
    Query(String),
}

/// Typed failure of a single send. Transport errors never cross the
/// dispatcher boundary in any other form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("invalid recipient address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport rejected message: {0}")]
    Transport(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// Service Traits
// =============================================================================

/// Provides the most recent sensor sample.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Returns the newest reading in the store.
    ///
    /// # Returns
    /// * `Ok(Some(reading))` when the store holds at least one sample
    /// * `Ok(None)` when the store is empty
    /// * `Err(SourceError::Malformed)` when the newest record lacks a usable
    ///   moisture value or timestamp
    async fn latest(&self) -> Result<Option<Reading>, SourceError>;
}

/// Resolves the contact addresses of users opted into alerts.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Returns the addresses of non-deleted users with an active alert
    /// opt-in, in a stable order. An empty list is not an error.
    async fn list_opted_in(&self) -> Result<Vec<String>, DirectoryError>;
}

/// Delivers one message to one recipient over an external transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A short name for the transport, used in logs (e.g., "smtp", "log").
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, message: &str) -> Result<DeliveryReceipt, NotifyError>;
}
