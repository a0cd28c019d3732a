//! Soilwatch - periodic soil-moisture alerting.
//!
//! On a calendar-aligned cadence the scheduler reads the latest sensor
//! sample, checks it against the moisture bounds, and emails every opted-in
//! subscriber when the reading breaches them.

pub mod app;
pub mod cli;
pub mod config;
pub mod cooldown;
pub mod core;
pub mod internal_metrics;
pub mod notification;
pub mod pipeline;
pub mod readings;
pub mod rules;
pub mod scheduler;
pub mod subscribers;
pub mod task_manager;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export core types for convenience
pub use crate::core::*;
