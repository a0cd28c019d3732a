//! Fixed soil-moisture threshold rule and its evaluation.
//!
//! The bounds and message templates are process-lifetime constants. Both
//! comparisons are strict: a value equal to either bound does not alert.

use crate::core::{Alert, AlertKind, Reading, Severity};
use chrono::{DateTime, Utc};

/// Placeholder replaced with the moisture value in message templates.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Low/high moisture bounds with the message sent for each breach.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub low_bound: f64,
    pub high_bound: f64,
    pub low_message_template: &'static str,
    pub high_message_template: &'static str,
}

impl ThresholdRule {
    /// The rule applied to every cycle.
    pub const SOIL_MOISTURE: ThresholdRule = ThresholdRule {
        low_bound: 100.0,
        high_bound: 750.0,
        low_message_template:
            "Water Clogging Alert: Soil moisture level is {value}. Immediate action needed.",
        high_message_template:
            "Soil Dryness Alert: Soil moisture level is {value}. Please water the soil.",
    };

    /// Classifies a moisture value, returning `None` inside `[low, high]`.
    pub fn classify(&self, moisture: f64) -> Option<AlertKind> {
        if moisture < self.low_bound {
            Some(AlertKind::WaterClogging)
        } else if moisture > self.high_bound {
            Some(AlertKind::SoilDryness)
        } else {
            None
        }
    }

    fn render(&self, kind: AlertKind, moisture: f64) -> String {
        let template = match kind {
            AlertKind::WaterClogging => self.low_message_template,
            AlertKind::SoilDryness => self.high_message_template,
        };
        template.replace(VALUE_PLACEHOLDER, &moisture.to_string())
    }
}

impl Default for ThresholdRule {
    fn default() -> Self {
        Self::SOIL_MOISTURE
    }
}

/// Evaluates a reading against a rule, stamping the alert with `now`.
pub fn evaluate_at(reading: &Reading, rule: &ThresholdRule, now: DateTime<Utc>) -> Option<Alert> {
    let kind = rule.classify(reading.moisture)?;
    let severity = match kind {
        AlertKind::WaterClogging => Severity::Critical,
        AlertKind::SoilDryness => Severity::Warning,
    };
    Some(Alert {
        triggered_at: now,
        reading: reading.clone(),
        kind,
        severity,
        message: rule.render(kind, reading.moisture),
    })
}

/// Evaluates a reading against a rule. At most one alert is produced.
pub fn evaluate(reading: &Reading, rule: &ThresholdRule) -> Option<Alert> {
    evaluate_at(reading, rule, Utc::now())
}
