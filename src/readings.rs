//! Latest-reading lookup against the MongoDB sensor collection.

use crate::config::ReadingsConfig;
use crate::core::{Reading, ReadingSource, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use mongodb::{
    bson::{Bson, Document},
    options::{ClientOptions, FindOneOptions},
    Client, Collection,
};
use tracing::{debug, instrument, warn};

/// Field names used to interpret a sensor document.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingFields {
    pub timestamp: String,
    pub moisture: String,
    pub device: String,
    pub default_device_id: String,
}

impl From<&ReadingsConfig> for ReadingFields {
    fn from(config: &ReadingsConfig) -> Self {
        Self {
            timestamp: config.timestamp_field.clone(),
            moisture: config.moisture_field.clone(),
            device: config.device_field.clone(),
            default_device_id: config.default_device_id.clone(),
        }
    }
}

/// Reads the newest document of the sensor collection. The driver keeps its
/// own connection pool, shared with anything else holding the same `Client`.
pub struct MongoReadingSource {
    collection: Collection<Document>,
    fields: ReadingFields,
}

impl MongoReadingSource {
    /// Creates a source from an existing client.
    pub fn new(client: &Client, config: &ReadingsConfig) -> Self {
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);
        Self {
            collection,
            fields: ReadingFields::from(config),
        }
    }

    /// Parses the connection string and builds a client. No round trip is
    /// made until the first query.
    pub async fn connect(config: &ReadingsConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .context("invalid MongoDB connection string")?;
        options.app_name = Some("soilwatch".to_string());
        let client = Client::with_options(options).context("failed to build MongoDB client")?;
        Ok(Self::new(&client, config))
    }
}

#[async_trait]
impl ReadingSource for MongoReadingSource {
    #[instrument(skip_all, fields(collection = %self.collection.name()))]
    async fn latest(&self) -> Result<Option<Reading>, SourceError> {
        let mut newest_first = Document::new();
        newest_first.insert(self.fields.timestamp.clone(), -1);
        let options = FindOneOptions::builder().sort(newest_first).build();

        let document = self
            .collection
            .find_one(None, options)
            .await
            .map_err(|e| SourceError::Query(e.to_string()))?;

        match document {
            Some(document) => {
                let reading = reading_from_document(&document, &self.fields)?;
                debug!(device = %reading.device_id, moisture = reading.moisture, "Fetched latest reading");
                Ok(Some(reading))
            }
            None => Ok(None),
        }
    }
}

/// Interprets a sensor document as a `Reading`, falling back to the current
/// time when the capture time cannot be read.
pub fn reading_from_document(
    document: &Document,
    fields: &ReadingFields,
) -> Result<Reading, SourceError> {
    reading_from_document_at(document, fields, Utc::now())
}

/// Like `reading_from_document`, with an explicit fallback capture time.
///
/// Only the moisture value is required. A missing or unreadable timestamp
/// is logged and replaced by `fetched_at`.
pub fn reading_from_document_at(
    document: &Document,
    fields: &ReadingFields,
    fetched_at: DateTime<Utc>,
) -> Result<Reading, SourceError> {
    let moisture = match document.get(&fields.moisture) {
        Some(value) => numeric(value).ok_or_else(|| {
            SourceError::Malformed(format!("field '{}' is not numeric: {}", fields.moisture, value))
        })?,
        None => {
            return Err(SourceError::Malformed(format!(
                "missing field '{}'",
                fields.moisture
            )))
        }
    };

    let captured_at = match document.get(&fields.timestamp).map(timestamp) {
        Some(Some(at)) => at,
        Some(None) => {
            warn!(
                field = %fields.timestamp,
                "Unreadable reading timestamp; using the query time instead."
            );
            fetched_at
        }
        None => {
            warn!(field = %fields.timestamp, "Reading has no timestamp; using the query time instead.");
            fetched_at
        }
    };

    let device_id = match document.get(&fields.device) {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::ObjectId(id)) => id.to_hex(),
        Some(Bson::Int32(i)) => i.to_string(),
        Some(Bson::Int64(i)) => i.to_string(),
        _ => fields.default_device_id.clone(),
    };

    Ok(Reading {
        device_id,
        captured_at,
        moisture,
    })
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(f) if f.is_finite() => Some(*f),
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Epoch values below this are taken as seconds, above it as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn timestamp(value: &Bson) -> Option<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => Utc.timestamp_millis_opt(dt.timestamp_millis()).single(),
        Bson::Timestamp(ts) => Utc.timestamp_opt(i64::from(ts.time), 0).single(),
        Bson::Int32(n) => epoch(f64::from(*n)),
        Bson::Int64(n) => epoch(*n as f64),
        Bson::Double(n) => epoch(*n),
        Bson::String(s) => text_timestamp(s.trim()),
        _ => None,
    }
}

fn epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() < EPOCH_MILLIS_THRESHOLD {
        value * 1000.0
    } else {
        value
    };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn text_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}
