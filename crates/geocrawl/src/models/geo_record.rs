//! Ingested geospatial records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WorkerType;

/// Kind of external record. Each kind has its own external id namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Poi,
    Height,
    Crossing,
    Weight,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poi => "poi",
            Self::Height => "height",
            Self::Crossing => "crossing",
            Self::Weight => "weight",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "poi" => Some(Self::Poi),
            "height" => Some(Self::Height),
            "crossing" => Some(Self::Crossing),
            "weight" => Some(Self::Weight),
            _ => None,
        }
    }

    /// Three-letter prefix of generated serials.
    pub fn serial_prefix(&self) -> &'static str {
        match self {
            Self::Poi => "POI",
            Self::Height => "HGT",
            Self::Crossing => "RXR",
            Self::Weight => "WGT",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched, validated record ready to be upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub kind: RecordKind,
    pub external_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub name: Option<String>,
    /// Clearance in feet or limit in short tons, depending on kind.
    pub measure: Option<f64>,
    pub attributes: serde_json::Value,
}

/// A stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRecord {
    pub id: i32,
    pub kind: RecordKind,
    pub external_id: String,
    pub serial: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
    pub name: Option<String>,
    pub measure: Option<f64>,
    pub attributes: serde_json::Value,
    pub scraper_type: WorkerType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generate a serial: kind prefix, UTC date and 12 random hex digits.
///
/// ```
/// use geocrawl::models::{generate_serial, RecordKind};
///
/// let serial = generate_serial(RecordKind::Crossing, chrono::Utc::now());
/// assert!(serial.starts_with("RXR"));
/// assert_eq!(serial.len(), 23);
/// ```
pub fn generate_serial(kind: RecordKind, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}{}",
        kind.serial_prefix(),
        now.format("%Y%m%d"),
        random[..12].to_uppercase()
    )
}
