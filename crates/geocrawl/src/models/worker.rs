//! Worker types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::RecordKind;

/// A kind of crawl worker. Each worker type owns exactly one status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// Automatic full-coverage points-of-interest crawl.
    Poi,
    /// Selective points-of-interest crawl driven by manual requests.
    PoiManual,
    /// Vertical clearance restrictions.
    Heights,
    /// Railroad level crossings.
    Crossings,
    /// Weight restrictions.
    Weights,
    /// Points of interest from the authenticated location directory.
    Directory,
}

impl WorkerType {
    pub const ALL: [WorkerType; 6] = [
        Self::Poi,
        Self::PoiManual,
        Self::Heights,
        Self::Crossings,
        Self::Weights,
        Self::Directory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poi => "poi",
            Self::PoiManual => "poi_manual",
            Self::Heights => "heights",
            Self::Crossings => "crossings",
            Self::Weights => "weights",
            Self::Directory => "directory",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "poi" => Some(Self::Poi),
            "poi_manual" | "poi-manual" => Some(Self::PoiManual),
            "heights" => Some(Self::Heights),
            "crossings" => Some(Self::Crossings),
            "weights" => Some(Self::Weights),
            "directory" => Some(Self::Directory),
            _ => None,
        }
    }

    /// Kind of record this worker persists.
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::Poi | Self::PoiManual | Self::Directory => RecordKind::Poi,
            Self::Heights => RecordKind::Height,
            Self::Crossings => RecordKind::Crossing,
            Self::Weights => RecordKind::Weight,
        }
    }

    /// Whether this worker only runs in response to manual requests.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::PoiManual)
    }

    /// Service unit that hosts this worker unless configured otherwise.
    ///
    /// The three restriction workers share one service, which makes them an
    /// exclusive group.
    pub fn default_service(&self) -> &'static str {
        match self {
            Self::Poi => "geocrawl-poi.service",
            Self::PoiManual => "geocrawl-poi-manual.service",
            Self::Heights | Self::Crossings | Self::Weights => "geocrawl-restrictions.service",
            Self::Directory => "geocrawl-directory.service",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
