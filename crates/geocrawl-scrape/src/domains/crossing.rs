//! Road/rail level crossings.

use serde_json::{Map, Value};

use geocrawl::models::{CrawlScope, NormalizedRecord, RecordKind};

use super::{build_record, check_scope, Domain, Rejection};
use crate::classify::{Classifier, Matcher, Rule};
use crate::element::RawElement;
use crate::overpass::TagFilter;

/// Crossings closer than this are the same crossing.
pub const DEDUP_RADIUS_M: f64 = 30.0;

const KEPT_TAGS: &[&str] = &[
    "crossing",
    "crossing:barrier",
    "crossing:light",
    "crossing:bell",
    "crossing:saltire",
    "railway:ref",
    "operator",
];

pub struct CrossingDomain {
    classifier: Classifier,
}

impl CrossingDomain {
    pub fn new() -> Self {
        let classifier = Classifier::new(
            vec![
                Rule::new("gated", Matcher::TagYes("crossing:barrier")),
                Rule::new(
                    "signaled",
                    Matcher::Any(vec![
                        Matcher::TagYes("crossing:light"),
                        Matcher::TagYes("crossing:bell"),
                        Matcher::TagEquals("crossing", "traffic_signals"),
                    ]),
                ),
                Rule::new(
                    "uncontrolled",
                    Matcher::Any(vec![
                        Matcher::TagIn("crossing", &["uncontrolled", "unmarked", "no"]),
                        Matcher::TagEquals("crossing:barrier", "no"),
                    ]),
                ),
            ],
            "other",
        );
        Self { classifier }
    }
}

impl Default for CrossingDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain for CrossingDomain {
    fn kind(&self) -> RecordKind {
        RecordKind::Crossing
    }

    fn categories(&self) -> Vec<&'static str> {
        self.classifier.categories()
    }

    fn filters(&self, _scope: &CrawlScope) -> Vec<TagFilter> {
        vec![TagFilter::new().eq("railway", "level_crossing")]
    }

    fn normalize(
        &self,
        element: &RawElement,
        scope: &CrawlScope,
    ) -> Result<NormalizedRecord, Rejection> {
        match element.get("railway") {
            Some("level_crossing") => {}
            Some("crossing") => return Err(Rejection::Excluded("pedestrian crossing")),
            _ => return Err(Rejection::Missing("railway")),
        }

        let category = self.classifier.classify(&element.tags);
        check_scope(category, scope)?;

        let attributes: Map<String, Value> = KEPT_TAGS
            .iter()
            .filter_map(|tag| {
                element
                    .get(tag)
                    .map(|v| (tag.to_string(), Value::String(v.to_string())))
            })
            .collect();
        build_record(
            RecordKind::Crossing,
            element,
            category,
            None,
            Value::Object(attributes),
        )
    }

    fn dedup_radius_m(&self) -> Option<f64> {
        Some(DEDUP_RADIUS_M)
    }
}
