//! Vertical clearance restrictions.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use geocrawl::models::{CrawlScope, NormalizedRecord, RecordKind};

use super::validation::round2;
use super::{build_record, check_range, check_scope, Domain, Rejection};
use crate::element::RawElement;
use crate::overpass::TagFilter;

const FEET_PER_METER: f64 = 3.28084;

/// Plausible clearances, in feet.
pub const MIN_CLEARANCE_FT: f64 = 4.0;
pub const MAX_CLEARANCE_FT: f64 = 25.0;

const HEIGHT_TAGS: &[&str] = &["maxheight", "maxheight:physical"];

const SKIPPED_HIGHWAYS: &[&str] = &["footway", "cycleway", "path", "pedestrian", "steps"];

static FEET_INCHES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\d+(?:\.\d+)?)\s*(?:'|ft|feet|foot)\s*(?:(\d+(?:\.\d+)?)\s*(?:"|''|in|inch|inches)?)?$"#,
    )
    .unwrap()
});

static METERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*(?:m|meters?|metres?)?$").unwrap());

/// Parse a clearance into feet.
///
/// Accepts `13'6"`, `13 ft 6 in`, `13.5'`, `4.1 m` and bare numbers, which
/// are metres.
pub fn parse_height_feet(raw: &str) -> Option<f64> {
    let value = raw.trim().to_lowercase().replace(',', ".");

    if let Some(caps) = FEET_INCHES.captures(&value) {
        let feet: f64 = caps.get(1)?.as_str().parse().ok()?;
        let inches: f64 = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0.0,
        };
        return Some(feet + inches / 12.0);
    }

    if let Some(caps) = METERS.captures(&value) {
        let meters: f64 = caps.get(1)?.as_str().parse().ok()?;
        return Some(meters * FEET_PER_METER);
    }

    None
}

fn skip_reason(element: &RawElement) -> Option<&'static str> {
    if element
        .get("highway")
        .is_some_and(|h| SKIPPED_HIGHWAYS.contains(&h))
    {
        return Some("non-vehicular way");
    }
    if element.get("waterway").is_some() {
        return Some("waterway");
    }
    let parking = element.get("amenity") == Some("parking")
        || element.get("building") == Some("parking")
        || element.get("parking").is_some();
    if parking {
        return Some("parking structure");
    }
    None
}

fn category(element: &RawElement) -> &'static str {
    if element.has_yes("bridge") {
        "bridge"
    } else if element.has_yes("tunnel") {
        "tunnel"
    } else if element.get("barrier") == Some("height_restrictor") {
        "overhead"
    } else {
        "other"
    }
}

pub struct HeightDomain;

impl Domain for HeightDomain {
    fn kind(&self) -> RecordKind {
        RecordKind::Height
    }

    fn categories(&self) -> Vec<&'static str> {
        vec!["bridge", "tunnel", "overhead", "other"]
    }

    fn filters(&self, _scope: &CrawlScope) -> Vec<TagFilter> {
        HEIGHT_TAGS
            .iter()
            .map(|tag| TagFilter::new().exists(tag))
            .collect()
    }

    fn normalize(
        &self,
        element: &RawElement,
        scope: &CrawlScope,
    ) -> Result<NormalizedRecord, Rejection> {
        if let Some(reason) = skip_reason(element) {
            return Err(Rejection::Excluded(reason));
        }
        let raw = element
            .first_of(HEIGHT_TAGS)
            .ok_or(Rejection::Missing("maxheight"))?;
        let feet = parse_height_feet(raw).ok_or_else(|| Rejection::Unparseable {
            tag: "maxheight",
            value: raw.to_string(),
        })?;
        let feet = round2(check_range(feet, MIN_CLEARANCE_FT, MAX_CLEARANCE_FT)?);

        let category = category(element);
        check_scope(category, scope)?;

        let mut attributes = json!({ "raw": raw });
        if let Some(road) = element.first_of(&["ref", "highway"]) {
            attributes["road"] = json!(road);
        }
        build_record(RecordKind::Height, element, category, Some(feet), attributes)
    }
}
