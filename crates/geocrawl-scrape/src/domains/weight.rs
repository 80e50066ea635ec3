//! Weight restrictions.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use geocrawl::models::{CrawlScope, NormalizedRecord, RecordKind};

use super::validation::round2;
use super::{build_record, check_range, check_scope, Domain, Rejection};
use crate::element::RawElement;
use crate::overpass::TagFilter;

const SHORT_TONS_PER_TONNE: f64 = 1.10231;
const POUNDS_PER_SHORT_TON: f64 = 2000.0;
const KG_PER_SHORT_TON: f64 = 907.185;

/// Plausible limits, in short tons.
pub const MIN_LIMIT_TONS: f64 = 1.0;
pub const MAX_LIMIT_TONS: f64 = 100.0;

const WEIGHT_TAGS: &[&str] = &["maxweight:hgv", "maxweight"];

static WEIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([a-z][a-z .]*)?$").unwrap());

/// Parse a weight limit into short tons.
///
/// Bare numbers and `t` are metric tonnes, `lbs` pounds, `st` short tons.
pub fn parse_weight_tons(raw: &str) -> Option<f64> {
    let value = raw.trim().to_lowercase().replace(',', "");
    let caps = WEIGHT.captures(&value)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map_or("", |m| m.as_str().trim());

    let tons = match unit {
        "" | "t" | "tonne" | "tonnes" | "metric ton" | "metric tons" => amount * SHORT_TONS_PER_TONNE,
        "lb" | "lbs" | "pounds" => amount / POUNDS_PER_SHORT_TON,
        "st" | "short ton" | "short tons" | "tons" => amount,
        "kg" => amount / KG_PER_SHORT_TON,
        _ => return None,
    };
    Some(tons)
}

pub struct WeightDomain;

impl Domain for WeightDomain {
    fn kind(&self) -> RecordKind {
        RecordKind::Weight
    }

    fn categories(&self) -> Vec<&'static str> {
        vec!["bridge", "road"]
    }

    fn filters(&self, _scope: &CrawlScope) -> Vec<TagFilter> {
        WEIGHT_TAGS
            .iter()
            .map(|tag| TagFilter::new().exists(tag))
            .collect()
    }

    fn normalize(
        &self,
        element: &RawElement,
        scope: &CrawlScope,
    ) -> Result<NormalizedRecord, Rejection> {
        let raw = element
            .first_of(WEIGHT_TAGS)
            .ok_or(Rejection::Missing("maxweight"))?;
        let tons = parse_weight_tons(raw).ok_or_else(|| Rejection::Unparseable {
            tag: "maxweight",
            value: raw.to_string(),
        })?;
        let tons = round2(check_range(tons, MIN_LIMIT_TONS, MAX_LIMIT_TONS)?);

        let category = if element.has_yes("bridge") {
            "bridge"
        } else {
            "road"
        };
        check_scope(category, scope)?;

        let attributes = json!({
            "raw": raw,
            "hgv_only": element.get("maxweight:hgv").is_some(),
        });
        build_record(RecordKind::Weight, element, category, Some(tons), attributes)
    }
}
