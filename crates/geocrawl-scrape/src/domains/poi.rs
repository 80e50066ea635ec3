//! Truck-relevant points of interest.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use geocrawl::models::{CrawlScope, NormalizedRecord, RecordKind};

use super::{build_record, check_scope, Domain, Rejection};
use crate::classify::{Classifier, Matcher, Rule};
use crate::element::RawElement;
use crate::overpass::TagFilter;

/// Truck stop chains, as an Overpass (POSIX) pattern.
const CHAIN_PATTERN: &str = "pilot|flying j|love'?s|travelcenters of america|petro stopping|\
ambest|sapp bros|road ranger|bosselman|roady'?s";

const HGV_PATTERN: &str = "^(yes|designated)$";

static CHAIN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})", CHAIN_PATTERN.replace("'?", "[’']?"))).unwrap()
});

/// Amenity tags copied as boolean flags.
const AMENITY_FLAGS: &[(&str, &str)] = &[
    ("toilets", "toilets"),
    ("shower", "showers"),
    ("shower:hgv", "showers"),
    ("compressed_air", "compressed_air"),
    ("car_wash", "truck_wash"),
    ("atm", "atm"),
    ("internet_access", "wifi"),
    ("restaurant", "restaurant"),
    ("parking:hgv", "truck_parking"),
];

pub struct PoiDomain {
    classifier: Classifier,
}

impl PoiDomain {
    pub fn new() -> Self {
        Self {
            classifier: build_classifier(),
        }
    }
}

impl Default for PoiDomain {
    fn default() -> Self {
        Self::new()
    }
}

fn build_classifier() -> Classifier {
    let chain = Matcher::NameMatches(CHAIN_NAME.clone());
    let truck_hgv = Matcher::TagIn("hgv", &["yes", "designated"]);

    // Chain names only count on fuel stations.
    Classifier::new(
        vec![
            Rule::new(
                "truck_stop",
                Matcher::All(vec![
                    Matcher::TagEquals("amenity", "fuel"),
                    Matcher::Any(vec![chain, truck_hgv.clone()]),
                ]),
            ),
            Rule::new("fuel_station", Matcher::TagEquals("amenity", "fuel")),
            Rule::new(
                "rest_area",
                Matcher::TagIn("highway", &["rest_area", "services"]),
            ),
            Rule::new(
                "weigh_station",
                Matcher::Any(vec![
                    Matcher::TagEquals("amenity", "weighbridge"),
                    Matcher::TagEquals("highway", "weigh_station"),
                ]),
            ),
            Rule::new(
                "truck_parking",
                Matcher::All(vec![Matcher::TagEquals("amenity", "parking"), truck_hgv]),
            ),
            Rule::new("truck_repair", Matcher::TagEquals("shop", "truck_repair")),
        ],
        "other",
    )
}

fn filters_for(category: &str) -> Vec<TagFilter> {
    match category {
        "truck_stop" => vec![
            TagFilter::new().eq("amenity", "fuel").matches("hgv", HGV_PATTERN),
            TagFilter::new().eq("amenity", "fuel").matches("name", CHAIN_PATTERN),
            TagFilter::new().eq("amenity", "fuel").matches("brand", CHAIN_PATTERN),
        ],
        "fuel_station" => vec![TagFilter::new().eq("amenity", "fuel")],
        "rest_area" => vec![
            TagFilter::new().eq("highway", "rest_area"),
            TagFilter::new().eq("highway", "services"),
        ],
        "weigh_station" => vec![
            TagFilter::new().eq("amenity", "weighbridge"),
            TagFilter::new().eq("highway", "weigh_station"),
        ],
        "truck_parking" => vec![TagFilter::new()
            .eq("amenity", "parking")
            .matches("hgv", HGV_PATTERN)],
        "truck_repair" => vec![TagFilter::new().eq("shop", "truck_repair")],
        _ => Vec::new(),
    }
}

/// Best-effort optional fields. Missing tags are simply left out.
pub(crate) fn extract_attributes(element: &RawElement) -> Value {
    let mut attrs = Map::new();

    let simple = [
        ("phone", &["phone", "contact:phone"][..]),
        ("website", &["website", "contact:website", "url"][..]),
        ("opening_hours", &["opening_hours"][..]),
        ("brand", &["brand"][..]),
        ("operator", &["operator"][..]),
    ];
    for (field, keys) in simple {
        if let Some(value) = element.first_of(keys) {
            attrs.insert(field.to_string(), json!(value));
        }
    }

    let mut address = Map::new();
    for part in ["housenumber", "street", "city", "state", "postcode"] {
        if let Some(value) = element.get(&format!("addr:{}", part)) {
            address.insert(part.to_string(), json!(value));
        }
    }
    if !address.is_empty() {
        attrs.insert("address".to_string(), Value::Object(address));
    }

    let mut amenities: Vec<&str> = AMENITY_FLAGS
        .iter()
        .filter(|(tag, _)| element.has_yes(tag))
        .map(|(_, flag)| *flag)
        .collect();
    amenities.sort();
    amenities.dedup();
    if !amenities.is_empty() {
        attrs.insert("amenities".to_string(), json!(amenities));
    }

    for (prefix, field) in [("fuel:", "fuel_types"), ("payment:", "payment_types")] {
        let values: Vec<&str> = element
            .tags
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && v.as_str() == "yes")
            .map(|(k, _)| &k[prefix.len()..])
            .collect();
        if !values.is_empty() {
            attrs.insert(field.to_string(), json!(values));
        }
    }

    Value::Object(attrs)
}

impl Domain for PoiDomain {
    fn kind(&self) -> RecordKind {
        RecordKind::Poi
    }

    fn categories(&self) -> Vec<&'static str> {
        self.classifier.categories()
    }

    fn filters(&self, scope: &CrawlScope) -> Vec<TagFilter> {
        let categories: Vec<&str> = if scope.categories.is_empty() {
            self.categories()
        } else {
            scope.categories.iter().map(String::as_str).collect()
        };
        categories.into_iter().flat_map(filters_for).collect()
    }

    fn normalize(
        &self,
        element: &RawElement,
        scope: &CrawlScope,
    ) -> Result<NormalizedRecord, Rejection> {
        let category = self.classifier.classify(&element.tags);
        check_scope(category, scope)?;
        build_record(
            RecordKind::Poi,
            element,
            category,
            None,
            extract_attributes(element),
        )
    }
}
