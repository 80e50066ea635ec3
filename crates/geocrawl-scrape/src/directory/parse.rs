//! HTML and embedded JSON extraction for the location directory.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::element::{ElementType, RawElement};
use crate::error::FetchError;

/// Hidden form field carrying the login token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub field: String,
    pub value: String,
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("bad selector {}: {:?}", css, e)))
}

/// Find the CSRF token of a login form.
pub fn find_csrf_token(html: &str) -> Result<Option<CsrfToken>, FetchError> {
    let document = Html::parse_document(html);
    let hidden = selector(r#"input[type="hidden"]"#)?;
    for input in document.select(&hidden) {
        let Some(name) = input.value().attr("name") else {
            continue;
        };
        let lowered = name.to_lowercase();
        if lowered.contains("csrf") || lowered == "authenticity_token" || lowered == "_token" {
            return Ok(Some(CsrfToken {
                field: name.to_string(),
                value: input.value().attr("value").unwrap_or_default().to_string(),
            }));
        }
    }
    Ok(None)
}

/// A page asking for a password means the session is gone.
pub fn is_login_page(html: &str) -> Result<bool, FetchError> {
    let document = Html::parse_document(html);
    let password = selector(r#"input[type="password"]"#)?;
    Ok(document.select(&password).next().is_some())
}

/// Extract listings from a data page.
///
/// Embedded JSON is preferred; location cards are the fallback.
pub fn parse_listings(html: &str) -> Result<Vec<RawElement>, FetchError> {
    let document = Html::parse_document(html);

    for css in [
        "script#__NEXT_DATA__",
        r#"script[type="application/json"][data-locations]"#,
    ] {
        let script = selector(css)?;
        if let Some(node) = document.select(&script).next() {
            let text: String = node.text().collect();
            let blob: Value = serde_json::from_str(&text)
                .map_err(|e| FetchError::Parse(format!("embedded JSON: {}", e)))?;
            if let Some(locations) = find_locations(&blob) {
                debug!("Found {} locations in {}", locations.len(), css);
                return Ok(locations.iter().filter_map(listing_from_json).collect());
            }
        }
    }

    parse_cards(&document)
}

/// The first `locations` array anywhere in the blob, or the blob itself if it
/// is an array.
fn find_locations(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        _ => find_locations_key(value),
    }
}

fn find_locations_key(value: &Value) -> Option<&Vec<Value>> {
    let Value::Object(map) = value else {
        return None;
    };
    if let Some(Value::Array(items)) = map.get("locations") {
        return Some(items);
    }
    map.values().find_map(find_locations_key)
}

fn json_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn listing_from_json(value: &Value) -> Option<RawElement> {
    let id = json_str(value, &["id", "locationId", "location_id"])?;
    let lat = json_f64(value, &["lat", "latitude"])?;
    let lon = json_f64(value, &["lng", "lon", "longitude"])?;

    let mut element = RawElement::new(ElementType::Listing, id, lat, lon);
    let fields = [
        ("name", &["name", "title"][..]),
        ("phone", &["phone", "phoneNumber"][..]),
        ("website", &["website", "url"][..]),
        ("opening_hours", &["hours", "openingHours"][..]),
        ("brand", &["brand", "chain"][..]),
    ];
    for (tag, keys) in fields {
        if let Some(v) = json_str(value, keys) {
            element = element.tag(tag, &v);
        }
    }

    match value.get("address") {
        Some(Value::Object(_)) => {
            let address = &value["address"];
            for (tag, keys) in [
                ("addr:street", &["street", "line1"][..]),
                ("addr:city", &["city"][..]),
                ("addr:state", &["state"][..]),
                ("addr:postcode", &["zip", "postcode", "postalCode"][..]),
            ] {
                if let Some(v) = json_str(address, keys) {
                    element = element.tag(tag, &v);
                }
            }
        }
        Some(Value::String(s)) => element = element.tag("addr:full", s),
        _ => {}
    }

    if let Some(kind) = json_str(value, &["type", "category", "locationType"]) {
        element = apply_type(element, &kind);
    }
    if let Some(Value::Array(amenities)) = value.get("amenities") {
        for amenity in amenities.iter().filter_map(Value::as_str) {
            element = apply_amenity(element, amenity);
        }
    }
    Some(element)
}

fn parse_cards(document: &Html) -> Result<Vec<RawElement>, FetchError> {
    let card = selector("[data-location-id]")?;
    let name = selector(".location-name, h2, h3")?;
    let phone = selector(".location-phone, a[href^=\"tel:\"]")?;
    let address = selector(".location-address, address")?;

    let text_of = |el: ElementRef, sel: &Selector| -> Option<String> {
        el.select(sel)
            .next()
            .map(|n| n.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut listings = Vec::new();
    for el in document.select(&card) {
        let attrs = el.value();
        let (Some(id), Some(lat), Some(lon)) = (
            attrs.attr("data-location-id"),
            attrs.attr("data-lat").and_then(|v| v.trim().parse::<f64>().ok()),
            attrs
                .attr("data-lng")
                .or_else(|| attrs.attr("data-lon"))
                .and_then(|v| v.trim().parse::<f64>().ok()),
        ) else {
            debug!("Skipping location card without id or coordinates");
            continue;
        };

        let mut element = RawElement::new(ElementType::Listing, id, lat, lon);
        if let Some(v) = text_of(el, &name) {
            element = element.tag("name", &v);
        }
        if let Some(v) = text_of(el, &phone) {
            element = element.tag("phone", &v);
        }
        if let Some(v) = text_of(el, &address) {
            element = element.tag("addr:full", &v);
        }
        if let Some(kind) = attrs.attr("data-type") {
            element = apply_type(element, kind);
        }
        listings.push(element);
    }
    Ok(listings)
}

/// Translate a directory location type into classification tags.
fn apply_type(element: RawElement, kind: &str) -> RawElement {
    let lowered = kind.to_lowercase();
    let element = element.tag("directory:type", kind);
    if lowered.contains("truck stop") || lowered.contains("travel center") {
        element.tag("amenity", "fuel").tag("hgv", "yes")
    } else if lowered.contains("fuel") || lowered.contains("gas") {
        element.tag("amenity", "fuel")
    } else if lowered.contains("rest area") {
        element.tag("highway", "rest_area")
    } else if lowered.contains("weigh") || lowered.contains("scale") {
        element.tag("amenity", "weighbridge")
    } else if lowered.contains("parking") {
        element.tag("amenity", "parking").tag("hgv", "yes")
    } else if lowered.contains("repair") || lowered.contains("service") {
        element.tag("shop", "truck_repair")
    } else {
        element
    }
}

fn apply_amenity(element: RawElement, amenity: &str) -> RawElement {
    let tag = match amenity.to_lowercase().as_str() {
        "shower" | "showers" => "shower",
        "wifi" | "wi-fi" => "internet_access",
        "atm" => "atm",
        "truck wash" => "car_wash",
        "restaurant" | "food" => "restaurant",
        "restrooms" | "toilets" => "toilets",
        "truck parking" | "parking" => "parking:hgv",
        _ => return element,
    };
    element.tag(tag, "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csrf_token() {
        let html = r#"<form method="post">
            <input type="hidden" name="next" value="/locations">
            <input type="hidden" name="csrfmiddlewaretoken" value="tok123">
            <input type="text" name="username"><input type="password" name="password">
        </form>"#;
        assert_eq!(
            find_csrf_token(html).unwrap(),
            Some(CsrfToken {
                field: "csrfmiddlewaretoken".into(),
                value: "tok123".into()
            })
        );
        assert!(is_login_page(html).unwrap());
        assert!(!is_login_page("<html><body>Welcome</body></html>").unwrap());
    }

    #[test]
    fn test_next_data_blob() {
        let html = r#"<html><body>
            <script id="__NEXT_DATA__" type="application/json">
            {"props": {"pageProps": {"state": "NE", "locations": [
                {"id": 4412, "name": "Sapp Bros Omaha", "lat": 41.2200, "lng": -96.0950,
                 "type": "Truck Stop", "phone": "402-555-0100",
                 "address": {"street": "9915 S 108th St", "city": "Omaha", "state": "NE", "zip": "68128"},
                 "amenities": ["Showers", "WiFi", "Hot tub"]},
                {"id": "bad", "name": "No coordinates"}
            ]}}}
            </script></body></html>"#;

        let listings = parse_listings(html).unwrap();
        assert_eq!(listings.len(), 1);
        let l = &listings[0];
        assert_eq!(l.external_id(), "directory:4412");
        assert_eq!(l.get("name"), Some("Sapp Bros Omaha"));
        assert_eq!(l.get("amenity"), Some("fuel"));
        assert_eq!(l.get("hgv"), Some("yes"));
        assert_eq!(l.get("addr:city"), Some("Omaha"));
        assert_eq!(l.get("shower"), Some("yes"));
        assert_eq!(l.get("internet_access"), Some("yes"));
    }

    #[test]
    fn test_data_locations_script() {
        let html = r#"<script type="application/json" data-locations>
            [{"location_id": "ia-77", "title": "I-80 Rest Area", "latitude": "41.6611", "longitude": "-91.5302", "category": "Rest Area"}]
        </script>"#;
        let listings = parse_listings(html).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "ia-77");
        assert_eq!(listings[0].get("highway"), Some("rest_area"));
    }

    #[test]
    fn test_card_fallback() {
        let html = r#"<div class="results">
            <div data-location-id="901" data-lat="40.8136" data-lng="-96.7026" data-type="Parking">
                <h3 class="location-name">Lincoln Truck Lot</h3>
                <address>1 Main St, Lincoln NE</address>
            </div>
            <div data-location-id="902"><h3>Missing coordinates</h3></div>
        </div>"#;
        let listings = parse_listings(html).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].get("name"), Some("Lincoln Truck Lot"));
        assert_eq!(listings[0].get("amenity"), Some("parking"));
        assert_eq!(listings[0].get("addr:full"), Some("1 Main St, Lincoln NE"));
    }
}
