//! Overpass-compatible query service client.

mod query;

pub use query::{build_query, format_bbox, TagCondition, TagFilter};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use geocrawl::grid::{BoundingBox, Cell};

use crate::element::{ElementType, RawElement, Tags};
use crate::error::FetchError;
use crate::http::HttpClient;
use crate::source::CellSource;

/// Server-side query timeout in seconds.
const QUERY_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<Center>,
    #[serde(default)]
    tags: Tags,
}

#[derive(Debug, Deserialize)]
struct Center {
    lat: f64,
    lon: f64,
}

/// Parse an Overpass JSON body.
///
/// Points keep their own position, areas use their center. Elements without
/// any position are dropped. A runtime-error remark (the server gave up on
/// the query) is reported as a transient error.
pub fn parse_response(body: &str) -> Result<Vec<RawElement>, FetchError> {
    let response: OverpassResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    if let Some(remark) = response.remark.as_deref() {
        if remark.contains("runtime error") {
            return Err(FetchError::Transient(remark.to_string()));
        }
    }

    let mut elements = Vec::with_capacity(response.elements.len());
    for el in response.elements {
        let element_type = match el.element_type.as_str() {
            "node" => ElementType::Node,
            "way" => ElementType::Way,
            "relation" => ElementType::Relation,
            other => {
                trace!("Skipping element type {}", other);
                continue;
            }
        };
        let position = match (el.lat, el.lon, el.center) {
            (Some(lat), Some(lon), _) => Some((lat, lon)),
            (_, _, Some(center)) => Some((center.lat, center.lon)),
            _ => None,
        };
        let Some((lat, lon)) = position else {
            trace!("Skipping {}/{} without position", el.element_type, el.id);
            continue;
        };
        elements.push(RawElement {
            element_type,
            id: el.id.to_string(),
            lat,
            lon,
            tags: el.tags,
        });
    }
    Ok(elements)
}

/// Client for an Overpass-compatible endpoint.
#[derive(Clone)]
pub struct OverpassClient {
    http: HttpClient,
    endpoint: String,
}

impl OverpassClient {
    pub fn new(http: HttpClient, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one compound query for a bounding box.
    pub async fn query(
        &self,
        filters: &[TagFilter],
        bounds: &BoundingBox,
    ) -> Result<Vec<RawElement>, FetchError> {
        let query = build_query(filters, bounds, QUERY_TIMEOUT_SECS);
        let body = self
            .http
            .post_form(&self.endpoint, &[("data", query.as_str())])
            .await?;
        let elements = parse_response(&body)?;
        debug!(
            "Overpass returned {} elements for {}",
            elements.len(),
            format_bbox(bounds)
        );
        Ok(elements)
    }
}

#[async_trait]
impl CellSource for OverpassClient {
    async fn fetch_cell(
        &self,
        cell: &Cell,
        filters: &[TagFilter],
    ) -> Result<Vec<RawElement>, FetchError> {
        self.query(filters, &cell.bounds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_points_and_areas() {
        let body = r#"{
            "version": 0.6,
            "elements": [
                {"type": "node", "id": 101, "lat": 39.7392, "lon": -104.9903,
                 "tags": {"amenity": "fuel", "name": "Pilot Travel Center"}},
                {"type": "way", "id": 202, "center": {"lat": 39.801, "lon": -105.012},
                 "tags": {"highway": "rest_area"}},
                {"type": "relation", "id": 303, "tags": {"amenity": "parking"}},
                {"type": "area", "id": 404, "lat": 1.0, "lon": 1.0}
            ]
        }"#;

        let elements = parse_response(body).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].external_id(), "node/101");
        assert_eq!(elements[0].get("name"), Some("Pilot Travel Center"));
        assert_eq!(elements[1].external_id(), "way/202");
        assert_eq!(elements[1].lat, 39.801);
        assert!(elements[1].get("name").is_none());
    }

    #[test]
    fn test_runtime_error_remark_is_transient() {
        let body = r#"{"elements": [], "remark": "runtime error: Query timed out in \"query\" at line 3 after 120 seconds."}"#;
        assert!(matches!(
            parse_response(body),
            Err(FetchError::Transient(_))
        ));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            parse_response("<html>busy</html>"),
            Err(FetchError::Parse(_))
        ));
    }
}
