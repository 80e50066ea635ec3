//! Overpass QL query construction.

use geocrawl::grid::BoundingBox;

/// One tag condition of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCondition {
    /// `["key"]`
    Exists(String),
    /// `["key"="value"]`
    Equals(String, String),
    /// `["key"~"regex",i]`
    Matches(String, String),
}

impl TagCondition {
    fn render(&self, out: &mut String) {
        let rendered = match self {
            Self::Exists(key) => format!("[\"{}\"]", escape(key)),
            Self::Equals(key, value) => format!("[\"{}\"=\"{}\"]", escape(key), escape(value)),
            Self::Matches(key, pattern) => {
                format!("[\"{}\"~\"{}\",i]", escape(key), escape(pattern))
            }
        };
        out.push_str(&rendered);
    }
}

/// A conjunction of tag conditions over nodes, ways and relations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagFilter {
    pub conditions: Vec<TagCondition>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(mut self, key: &str) -> Self {
        self.conditions.push(TagCondition::Exists(key.to_string()));
        self
    }

    pub fn eq(mut self, key: &str, value: &str) -> Self {
        self.conditions
            .push(TagCondition::Equals(key.to_string(), value.to_string()));
        self
    }

    pub fn matches(mut self, key: &str, pattern: &str) -> Self {
        self.conditions
            .push(TagCondition::Matches(key.to_string(), pattern.to_string()));
        self
    }

    fn render(&self, bbox: &str, out: &mut String) {
        out.push_str("  nwr");
        for condition in &self.conditions {
            condition.render(out);
        }
        out.push_str(bbox);
        out.push_str(";\n");
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Overpass bounding box: `(south,west,north,east)`.
pub fn format_bbox(bounds: &BoundingBox) -> String {
    format!(
        "({:.6},{:.6},{:.6},{:.6})",
        bounds.south, bounds.west, bounds.north, bounds.east
    )
}

/// Build one compound query: the union of every filter scoped to the box.
///
/// Areas are returned with their center so every element has one position.
pub fn build_query(filters: &[TagFilter], bounds: &BoundingBox, timeout_secs: u64) -> String {
    let bbox = format_bbox(bounds);
    let mut query = format!("[out:json][timeout:{}];\n(\n", timeout_secs);
    let mut seen: Vec<&TagFilter> = Vec::with_capacity(filters.len());
    for filter in filters {
        if seen.contains(&filter) {
            continue;
        }
        seen.push(filter);
        filter.render(&bbox, &mut query);
    }
    query.push_str(");\nout center tags;\n");
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_query() {
        let bounds = BoundingBox::new(39.5, -105.25, 40.0, -104.75);
        let filters = vec![
            TagFilter::new().eq("amenity", "fuel"),
            TagFilter::new().eq("highway", "rest_area"),
            TagFilter::new().eq("amenity", "fuel"),
            TagFilter::new().eq("amenity", "parking").matches("hgv", "^(yes|designated)$"),
        ];

        let query = build_query(&filters, &bounds, 90);
        assert_eq!(
            query,
            "[out:json][timeout:90];\n(\n\
             \x20 nwr[\"amenity\"=\"fuel\"](39.500000,-105.250000,40.000000,-104.750000);\n\
             \x20 nwr[\"highway\"=\"rest_area\"](39.500000,-105.250000,40.000000,-104.750000);\n\
             \x20 nwr[\"amenity\"=\"parking\"][\"hgv\"~\"^(yes|designated)$\",i](39.500000,-105.250000,40.000000,-104.750000);\n\
             );\nout center tags;\n"
        );
    }

    #[test]
    fn test_values_are_escaped() {
        let bounds = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let query = build_query(&[TagFilter::new().eq("name", "Love\"s")], &bounds, 10);
        assert!(query.contains("[\"name\"=\"Love\\\"s\"]"));
    }
}
