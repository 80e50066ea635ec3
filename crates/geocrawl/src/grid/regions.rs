//! Bounding boxes of US states and the District of Columbia.

use super::BoundingBox;

/// `(code, name, south, west, north, east)`, sorted by code.
const REGIONS: &[(&str, &str, f64, f64, f64, f64)] = &[
    ("AK", "Alaska", 51.21, -179.15, 71.39, -129.98),
    ("AL", "Alabama", 30.14, -88.47, 35.01, -84.89),
    ("AR", "Arkansas", 33.00, -94.62, 36.50, -89.64),
    ("AZ", "Arizona", 31.33, -114.82, 37.00, -109.05),
    ("CA", "California", 32.53, -124.41, 42.01, -114.13),
    ("CO", "Colorado", 36.99, -109.06, 41.00, -102.04),
    ("CT", "Connecticut", 40.98, -73.73, 42.05, -71.79),
    ("DC", "District of Columbia", 38.79, -77.12, 38.99, -76.91),
    ("DE", "Delaware", 38.45, -75.79, 39.84, -75.05),
    ("FL", "Florida", 24.52, -87.63, 31.00, -80.03),
    ("GA", "Georgia", 30.36, -85.61, 35.00, -80.84),
    ("HI", "Hawaii", 18.91, -160.24, 22.24, -154.81),
    ("IA", "Iowa", 40.38, -96.64, 43.50, -90.14),
    ("ID", "Idaho", 41.99, -117.24, 49.00, -111.04),
    ("IL", "Illinois", 36.97, -91.51, 42.51, -87.50),
    ("IN", "Indiana", 37.77, -88.10, 41.76, -84.78),
    ("KS", "Kansas", 36.99, -102.05, 40.00, -94.59),
    ("KY", "Kentucky", 36.50, -89.57, 39.15, -81.96),
    ("LA", "Louisiana", 28.93, -94.04, 33.02, -88.82),
    ("MA", "Massachusetts", 41.24, -73.51, 42.89, -69.93),
    ("MD", "Maryland", 37.91, -79.49, 39.72, -75.05),
    ("ME", "Maine", 43.06, -71.08, 47.46, -66.95),
    ("MI", "Michigan", 41.70, -90.42, 48.31, -82.41),
    ("MN", "Minnesota", 43.50, -97.24, 49.38, -89.49),
    ("MO", "Missouri", 35.99, -95.77, 40.61, -89.10),
    ("MS", "Mississippi", 30.17, -91.66, 35.00, -88.10),
    ("MT", "Montana", 44.36, -116.05, 49.00, -104.04),
    ("NC", "North Carolina", 33.84, -84.32, 36.59, -75.46),
    ("ND", "North Dakota", 45.94, -104.05, 49.00, -96.55),
    ("NE", "Nebraska", 40.00, -104.05, 43.00, -95.31),
    ("NH", "New Hampshire", 42.70, -72.56, 45.31, -70.61),
    ("NJ", "New Jersey", 38.93, -75.56, 41.36, -73.89),
    ("NM", "New Mexico", 31.33, -109.05, 37.00, -103.00),
    ("NV", "Nevada", 35.00, -120.01, 42.00, -114.04),
    ("NY", "New York", 40.50, -79.76, 45.02, -71.86),
    ("OH", "Ohio", 38.40, -84.82, 41.98, -80.52),
    ("OK", "Oklahoma", 33.62, -103.00, 37.00, -94.43),
    ("OR", "Oregon", 41.99, -124.57, 46.29, -116.46),
    ("PA", "Pennsylvania", 39.72, -80.52, 42.27, -74.69),
    ("RI", "Rhode Island", 41.15, -71.86, 42.02, -71.12),
    ("SC", "South Carolina", 32.03, -83.35, 35.22, -78.54),
    ("SD", "South Dakota", 42.48, -104.06, 45.95, -96.44),
    ("TN", "Tennessee", 34.98, -90.31, 36.68, -81.65),
    ("TX", "Texas", 25.84, -106.65, 36.50, -93.51),
    ("UT", "Utah", 37.00, -114.05, 42.00, -109.04),
    ("VA", "Virginia", 36.54, -83.68, 39.47, -75.24),
    ("VT", "Vermont", 42.73, -73.44, 45.02, -71.46),
    ("WA", "Washington", 45.54, -124.85, 49.00, -116.92),
    ("WI", "Wisconsin", 42.49, -92.89, 47.08, -86.81),
    ("WV", "West Virginia", 37.20, -82.64, 40.64, -77.72),
    ("WY", "Wyoming", 40.99, -111.06, 45.01, -104.05),
];

/// A named region with a bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub bounds: BoundingBox,
}

fn region_at(index: usize) -> Region {
    let (code, name, south, west, north, east) = REGIONS[index];
    Region {
        code,
        name,
        bounds: BoundingBox::new(south, west, north, east),
    }
}

/// Look up a region by its two-letter code (case-insensitive).
pub fn region(code: &str) -> Option<Region> {
    let code = code.trim().to_uppercase();
    REGIONS
        .iter()
        .position(|entry| entry.0 == code)
        .map(region_at)
}

/// Every region, sorted by code.
pub fn all_regions() -> Vec<Region> {
    (0..REGIONS.len()).map(region_at).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifty_states_and_dc() {
        let regions = all_regions();
        assert_eq!(regions.len(), 51);

        let codes: Vec<&str> = regions.iter().map(|r| r.code).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);

        for r in &regions {
            assert!(r.bounds.south < r.bounds.north, "{}", r.code);
            assert!(r.bounds.west < r.bounds.east, "{}", r.code);
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(region("tx").map(|r| r.name), Some("Texas"));
        assert_eq!(region(" dc ").map(|r| r.code), Some("DC"));
        assert!(region("PR").is_none());
    }
}
