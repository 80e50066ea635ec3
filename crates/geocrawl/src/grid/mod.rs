//! Grid tiling of geographic regions into overlapping query cells.
//!
//! Cells are ordered row-major, south to north then west to east, and the
//! sequence for a given region and parameters never changes. A crawl run can
//! therefore be resumed by skipping the first `current_cell` cells.

mod regions;

pub use regions::{all_regions, region, Region};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Approximate miles per degree of latitude.
pub const MILES_PER_DEGREE: f64 = 69.0;

/// Mean Earth radius in miles.
const EARTH_RADIUS_MILES: f64 = 3958.8;

pub const METERS_PER_MILE: f64 = 1609.344;

/// Shrinks the spacing so Earth's curvature never pushes a cell corner past
/// the query radius.
const COVERAGE_MARGIN: f64 = 0.995;

pub const DEFAULT_SPACING_MILES: f64 = 50.0;
pub const DEFAULT_RADIUS_MILES: f64 = 25.0;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Invalid tiling parameters: spacing {spacing} mi, radius {radius} mi")]
    InvalidParameters { spacing: f64, radius: f64 },
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A south/west/north/east rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }

    /// Box extending `radius_miles` around a point.
    pub fn around(point: GeoPoint, radius_miles: f64) -> Self {
        let dlat = radius_miles / MILES_PER_DEGREE;
        let cos = point.lat.to_radians().cos().max(0.01);
        let dlon = radius_miles / (MILES_PER_DEGREE * cos);
        Self {
            south: (point.lat - dlat).max(-90.0),
            west: (point.lon - dlon).max(-180.0),
            north: (point.lat + dlat).min(90.0),
            east: (point.lon + dlon).min(180.0),
        }
    }
}

/// One query cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Position in the full tiling sequence.
    pub index: usize,
    /// Region code the cell was tiled from, empty for ad hoc rectangles.
    pub region: String,
    pub center: GeoPoint,
    /// Query box: the center plus the radius in every direction.
    pub bounds: BoundingBox,
}

/// Great-circle distance in miles.
pub fn distance_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

/// Great-circle distance in meters.
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    distance_miles(a, b) * METERS_PER_MILE
}

/// Partitions regions into cells whose query circles cover them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTiler {
    spacing_miles: f64,
    radius_miles: f64,
}

impl Default for GridTiler {
    fn default() -> Self {
        Self {
            spacing_miles: DEFAULT_SPACING_MILES,
            radius_miles: DEFAULT_RADIUS_MILES,
        }
    }
}

impl GridTiler {
    pub fn new(spacing_miles: f64, radius_miles: f64) -> Result<Self, GridError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(spacing_miles) || !valid(radius_miles) {
            return Err(GridError::InvalidParameters {
                spacing: spacing_miles,
                radius: radius_miles,
            });
        }
        Ok(Self {
            spacing_miles,
            radius_miles,
        })
    }

    pub fn radius_miles(&self) -> f64 {
        self.radius_miles
    }

    /// Spacing actually used between centers.
    ///
    /// Capped at `radius * sqrt(2)`: with centers on a square lattice of that
    /// pitch, the farthest point from any center is exactly one radius away.
    pub fn effective_spacing(&self) -> f64 {
        self.spacing_miles
            .min(self.radius_miles * std::f64::consts::SQRT_2)
            * COVERAGE_MARGIN
    }

    /// Tile one rectangle.
    ///
    /// Rows are spread evenly between south and north. Each row's longitude
    /// step uses the row edge nearest the equator, where degrees of longitude
    /// are widest.
    pub fn tile(&self, bounds: &BoundingBox) -> Vec<Cell> {
        self.tile_region(bounds, "", 0)
    }

    fn tile_region(&self, bounds: &BoundingBox, region: &str, first_index: usize) -> Vec<Cell> {
        let spacing = self.effective_spacing();
        let height = (bounds.north - bounds.south).max(0.0);
        let width = (bounds.east - bounds.west).max(0.0);

        let lat_step = spacing / MILES_PER_DEGREE;
        let rows = ((height / lat_step).ceil() as usize).max(1);
        let row_height = height / rows as f64;

        let mut cells = Vec::new();
        for row in 0..rows {
            let row_south = bounds.south + row as f64 * row_height;
            let row_north = row_south + row_height;
            let widest_lat = if row_south <= 0.0 && row_north >= 0.0 {
                0.0
            } else {
                row_south.abs().min(row_north.abs())
            };
            let cos = widest_lat.to_radians().cos().max(0.01);
            let lon_step = spacing / (MILES_PER_DEGREE * cos);
            let cols = ((width / lon_step).ceil() as usize).max(1);
            let col_width = width / cols as f64;

            let lat = bounds.south + (row as f64 + 0.5) * row_height;
            for col in 0..cols {
                let lon = bounds.west + (col as f64 + 0.5) * col_width;
                let center = GeoPoint::new(lat, lon);
                cells.push(Cell {
                    index: first_index + cells.len(),
                    region: region.to_string(),
                    center,
                    bounds: BoundingBox::around(center, self.radius_miles),
                });
            }
        }
        cells
    }

    /// Tile a list of regions by code, concatenated in sorted code order.
    ///
    /// An empty list means every region.
    pub fn tile_regions(&self, codes: &[String]) -> Result<Vec<Cell>, GridError> {
        let regions = resolve_regions(codes)?;
        let mut cells = Vec::new();
        for r in regions {
            let tiled = self.tile_region(&r.bounds, r.code, cells.len());
            cells.extend(tiled);
        }
        Ok(cells)
    }
}

/// Resolve region codes, sorted and de-duplicated. Empty means all regions.
pub fn resolve_regions(codes: &[String]) -> Result<Vec<Region>, GridError> {
    if codes.is_empty() {
        return Ok(all_regions());
    }
    let mut regions = codes
        .iter()
        .map(|code| region(code).ok_or_else(|| GridError::UnknownRegion(code.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    regions.sort_by(|a, b| a.code.cmp(b.code));
    regions.dedup_by(|a, b| a.code == b.code);
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nearest_center_miles(cells: &[Cell], point: GeoPoint) -> f64 {
        cells
            .iter()
            .map(|c| distance_miles(c.center, point))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_every_point_within_radius() {
        let tiler = GridTiler::default();
        for code in ["TX", "CO", "FL", "ME", "DC"] {
            let r = region(code).unwrap();
            let cells = tiler.tile(&r.bounds);
            let b = r.bounds;
            let steps = 40;
            for i in 0..=steps {
                for j in 0..=steps {
                    let point = GeoPoint::new(
                        b.south + (b.north - b.south) * i as f64 / steps as f64,
                        b.west + (b.east - b.west) * j as f64 / steps as f64,
                    );
                    let d = nearest_center_miles(&cells, point);
                    assert!(
                        d <= tiler.radius_miles(),
                        "{} point {:?} is {} miles from nearest center",
                        code,
                        point,
                        d
                    );
                }
            }
        }
    }

    #[test]
    fn test_tiling_is_deterministic_and_row_major() {
        let tiler = GridTiler::default();
        let bounds = region("CO").unwrap().bounds;
        let a = tiler.tile(&bounds);
        let b = tiler.tile(&bounds);
        assert_eq!(a, b);

        for pair in a.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(
                next.center.lat > prev.center.lat
                    || (next.center.lat == prev.center.lat && next.center.lon > prev.center.lon)
            );
            assert_eq!(next.index, prev.index + 1);
        }
    }

    #[test]
    fn test_tiny_region_gets_one_cell() {
        let tiler = GridTiler::default();
        let cells = tiler.tile(&region("DC").unwrap().bounds);
        assert_eq!(cells.len(), 1);
        assert!(cells[0].bounds.contains(GeoPoint::new(38.9, -77.0)));
    }

    #[test]
    fn test_cell_box_spans_radius() {
        let center = GeoPoint::new(40.0, -100.0);
        let b = BoundingBox::around(center, 25.0);
        let north = GeoPoint::new(b.north, center.lon);
        let east = GeoPoint::new(center.lat, b.east);
        assert!((distance_miles(center, north) - 25.0).abs() < 0.1);
        assert!((distance_miles(center, east) - 25.0).abs() < 0.1);
    }

    #[test]
    fn test_multi_region_concatenates_in_sorted_order() {
        let tiler = GridTiler::default();
        let cells = tiler
            .tile_regions(&["wy".to_string(), "CO".to_string(), "CO".to_string()])
            .unwrap();
        let co = tiler.tile(&region("CO").unwrap().bounds).len();
        let wy = tiler.tile(&region("WY").unwrap().bounds).len();
        assert_eq!(cells.len(), co + wy);
        assert_eq!(cells[0].region, "CO");
        assert_eq!(cells[co].region, "WY");
        assert!(cells.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_unknown_region_rejected() {
        let tiler = GridTiler::default();
        assert_eq!(
            tiler.tile_regions(&["ZZ".to_string()]),
            Err(GridError::UnknownRegion("ZZ".to_string()))
        );
    }

    #[test]
    fn test_effective_spacing_capped() {
        let tiler = GridTiler::new(50.0, 25.0).unwrap();
        assert!(tiler.effective_spacing() < 25.0 * std::f64::consts::SQRT_2);

        let dense = GridTiler::new(10.0, 25.0).unwrap();
        assert!((dense.effective_spacing() - 10.0 * COVERAGE_MARGIN).abs() < 1e-9);

        assert!(GridTiler::new(0.0, 25.0).is_err());
        assert!(GridTiler::new(50.0, f64::NAN).is_err());
    }

    #[test]
    fn test_distance_meters() {
        let a = GeoPoint::new(39.7392, -104.9903);
        let b = GeoPoint::new(39.7394, -104.9903);
        let d = distance_meters(a, b);
        assert!(d > 20.0 && d < 25.0, "{}", d);
    }
}
