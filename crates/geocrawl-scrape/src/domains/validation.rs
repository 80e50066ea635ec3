//! Data-quality checks shared by every domain.

use thiserror::Error;

/// Minimum decimal places expected on at least one axis.
const MIN_DECIMALS: usize = 3;

/// Why an element was not kept. Rejections are counted, not treated as errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("coordinates out of range ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("null island coordinates")]
    NullIsland,

    #[error("coordinates too coarse ({lat}, {lon})")]
    LowPrecision { lat: f64, lon: f64 },

    #[error("missing {0} tag")]
    Missing(&'static str),

    #[error("cannot parse {tag} value {value:?}")]
    Unparseable { tag: &'static str, value: String },

    #[error("{value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("excluded: {0}")]
    Excluded(&'static str),

    #[error("category {0} not requested")]
    OutOfScope(String),

    #[error("duplicate of {0}")]
    Duplicate(String),
}

/// Count decimal places in the shortest round-trip rendering of `value`.
pub fn decimal_places(value: f64) -> usize {
    let rendered = value.to_string();
    rendered
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len())
}

/// Reject out-of-range, (0,0) and low-precision positions.
pub fn check_coordinates(lat: f64, lon: f64) -> Result<(), Rejection> {
    if !lat.is_finite()
        || !lon.is_finite()
        || !(-90.0..=90.0).contains(&lat)
        || !(-180.0..=180.0).contains(&lon)
    {
        return Err(Rejection::InvalidCoordinates { lat, lon });
    }
    if lat == 0.0 && lon == 0.0 {
        return Err(Rejection::NullIsland);
    }
    if decimal_places(lat) < MIN_DECIMALS && decimal_places(lon) < MIN_DECIMALS {
        return Err(Rejection::LowPrecision { lat, lon });
    }
    Ok(())
}

/// Inclusive plausibility range check.
pub fn check_range(value: f64, min: f64, max: f64) -> Result<f64, Rejection> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Rejection::OutOfRange { value, min, max })
    }
}

/// Round to two decimals for storage.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
