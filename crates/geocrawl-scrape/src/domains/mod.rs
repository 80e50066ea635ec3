//! Per-domain query filters, classification and validation.

mod crossing;
mod height;
mod poi;
mod validation;
mod weight;

pub use crossing::CrossingDomain;
pub use height::{parse_height_feet, HeightDomain};
pub use poi::PoiDomain;
pub use validation::{check_coordinates, check_range, decimal_places, Rejection};
pub use weight::{parse_weight_tons, WeightDomain};

use geocrawl::models::{CrawlScope, NormalizedRecord, RecordKind, WorkerType};

use crate::element::RawElement;
use crate::overpass::TagFilter;

/// A closed category set with the filters, parsing and checks of one kind of
/// record.
pub trait Domain: Send + Sync {
    fn kind(&self) -> RecordKind;

    /// Categories this domain produces.
    fn categories(&self) -> Vec<&'static str>;

    /// Query filters for a scope.
    fn filters(&self, scope: &CrawlScope) -> Vec<TagFilter>;

    /// Turn a raw element into a record, or say why it was dropped.
    fn normalize(
        &self,
        element: &RawElement,
        scope: &CrawlScope,
    ) -> Result<NormalizedRecord, Rejection>;

    /// Records closer than this many metres collapse into the first one kept.
    fn dedup_radius_m(&self) -> Option<f64> {
        None
    }
}

/// Domain a worker type crawls.
pub fn domain_for(worker: WorkerType) -> Box<dyn Domain> {
    match worker.record_kind() {
        RecordKind::Poi => Box::new(PoiDomain::new()),
        RecordKind::Height => Box::new(HeightDomain),
        RecordKind::Crossing => Box::new(CrossingDomain::new()),
        RecordKind::Weight => Box::new(WeightDomain),
    }
}

/// Drop categories the scope did not ask for.
pub(crate) fn check_scope(category: &str, scope: &CrawlScope) -> Result<(), Rejection> {
    if scope.categories.is_empty() || scope.categories.iter().any(|c| c == category) {
        Ok(())
    } else {
        Err(Rejection::OutOfScope(category.to_string()))
    }
}

/// Common position checks and record assembly.
pub(crate) fn build_record(
    kind: RecordKind,
    element: &RawElement,
    category: &str,
    measure: Option<f64>,
    attributes: serde_json::Value,
) -> Result<NormalizedRecord, Rejection> {
    check_coordinates(element.lat, element.lon)?;
    Ok(NormalizedRecord {
        kind,
        external_id: element.external_id(),
        latitude: element.lat,
        longitude: element.lon,
        category: category.to_string(),
        name: element.first_of(&["name", "brand"]).map(str::to_string),
        measure,
        attributes,
    })
}
