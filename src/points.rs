use crate::types::FacilityRecord;
use geo::Coord;
use tracing::debug;

/// Builds the coordinate sequence the aggregator tests against. Records with
/// a missing or non-finite longitude/latitude are dropped without error:
/// absent coordinates are routine in the facilities table, not a data fault.
///
/// Every coordinate in the result is guaranteed finite. Downstream treats the
/// output as an unordered multiset, so ordering here carries no meaning.
pub fn build(records: &[FacilityRecord]) -> Vec<Coord<f64>> {
    let mut coords = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for record in records {
        match (record.longitude, record.latitude) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                coords.push(Coord { x, y });
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} facility records without usable coordinates", dropped);
    }
    coords
}
