use serde_json::{Map, Value};

/// One row of the facilities table. The coordinate fields are parsed and
/// validated once at load time; everything else rides along untouched in
/// `attributes` (which also keeps the raw coordinate columns) and is only
/// ever echoed back out through the API.
#[derive(Debug, Clone)]
pub struct FacilityRecord {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub attributes: Map<String, Value>,
}
