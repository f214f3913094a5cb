use crate::aggregate;
use crate::config::AppConfig;
use crate::points;
use crate::types::FacilityRecord;
use anyhow::Result;
use axum::{extract::State, response::Json, routing::get, Router};
use geojson::{FeatureCollection, GeoJson};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

const FACILITY_TYPE_COLUMN: &str = "Facility_Type";

pub struct AppState {
    pub facilities: Vec<FacilityRecord>,
    pub districts: FeatureCollection,
}

#[derive(Serialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
}

pub async fn start_server(
    config: AppConfig,
    facilities: Vec<FacilityRecord>,
    districts: FeatureCollection,
) -> Result<()> {
    let state = Arc::new(AppState {
        facilities,
        districts,
    });

    let app = Router::new()
        .route("/api/facilities", get(facilities_handler))
        .route("/api/facility_types", get(facility_types_handler))
        .route("/api/facilities_by_type", get(facilities_by_type_handler))
        .route("/api/districts", get(districts_handler))
        .nest_service("/", ServeDir::new(&config.server.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn facilities_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let records: Vec<Value> = state
        .facilities
        .iter()
        .map(|f| Value::Object(f.attributes.clone()))
        .collect();
    Json(Value::Array(records))
}

async fn facility_types_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(facility_types(&state.facilities))
}

async fn facilities_by_type_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TypeCount>> {
    Json(type_counts(&state.facilities))
}

/// Rebuilds the point store from the held records and runs one aggregation
/// pass over a copy of the district collection. Malformed districts are
/// logged and returned un-annotated; the rest carry a fresh count.
async fn districts_handler(State(state): State<Arc<AppState>>) -> Json<GeoJson> {
    let coords = points::build(&state.facilities);
    let annotated = aggregate::annotate(&state.districts, &coords);
    for error in &annotated.errors {
        warn!("Skipping facility count for {}", error);
    }
    Json(GeoJson::FeatureCollection(annotated.collection))
}

fn facility_types(facilities: &[FacilityRecord]) -> Vec<String> {
    let mut types: Vec<String> = facilities
        .iter()
        .filter_map(|f| f.attributes.get(FACILITY_TYPE_COLUMN))
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();
    types
}

/// Count facilities per type, most common first; ties break alphabetically
/// so the output is stable across runs.
fn type_counts(facilities: &[FacilityRecord]) -> Vec<TypeCount> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for facility in facilities {
        if let Some(kind) = facility
            .attributes
            .get(FACILITY_TYPE_COLUMN)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            *counts.entry(kind.to_string()).or_default() += 1;
        }
    }

    let mut out: Vec<TypeCount> = counts
        .into_iter()
        .map(|(kind, count)| TypeCount { kind, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));
    out
}
