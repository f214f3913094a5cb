use crate::config::AppConfig;
use crate::types::FacilityRecord;
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geojson::{FeatureCollection, GeoJson};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::{info, warn};

pub fn load_facilities(config: &AppConfig) -> Result<Vec<FacilityRecord>> {
    let file = File::open(&config.input.facilities_csv)
        .with_context(|| format!("Failed to open CSV file: {:?}", config.input.facilities_csv))?;

    let records = read_facilities(
        file,
        &config.input.longitude_column,
        &config.input.latitude_column,
    )?;
    info!("Loaded {} facility records", records.len());
    Ok(records)
}

fn read_facilities<R: Read>(reader: R, lon_column: &str, lat_column: &str) -> Result<Vec<FacilityRecord>> {
    let mut rdr = ReaderBuilder::new().from_reader(reader);
    let headers = rdr.headers()?.clone();

    let lon_idx = headers.iter().position(|h| h == lon_column);
    let lat_idx = headers.iter().position(|h| h == lat_column);
    if lon_idx.is_none() || lat_idx.is_none() {
        // Not fatal: records simply carry no coordinates and never reach the
        // aggregation pass. The non-spatial endpoints still work.
        warn!(
            "Coordinate columns '{}'/'{}' not found in CSV headers",
            lon_column, lat_column
        );
    }

    let mut records = Vec::new();

    for result in rdr.records() {
        let record = result?;

        let mut attributes = Map::new();
        for (i, header) in headers.iter().enumerate() {
            attributes.insert(header.to_string(), field_value(record.get(i).unwrap_or("")));
        }

        let longitude = lon_idx.and_then(|i| record.get(i)).and_then(parse_finite);
        let latitude = lat_idx.and_then(|i| record.get(i)).and_then(parse_finite);

        records.push(FacilityRecord {
            longitude,
            latitude,
            attributes,
        });
    }

    Ok(records)
}

/// Mirror the loose typing of the upstream table in the JSON we hand back:
/// numeric-looking fields become JSON numbers, empty cells become null.
fn field_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

fn parse_finite(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

pub fn load_districts(config: &AppConfig) -> Result<FeatureCollection> {
    let path = &config.input.districts_geojson;
    info!("Loading district boundaries from {:?}", path);
    let file =
        File::open(path).with_context(|| format!("Failed to open district GeoJSON: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).context("Failed to parse district GeoJSON")?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("District GeoJSON must be a FeatureCollection")),
    };
    info!("Loaded {} district features", collection.features.len());
    Ok(collection)
}
