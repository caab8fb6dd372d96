//! GeoJSON layer decoding.
//!
//! Provider archives deliver each layer as a GeoJSON FeatureCollection.
//! The decoder infers a flat column schema from feature properties,
//! keeps feature ids as the identity column and carries geometries as
//! their serialized GeoJSON bytes, leaving geometry interpretation to
//! downstream consumers.

use std::{collections::BTreeMap, fs, path::Path};

use serde_json::Value as Json;
use snapshots::{BoxError, Column, ColumnType, LayerDecoder, Snapshot, Value};

const IDENTITY_COLUMN: &str = "id";
const GEOMETRY_COLUMN: &str = "geometry";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not valid GeoJSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("{path} is not a FeatureCollection")]
    NotAFeatureCollection { path: String },
}

/// Decodes a GeoJSON payload file into one snapshot, named after the
/// file stem.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonDecoder;

impl LayerDecoder for GeoJsonDecoder {
    fn decode_layers(&self, payload: &Path) -> Result<BTreeMap<String, Snapshot>, BoxError> {
        let layer = payload
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "layer".to_owned());

        let text = fs::read_to_string(payload).map_err(|source| DecodeError::Read {
            path: payload.display().to_string(),
            source,
        })?;
        let document: Json = serde_json::from_str(&text).map_err(|source| DecodeError::Parse {
            path: payload.display().to_string(),
            source,
        })?;

        let snapshot = decode_feature_collection(&layer, &document).ok_or_else(|| {
            DecodeError::NotAFeatureCollection {
                path: payload.display().to_string(),
            }
        })?;

        Ok(BTreeMap::from([(layer, snapshot)]))
    }
}

fn decode_feature_collection(layer: &str, document: &Json) -> Option<Snapshot> {
    if document.get("type").and_then(Json::as_str) != Some("FeatureCollection") {
        return None;
    }
    let features = document.get("features")?.as_array()?;

    let every_feature_has_id = !features.is_empty()
        && features
            .iter()
            .all(|feature| feature.get("id").is_some_and(|id| !id.is_null()));
    let any_geometry = features
        .iter()
        .any(|feature| feature.get("geometry").is_some_and(|g| !g.is_null()));

    // Property columns, typed by the values observed across features.
    // Mixed-type properties widen to text.
    let mut property_types: BTreeMap<String, ColumnType> = BTreeMap::new();
    for feature in features {
        let Some(properties) = feature.get("properties").and_then(Json::as_object) else {
            continue;
        };
        for (name, value) in properties {
            if value.is_null() {
                continue;
            }
            let ty = json_column_type(value);
            property_types
                .entry(name.clone())
                .and_modify(|current| *current = widen(*current, ty))
                .or_insert(ty);
        }
    }

    let mut columns = Vec::new();
    if every_feature_has_id {
        columns.push(Column::new(IDENTITY_COLUMN, ColumnType::Text));
    }
    for (name, ty) in &property_types {
        columns.push(Column::new(name, *ty));
    }
    if any_geometry {
        columns.push(Column::new(GEOMETRY_COLUMN, ColumnType::Geometry));
    }

    let mut rows = Vec::with_capacity(features.len());
    for feature in features {
        let mut row = Vec::with_capacity(columns.len());
        if every_feature_has_id {
            row.push(id_value(&feature["id"]));
        }
        let properties = feature.get("properties").and_then(Json::as_object);
        for (name, ty) in &property_types {
            let value = properties.and_then(|props| props.get(name));
            row.push(value.map_or(Value::Null, |value| cell_value(value, *ty)));
        }
        if any_geometry {
            row.push(geometry_value(feature.get("geometry")));
        }
        rows.push(row);
    }

    Some(Snapshot {
        layer: layer.to_owned(),
        identity_column: every_feature_has_id.then(|| IDENTITY_COLUMN.to_owned()),
        columns,
        rows,
    })
}

fn json_column_type(value: &Json) -> ColumnType {
    match value {
        Json::Bool(_) => ColumnType::Boolean,
        Json::Number(n) if n.is_i64() => ColumnType::BigInt,
        Json::Number(_) => ColumnType::Double,
        _ => ColumnType::Text,
    }
}

fn widen(current: ColumnType, observed: ColumnType) -> ColumnType {
    match (current, observed) {
        (a, b) if a == b => a,
        (ColumnType::BigInt, ColumnType::Double) | (ColumnType::Double, ColumnType::BigInt) => {
            ColumnType::Double
        }
        _ => ColumnType::Text,
    }
}

fn id_value(id: &Json) -> Value {
    match id {
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn cell_value(value: &Json, ty: ColumnType) -> Value {
    match (ty, value) {
        (_, Json::Null) => Value::Null,
        (ColumnType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
        (ColumnType::BigInt, Json::Number(n)) => {
            n.as_i64().map_or(Value::Null, Value::BigInt)
        }
        (ColumnType::Double, Json::Number(n)) => n.as_f64().map_or(Value::Null, Value::Double),
        (_, Json::String(s)) => Value::Text(s.clone()),
        (_, other) => Value::Text(other.to_string()),
    }
}

fn geometry_value(geometry: Option<&Json>) -> Value {
    match geometry {
        Some(geometry) if !geometry.is_null() => Value::Bytes(geometry.to_string().into_bytes()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collection(features: Json) -> Json {
        json!({ "type": "FeatureCollection", "features": features })
    }

    #[test]
    fn infers_columns_and_identity_from_features() {
        let document = collection(json!([
            {
                "type": "Feature",
                "id": "f1",
                "properties": { "name": "Kiruna", "area": 1.5, "count": 3 },
                "geometry": { "type": "Point", "coordinates": [20.2, 67.8] },
            },
            {
                "type": "Feature",
                "id": "f2",
                "properties": { "name": "Luleå", "area": 2.0, "count": 7 },
                "geometry": null,
            },
        ]));

        let snapshot = decode_feature_collection("orter", &document).unwrap();

        assert_eq!(snapshot.identity_column.as_deref(), Some("id"));
        let names: Vec<_> = snapshot.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "area", "count", "name", "geometry"]);
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.rows[0][0], Value::from("f1"));
        assert_eq!(snapshot.rows[1][4], Value::Null);
    }

    #[test]
    fn features_without_ids_yield_no_identity_column() {
        let document = collection(json!([
            { "type": "Feature", "properties": { "name": "a" }, "geometry": null },
            { "type": "Feature", "id": "f2", "properties": { "name": "b" }, "geometry": null },
        ]));

        let snapshot = decode_feature_collection("orter", &document).unwrap();

        assert_eq!(snapshot.identity_column, None);
        let names: Vec<_> = snapshot.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name"]);
    }

    #[test]
    fn mixed_numeric_property_widens_to_double() {
        let document = collection(json!([
            { "type": "Feature", "id": "f1", "properties": { "area": 1 }, "geometry": null },
            { "type": "Feature", "id": "f2", "properties": { "area": 1.5 }, "geometry": null },
        ]));

        let snapshot = decode_feature_collection("orter", &document).unwrap();

        assert_eq!(snapshot.columns[1].ty, ColumnType::Double);
        assert_eq!(snapshot.rows[0][1], Value::Double(1.0));
    }

    #[test]
    fn non_feature_collection_is_rejected() {
        let document = json!({ "type": "Feature" });

        assert!(decode_feature_collection("orter", &document).is_none());
    }

    #[test]
    fn decodes_payload_file_into_one_layer_named_after_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("byggnad.geojson");
        let document = collection(json!([
            { "type": "Feature", "id": "f1", "properties": { "name": "a" }, "geometry": null },
        ]));
        std::fs::write(&payload, document.to_string()).unwrap();

        let layers = GeoJsonDecoder.decode_layers(&payload).unwrap();

        assert_eq!(layers.len(), 1);
        assert_eq!(layers["byggnad"].rows.len(), 1);
    }
}
