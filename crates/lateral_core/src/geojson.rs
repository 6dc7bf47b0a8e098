//! GeoJSON rendering of derived records.
//!
//! A record renders as its stub when it has one, as the line from the
//! mainline to the lateral point when only that is known, and as a bare
//! Point otherwise.

use serde_json::{json, Map, Value};

use crate::geodesy::LngLat;
use crate::model::{LateralInspection, TapInspection};

fn geometry(coordinates: LngLat, connection: Option<LngLat>, stub: Option<[LngLat; 2]>) -> Value {
    if let Some([p0, p1]) = stub {
        return json!({ "type": "LineString", "coordinates": [p0, p1] });
    }
    match connection {
        Some(c) if c != coordinates => {
            json!({ "type": "LineString", "coordinates": [c, coordinates] })
        }
        _ => json!({ "type": "Point", "coordinates": coordinates }),
    }
}

fn feature(geometry: Value, mut properties: Map<String, Value>) -> Value {
    // already carried by the geometry
    properties.remove("stubLine");
    json!({ "type": "Feature", "geometry": geometry, "properties": properties })
}

fn properties<T: serde::Serialize>(record: &T) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn lateral_feature(lateral: &LateralInspection) -> Value {
    feature(
        geometry(lateral.coordinates, lateral.connection_point, lateral.stub_line),
        properties(lateral),
    )
}

pub fn tap_feature(tap: &TapInspection) -> Value {
    let mut props = properties(tap);
    props.insert("source".into(), json!("tap"));
    feature(geometry(tap.coordinates, tap.connection_point, tap.stub_line), props)
}

pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({ "type": "FeatureCollection", "features": features })
}

pub fn laterals_to_geojson(laterals: &[LateralInspection]) -> Value {
    feature_collection(laterals.iter().map(lateral_feature).collect())
}

pub fn taps_to_geojson(taps: &[TapInspection]) -> Value {
    feature_collection(taps.iter().map(tap_feature).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_wins_over_reference_line() {
        let g = geometry([1.0, 2.0], Some([1.5, 2.5]), Some([[1.5, 2.5], [1.6, 2.6]]));
        assert_eq!(g["type"], "LineString");
        assert_eq!(g["coordinates"][1], json!([1.6, 2.6]));
    }

    #[test]
    fn reference_line_when_only_connection_is_known() {
        let g = geometry([1.0, 2.0], Some([1.5, 2.5]), None);
        assert_eq!(g["type"], "LineString");
        assert_eq!(g["coordinates"], json!([[1.5, 2.5], [1.0, 2.0]]));
    }

    #[test]
    fn point_otherwise() {
        assert_eq!(geometry([1.0, 2.0], None, None)["type"], "Point");
        assert_eq!(geometry([1.0, 2.0], Some([1.0, 2.0]), None)["type"], "Point");
    }
}
