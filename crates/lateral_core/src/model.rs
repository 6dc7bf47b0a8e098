//! Typed input records and derived output records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::InputError;
use crate::fields;
use crate::geocode::GeocodeStatus;
use crate::geodesy::{LngLat, FEET_TO_METERS};

/// Asset geometry in `[lng, lat]` order as stored in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetGeometry {
    Point(LngLat),
    LineString(Vec<LngLat>),
    MultiLineString(Vec<Vec<LngLat>>),
    /// Anything else, kept so the projector can reject it per record.
    Unsupported(String),
}

impl AssetGeometry {
    pub fn type_name(&self) -> &str {
        match self {
            AssetGeometry::Point(_) => "Point",
            AssetGeometry::LineString(_) => "LineString",
            AssetGeometry::MultiLineString(_) => "MultiLineString",
            AssetGeometry::Unsupported(kind) => kind,
        }
    }

    /// The polyline used for measuring; multi-lines use their first member.
    pub fn primary_line(&self) -> Option<&[LngLat]> {
        match self {
            AssetGeometry::LineString(line) => Some(line),
            AssetGeometry::MultiLineString(lines) => lines.first().map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn from_geojson(geometry: &Value) -> Self {
        let Some(obj) = geometry.as_object() else {
            return AssetGeometry::Unsupported("null".into());
        };
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let coords = obj.get("coordinates");

        let parsed = match kind {
            "Point" => coords.and_then(parse_position).map(AssetGeometry::Point),
            "LineString" => coords.and_then(parse_line).map(AssetGeometry::LineString),
            "MultiLineString" => coords
                .and_then(Value::as_array)
                .and_then(|lines| lines.iter().map(parse_line).collect::<Option<Vec<_>>>())
                .map(AssetGeometry::MultiLineString),
            other => return AssetGeometry::Unsupported(other.to_string()),
        };

        parsed.unwrap_or_else(|| AssetGeometry::Unsupported(format!("{kind} (malformed coordinates)")))
    }
}

fn parse_position(value: &Value) -> Option<LngLat> {
    match value.as_array()?.as_slice() {
        [x, y, ..] => Some([x.as_f64()?, y.as_f64()?]),
        _ => None,
    }
}

fn parse_line(value: &Value) -> Option<Vec<LngLat>> {
    value.as_array()?.iter().map(parse_position).collect()
}

#[derive(Debug, Clone)]
pub struct Asset {
    /// Primary identity, joins to `InspectionRecord::pipe_segment_reference`.
    pub fid: Option<String>,
    /// Fallback identity for assets exported without an FID.
    pub asset_id: Option<String>,
    pub geometry: AssetGeometry,
    pub properties: Map<String, Value>,
}

impl Asset {
    /// The key the asset is reported under: FID, else its id.
    pub fn key(&self) -> Option<&str> {
        self.fid.as_deref().or(self.asset_id.as_deref())
    }

    pub fn from_feature(feature: &Value) -> Option<Self> {
        let obj = feature.as_object()?;
        let properties = obj
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        // Some exports put the id on the feature instead of in properties.
        let asset_id = fields::text(&properties, &fields::ASSET_ID)
            .or_else(|| obj.get("id").and_then(fields::scalar_text));

        Some(Self {
            fid: fields::text(&properties, &fields::ASSET_FID),
            asset_id,
            geometry: AssetGeometry::from_geojson(obj.get("geometry").unwrap_or(&Value::Null)),
            properties,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionRecord {
    pub inspection_id: Option<String>,
    pub pipe_segment_reference: Option<String>,
    pub asset_id: Option<String>,
    /// As recorded; feet when `imperial` is set.
    pub tap_distance: Option<f64>,
    pub clock_position: Option<f64>,
    pub imperial: bool,
    pub direction: Option<String>,
    pub length_surveyed: Option<f64>,
    pub upstream_manhole: Option<String>,
    pub downstream_manhole: Option<String>,
    pub inspection_date: Option<String>,
}

impl InspectionRecord {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        use fields::*;

        Self {
            inspection_id: text(row, &INSPECTION_ID),
            pipe_segment_reference: text(row, &PIPE_SEGMENT_REF),
            asset_id: text(row, &INSPECTION_ASSET_ID),
            tap_distance: number(row, &TAP_DISTANCE),
            clock_position: number(row, &CLOCK_POSITION),
            imperial: flag(row, &IMPERIAL),
            direction: text(row, &DIRECTION),
            length_surveyed: number(row, &LENGTH_SURVEYED),
            upstream_manhole: text(row, &UPSTREAM_MH),
            downstream_manhole: text(row, &DOWNSTREAM_MH),
            inspection_date: text(row, &INSPECTION_DATE),
        }
    }

    /// Short label for logs.
    pub fn reference(&self) -> String {
        self.inspection_id
            .clone()
            .or_else(|| self.pipe_segment_reference.clone())
            .unwrap_or_else(|| "<unnamed>".into())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefectRecord {
    pub defect_id: Option<String>,
    pub inspection_id: Option<String>,
    pub pipe_segment_reference: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub grade: Option<String>,
    /// As recorded; feet when the defect or its inspection is imperial.
    pub distance: Option<f64>,
    pub clock_position: Option<f64>,
    pub imperial: bool,
}

impl DefectRecord {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        use fields::*;

        Self {
            defect_id: text(row, &DEFECT_ID),
            inspection_id: text(row, &INSPECTION_ID),
            pipe_segment_reference: text(row, &PIPE_SEGMENT_REF),
            code: text(row, &DEFECT_CODE),
            description: text(row, &DEFECT_DESCRIPTION),
            grade: text(row, &DEFECT_GRADE),
            distance: number(row, &DEFECT_DISTANCE),
            clock_position: number(row, &CLOCK_POSITION),
            imperial: flag(row, &IMPERIAL),
        }
    }

    /// Tap codes (TB, TF, TS) mark lateral connections found during inspection.
    /// Only taps with a numeric distance can be placed.
    pub fn is_tap(&self) -> bool {
        let coded = self.code.as_deref().is_some_and(|code| {
            let code = code.trim().to_ascii_uppercase();
            ["TB", "TF", "TS"].iter().any(|p| code.starts_with(p))
        });
        coded && self.distance.is_some_and(f64::is_finite)
    }

    pub fn reference(&self) -> String {
        self.defect_id
            .clone()
            .or_else(|| self.code.clone())
            .unwrap_or_else(|| "<unnamed>".into())
    }
}

/// Recorded distance in metres.
#[inline]
pub fn to_meters(distance: f64, imperial: bool) -> f64 {
    if imperial {
        distance * FEET_TO_METERS
    } else {
        distance
    }
}

// ---------- collection parsing ----------

fn rows<'a>(value: &'a Value, collection: &'static str) -> Result<&'a Vec<Value>, InputError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(obj) => ["rows", "records", "data"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .ok_or(InputError::Shape {
                collection,
                expected: "an array of rows",
            }),
        _ => Err(InputError::Shape {
            collection,
            expected: "an array of rows",
        }),
    }
}

/// Parses a FeatureCollection (or a bare feature array) into assets.
pub fn parse_assets(value: &Value) -> Result<Vec<Asset>, InputError> {
    const COLLECTION: &str = "assets";

    let features = match value {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("features")
            .and_then(Value::as_array)
            .ok_or(InputError::Shape {
                collection: COLLECTION,
                expected: "a FeatureCollection with a features array",
            })?,
        _ => {
            return Err(InputError::Shape {
                collection: COLLECTION,
                expected: "a FeatureCollection",
            })
        }
    };

    features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            Asset::from_feature(feature).ok_or(InputError::Row {
                collection: COLLECTION,
                index,
            })
        })
        .collect()
}

pub fn parse_inspections(value: &Value) -> Result<Vec<InspectionRecord>, InputError> {
    const COLLECTION: &str = "inspections";

    rows(value, COLLECTION)?
        .iter()
        .enumerate()
        .map(|(index, row)| {
            row.as_object()
                .map(InspectionRecord::from_row)
                .ok_or(InputError::Row {
                    collection: COLLECTION,
                    index,
                })
        })
        .collect()
}

pub fn parse_defects(value: &Value) -> Result<Vec<DefectRecord>, InputError> {
    const COLLECTION: &str = "defects";

    rows(value, COLLECTION)?
        .iter()
        .enumerate()
        .map(|(index, row)| {
            row.as_object()
                .map(DefectRecord::from_row)
                .ok_or(InputError::Row {
                    collection: COLLECTION,
                    index,
                })
        })
        .collect()
}

// ---------- derived records ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Inspection,
    Tap,
}

/// A defect attached to a lateral, placed by its own distance and clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatedDefect {
    pub defect_id: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub grade: Option<String>,
    pub distance_m: Option<f64>,
    pub clock_position: Option<f64>,
    pub coordinates: Option<LngLat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LateralInspection {
    pub asset_key: String,
    pub inspection_id: Option<String>,
    pub pipe_segment_reference: Option<String>,
    pub distance_m: f64,
    pub clock_position: f64,
    pub coordinates: LngLat,
    pub connection_point: Option<LngLat>,
    pub stub_line: Option<[LngLat; 2]>,
    pub address: String,
    pub geocode_status: GeocodeStatus,
    pub direction: Option<String>,
    pub upstream_manhole: Option<String>,
    pub downstream_manhole: Option<String>,
    pub defects: Vec<LocatedDefect>,
    pub source: Source,
    /// Set when a tap was promoted into a named lateral layer.
    pub layer_name: Option<String>,
    pub tap_defect_id: Option<String>,
    pub tap_defect_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TapInspection {
    pub asset_key: String,
    pub defect_id: Option<String>,
    pub defect_code: String,
    pub inspection_id: Option<String>,
    pub pipe_segment_reference: Option<String>,
    pub distance_m: f64,
    pub clock_position: f64,
    pub coordinates: LngLat,
    pub connection_point: Option<LngLat>,
    pub stub_line: Option<[LngLat; 2]>,
    pub address: String,
    pub geocode_status: GeocodeStatus,
}
