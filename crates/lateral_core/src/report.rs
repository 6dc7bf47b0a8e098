//! Export validation: a last look at a FeatureCollection before it leaves.

use serde::Serialize;
use serde_json::Value;

use crate::geodesy::LngLat;
use crate::validate::CoordinateValidator;

/// Closer than this to (0, 0) is almost certainly a missing coordinate.
const NULL_ISLAND_EPS_DEG: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    fn from_point(p: LngLat) -> Self {
        Self {
            min_lng: p[0],
            min_lat: p[1],
            max_lng: p[0],
            max_lat: p[1],
        }
    }

    fn extend(&mut self, [lng, lat]: LngLat) {
        self.min_lng = self.min_lng.min(lng);
        self.max_lng = self.max_lng.max(lng);
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureIssue {
    /// `None` for problems with the collection itself.
    pub feature_index: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportValidationReport {
    pub feature_count: usize,
    pub valid_feature_count: usize,
    pub errors: Vec<FeatureIssue>,
    pub warnings: Vec<FeatureIssue>,
    pub bbox: Option<BoundingBox>,
}

impl ExportValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, feature_index: Option<usize>, message: impl Into<String>) {
        self.errors.push(FeatureIssue {
            feature_index,
            message: message.into(),
        });
    }

    fn warning(&mut self, feature_index: usize, message: impl Into<String>) {
        self.warnings.push(FeatureIssue {
            feature_index: Some(feature_index),
            message: message.into(),
        });
    }

    fn include(&mut self, p: LngLat) {
        match self.bbox.as_mut() {
            Some(bbox) => bbox.extend(p),
            None => self.bbox = Some(BoundingBox::from_point(p)),
        }
    }
}

pub fn validate_feature_collection(collection: &Value) -> ExportValidationReport {
    validate_feature_collection_with(collection, &CoordinateValidator::default())
}

pub fn validate_feature_collection_with(
    collection: &Value,
    validator: &CoordinateValidator,
) -> ExportValidationReport {
    let mut report = ExportValidationReport::default();

    let Some(features) = collection.get("features").and_then(Value::as_array) else {
        report.error(None, "not a FeatureCollection: missing features array");
        return report;
    };
    report.feature_count = features.len();

    for (index, feature) in features.iter().enumerate() {
        let errors_before = report.errors.len();
        check_feature(&mut report, index, feature, validator);
        if report.errors.len() == errors_before {
            report.valid_feature_count += 1;
        }
    }

    report
}

fn check_feature(
    report: &mut ExportValidationReport,
    index: usize,
    feature: &Value,
    validator: &CoordinateValidator,
) {
    let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
        report.error(Some(index), "missing geometry");
        return;
    };
    let coordinates = geometry.get("coordinates");

    let positions: Vec<&Value> = match geometry.get("type").and_then(Value::as_str) {
        Some("Point") => coordinates.into_iter().collect(),
        Some("LineString") => {
            let line = coordinates.and_then(Value::as_array);
            match line {
                Some(line) if line.len() >= 2 => line.iter().collect(),
                _ => {
                    report.error(Some(index), "LineString needs at least two positions");
                    return;
                }
            }
        }
        Some(other) => {
            report.error(Some(index), format!("unsupported geometry type '{other}'"));
            return;
        }
        None => {
            report.error(Some(index), "geometry has no type");
            return;
        }
    };

    let mut valid: Vec<LngLat> = Vec::with_capacity(positions.len());
    for (i, position) in positions.into_iter().enumerate() {
        let pair = position.as_array().and_then(|xs| match xs.as_slice() {
            [x, y, ..] => Some([x.as_f64()?, y.as_f64()?]),
            _ => None,
        });

        let Some([lng, lat]) = pair.filter(|[x, y]| x.is_finite() && y.is_finite()) else {
            report.error(Some(index), format!("position {i} is not a numeric pair"));
            continue;
        };

        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            report.error(Some(index), format!("position {i} out of range: [{lng}, {lat}]"));
            continue;
        }

        if validator.should_swap(lng, lat) {
            report.warning(index, format!("position {i} looks like [lat, lng]: [{lng}, {lat}]"));
        }
        if lng.abs() < NULL_ISLAND_EPS_DEG && lat.abs() < NULL_ISLAND_EPS_DEG {
            report.warning(index, format!("position {i} is at (0, 0)"));
        }

        valid.push([lng, lat]);
    }

    if valid.len() >= 2 && valid.windows(2).all(|w| w[0] == w[1]) {
        report.warning(index, "zero-length line");
    }

    for p in valid {
        report.include(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_collection_has_bbox_and_no_issues() {
        let fc = json!({ "type": "FeatureCollection", "features": [
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [-121.8, 37.6] } },
            { "type": "Feature", "geometry": { "type": "LineString",
              "coordinates": [[-121.9, 37.5], [-121.7, 37.7]] } }
        ]});

        let report = validate_feature_collection(&fc);
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
        assert_eq!(report.valid_feature_count, 2);
        assert_eq!(
            report.bbox,
            Some(BoundingBox { min_lng: -121.9, min_lat: 37.5, max_lng: -121.7, max_lat: 37.7 })
        );
    }

    #[test]
    fn bad_features_are_reported_individually() {
        let fc = json!({ "features": [
            { "type": "Feature", "geometry": null },
            { "type": "Feature", "geometry": { "type": "Polygon", "coordinates": [] } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [200.0, 10.0] } },
            { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[1.0, 2.0]] } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": ["a", 1.0] } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [10.0, 20.0] } }
        ]});

        let report = validate_feature_collection(&fc);
        assert_eq!(report.feature_count, 6);
        assert_eq!(report.valid_feature_count, 1);
        let indices: Vec<_> = report.errors.iter().map(|e| e.feature_index).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(report.bbox, Some(BoundingBox::from_point([10.0, 20.0])));
    }

    #[test]
    fn suspicious_coordinates_are_warnings() {
        let fc = json!({ "features": [
            { "geometry": { "type": "Point", "coordinates": [37.6789, -121.8453] } },
            { "geometry": { "type": "Point", "coordinates": [0.0, 0.0] } },
            { "geometry": { "type": "LineString", "coordinates": [[-80.0, 25.0], [-80.0, 25.0]] } }
        ]});

        let report = validate_feature_collection(&fc);
        // [37.6789, -121.8453] has |lat| > 90 and is an error, not a warning
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].message.contains("(0, 0)"));
        assert_eq!(report.warnings[1].message, "zero-length line");
    }

    #[test]
    fn non_collections_are_rejected() {
        let report = validate_feature_collection(&json!([1, 2, 3]));
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].feature_index, None);
    }
}
