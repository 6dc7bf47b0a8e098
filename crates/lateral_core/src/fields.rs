//! Field alias resolution for loosely typed export rows.
//!
//! Each logical field lists the column names seen in the wild, in priority
//! order. Rows are resolved once at parse time; nothing downstream looks at
//! raw property bags again.

use serde_json::{Map, Value};

/// A logical field and the column names it may appear under.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

macro_rules! field {
    ($ident:ident, $name:literal, [$($alias:literal),+ $(,)?]) => {
        pub const $ident: Field = Field { name: $name, aliases: &[$($alias),+] };
    };
}

// ---------- assets ----------
field!(ASSET_FID, "FID", ["FID", "fid", "Fid"]);
field!(ASSET_ID, "assetId", ["id", "assetId", "AssetId", "AssetID", "asset_id", "ID"]);

// ---------- inspections ----------
field!(INSPECTION_ID, "inspectionId", [
    "inspectionId", "InspectionID", "InspectionId", "inspection_id", "INSPECTIONID", "InspID",
]);
field!(PIPE_SEGMENT_REF, "pipeSegmentReference", [
    "pipeSegmentReference", "PipeSegmentReference", "pipe_segment_reference",
    "PipeSegmentRef", "pipeSegmentRef", "PSR", "PipeSegment",
]);
field!(INSPECTION_ASSET_ID, "assetId", ["assetId", "AssetId", "AssetID", "asset_id"]);
field!(TAP_DISTANCE, "tapDistance", [
    "tapDistance", "TapDistance", "tap_distance", "LateralDistance", "lateralDistance",
]);
field!(CLOCK_POSITION, "clockPosition", [
    "clockPosition", "ClockPosition", "clock_position", "Clock", "clock", "ClockAt", "ClockFrom",
]);
field!(IMPERIAL, "isImperial", [
    "isImperial", "IsImperial", "is_imperial", "imperial", "Imperial", "useImperial", "UseImperial",
    "imperialUnits", "ImperialUnits",
]);
field!(DIRECTION, "direction", ["direction", "Direction", "InspectionDirection", "inspection_direction"]);
field!(LENGTH_SURVEYED, "lengthSurveyed", [
    "lengthSurveyed", "LengthSurveyed", "length_surveyed", "SurveyedLength", "surveyedLength",
]);
field!(UPSTREAM_MH, "upstreamManhole", [
    "upstreamManhole", "UpstreamMH", "UpstreamManhole", "upstream_mh", "StartMH", "startManhole",
]);
field!(DOWNSTREAM_MH, "downstreamManhole", [
    "downstreamManhole", "DownstreamMH", "DownstreamManhole", "downstream_mh", "EndMH", "endManhole",
]);
field!(INSPECTION_DATE, "inspectionDate", ["inspectionDate", "InspectionDate", "inspection_date", "Date"]);

// ---------- defects ----------
field!(DEFECT_ID, "defectId", ["defectId", "DefectID", "DefectId", "defect_id", "ObservationID", "id"]);
field!(DEFECT_CODE, "defectCode", ["defectCode", "DefectCode", "defect_code", "Code", "code", "PACP_Code"]);
field!(DEFECT_DESCRIPTION, "description", ["description", "Description", "Remarks", "Observation"]);
field!(DEFECT_GRADE, "grade", ["grade", "Grade", "Severity", "severity"]);
field!(DEFECT_DISTANCE, "distance", ["distance", "Distance", "defectDistance", "DefectDistance", "Footage"]);

fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != ' ')
        .flat_map(char::to_lowercase)
        .collect()
}

fn present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// First present value for `field`.
///
/// Exact alias names are tried in order first; only if none matches is the
/// row scanned again ignoring case, underscores and spaces.
pub fn lookup<'a>(row: &'a Map<String, Value>, field: &Field) -> Option<&'a Value> {
    if let Some(v) = field
        .aliases
        .iter()
        .filter_map(|alias| row.get(*alias))
        .find(|v| present(v))
    {
        return Some(v);
    }

    let folded: Vec<String> = field.aliases.iter().map(|a| fold(a)).collect();
    row.iter()
        .filter(|(k, v)| present(v) && folded.contains(&fold(k)))
        .map(|(_, v)| v)
        .next()
}

/// Renders a scalar as an identity string; integral floats lose their `.0`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers or numeric strings. Non-finite values count as absent.
pub fn scalar_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// `1`, `true`, `"1"`, `"true"`, `"yes"`, `"y"` are truthy; everything else is not.
pub fn scalar_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        _ => false,
    }
}

pub fn text(row: &Map<String, Value>, field: &Field) -> Option<String> {
    lookup(row, field).and_then(scalar_text)
}

pub fn number(row: &Map<String, Value>, field: &Field) -> Option<f64> {
    lookup(row, field).and_then(scalar_number)
}

pub fn flag(row: &Map<String, Value>, field: &Field) -> bool {
    lookup(row, field).map(scalar_flag).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn aliases_resolve_in_priority_order() {
        let r = row(json!({ "PSR": "B-2", "PipeSegmentReference": "A-1" }));
        assert_eq!(text(&r, &PIPE_SEGMENT_REF).as_deref(), Some("A-1"));
    }

    #[test]
    fn blank_values_fall_through_to_next_alias() {
        let r = row(json!({ "FID": "  ", "fid": 12 }));
        assert_eq!(text(&r, &ASSET_FID).as_deref(), Some("12"));
    }

    #[test]
    fn unlisted_spellings_match_loosely() {
        let r = row(json!({ "TAP_DISTANCE": "12.5", "clock position": 3 }));
        assert_eq!(number(&r, &TAP_DISTANCE), Some(12.5));
        assert_eq!(number(&r, &CLOCK_POSITION), Some(3.0));
    }

    #[test]
    fn integral_floats_render_as_integers() {
        assert_eq!(scalar_text(&json!(7.0)).as_deref(), Some("7"));
        assert_eq!(scalar_text(&json!(7.25)).as_deref(), Some("7.25"));
        assert_eq!(scalar_text(&json!(" 007 ")).as_deref(), Some("007"));
    }

    #[test]
    fn imperial_flags() {
        for truthy in [json!(1), json!(true), json!("1"), json!("TRUE"), json!("yes")] {
            let r = row(json!({ "IsImperial": truthy }));
            assert!(flag(&r, &IMPERIAL));
        }
        for falsy in [json!(0), json!(false), json!("no"), json!(null)] {
            let r = row(json!({ "useImperial": falsy }));
            assert!(!flag(&r, &IMPERIAL));
        }
        assert!(!flag(&Map::new(), &IMPERIAL));
    }
}
