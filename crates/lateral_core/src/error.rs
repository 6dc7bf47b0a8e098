use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Structurally invalid input. The only failure that aborts a batch.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{collection}: expected {expected}")]
    Shape {
        collection: &'static str,
        expected: &'static str,
    },

    #[error("{collection}[{index}]: expected a JSON object")]
    Row {
        collection: &'static str,
        index: usize,
    },
}

/// Why a geometry could not be projected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectionError {
    #[error("unsupported geometry type '{0}'")]
    UnsupportedGeometry(String),

    #[error("asset geometry has no coordinates")]
    EmptyGeometry,

    #[error("distance must be finite, got {0}")]
    InvalidDistance(f64),
}

#[derive(Debug, Clone, Error)]
pub enum GeocodeError {
    #[error("no address found")]
    NotFound,

    #[error("geocoder unavailable: {0}")]
    Unavailable(String),

    #[error("geocoder timed out after {0:?}")]
    TimedOut(Duration),
}

/// Per-record reason for leaving a candidate out of the output.
///
/// Serializes as its [`SkipReason::as_str`] label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    MissingTapDistance,
    MissingClockPosition,
    UnresolvableJoin,
    UnsupportedGeometry,
    EmptyGeometry,
    InvalidDistance,
    InvalidCoordinate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingTapDistance => "missing_tap_distance",
            SkipReason::MissingClockPosition => "missing_clock_position",
            SkipReason::UnresolvableJoin => "unresolvable_join",
            SkipReason::UnsupportedGeometry => "unsupported_geometry",
            SkipReason::EmptyGeometry => "empty_geometry",
            SkipReason::InvalidDistance => "invalid_distance",
            SkipReason::InvalidCoordinate => "invalid_coordinate",
        }
    }
}

impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ProjectionError> for SkipReason {
    fn from(err: &ProjectionError) -> Self {
        match err {
            ProjectionError::UnsupportedGeometry(_) => SkipReason::UnsupportedGeometry,
            ProjectionError::EmptyGeometry => SkipReason::EmptyGeometry,
            ProjectionError::InvalidDistance(_) => SkipReason::InvalidDistance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reasons_serialize_as_their_label() {
        let reason = SkipReason::UnresolvableJoin;
        assert_eq!(serde_json::to_value(&reason).unwrap(), "unresolvable_join");
        assert_eq!(reason.to_string(), "unresolvable_join");
    }

    #[test]
    fn projection_errors_map_to_skip_reasons() {
        let err = ProjectionError::UnsupportedGeometry("Polygon".into());
        assert_eq!(SkipReason::from(&err), SkipReason::UnsupportedGeometry);
        assert_eq!(
            SkipReason::from(&ProjectionError::InvalidDistance(f64::NAN)),
            SkipReason::InvalidDistance
        );
    }
}
