//! lateral_core: derives geocoded lateral connection features from a pipe network.
//!
//! Inputs are a pipe-asset collection (GeoJSON Point / LineString /
//! MultiLineString features with FID-keyed properties) plus tabular
//! inspection and defect rows exported from inspection software.
//!
//! Pipeline:
//!   assets + inspections + defects
//!     -> matcher    (tolerant identity joins)
//!     -> projector  (distance + clock position -> point and stub)
//!     -> validate   (lat/lng order repair, clamping)
//!     -> geocode    (best-effort reverse geocoding, cached)
//!     -> assemble   (LateralInspection / TapInspection records + stats)
//!
//! Coordinates are always `[lng, lat]` in WGS-84 degrees once they leave
//! the validator. Distances are metres unless a field says otherwise.

pub mod assemble;
pub mod clock;
pub mod error;
pub mod fields;
pub mod geocode;
pub mod geodesy;
pub mod geojson;
pub mod matcher;
pub mod model;
pub mod projector;
pub mod report;
pub mod stats;
pub mod validate;

pub use crate::assemble::{promote_taps, Assembler, AssemblerConfig, Assembly, InputBatch};
pub use crate::clock::{clock_to_bearing, clock_to_side, Confidence, SideReading};
pub use crate::error::{GeocodeError, InputError, ProjectionError, SkipReason};
pub use crate::geocode::{CachingGeocoder, DisabledGeocoder, GeocodeResult, ReverseGeocoder};
pub use crate::geodesy::LngLat;
pub use crate::model::{
    Asset, AssetGeometry, DefectRecord, InspectionRecord, LateralInspection, TapInspection,
};
pub use crate::projector::{Projector, StubGeometry};
pub use crate::report::{validate_feature_collection, ExportValidationReport};
pub use crate::stats::ProcessingStats;
pub use crate::validate::{CoordinateValidator, SwapThresholds};
