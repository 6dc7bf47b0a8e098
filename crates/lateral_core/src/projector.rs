//! Places a lateral from a distance and clock reading on an asset.
//!
//! Point assets (manholes, cleanouts) have no direction of travel, so the
//! clock reading is used as a compass bearing. Line assets have a direction
//! of travel, so the clock reading only picks a side and the lateral is
//! offset perpendicular to the local tangent.

use crate::clock::{clock_to_bearing, clock_to_side};
use crate::error::ProjectionError;
use crate::geodesy::{self, LngLat};
use crate::model::AssetGeometry;

pub const DEFAULT_STUB_LENGTH_M: f64 = 3.048;
pub const DEFAULT_LATERAL_OFFSET_M: f64 = 2.0;
pub const DEFAULT_TANGENT_SAMPLE_M: f64 = 1.0;

/// The visible connection: a short segment leaving the mainline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StubGeometry {
    pub connection_point: LngLat,
    pub stub_line: [LngLat; 2],
}

#[derive(Debug, Clone, Copy)]
pub struct Projector {
    /// Perpendicular offset of the lateral point from a line asset.
    pub lateral_offset_m: f64,
    /// Half-width of the window used to estimate the line tangent.
    pub tangent_sample_m: f64,
}

impl Default for Projector {
    fn default() -> Self {
        Self {
            lateral_offset_m: DEFAULT_LATERAL_OFFSET_M,
            tangent_sample_m: DEFAULT_TANGENT_SAMPLE_M,
        }
    }
}

/// A measured position on a line asset.
struct LinePosition {
    on_line: LngLat,
    tangent_deg: f64,
}

impl Projector {
    /// Lateral point for `distance_m` along the asset at `clock`.
    ///
    /// On lines, a reading at the crown or invert (or no reading) leaves
    /// the point on the line.
    pub fn project(
        &self,
        geometry: &AssetGeometry,
        distance_m: f64,
        clock: Option<f64>,
    ) -> Result<LngLat, ProjectionError> {
        let distance_m = checked_distance(distance_m)?;

        match geometry {
            AssetGeometry::Point(origin) => {
                Ok(geodesy::destination(*origin, distance_m, point_bearing(clock)))
            }
            AssetGeometry::LineString(_) | AssetGeometry::MultiLineString(_) => {
                let pos = self.locate_on_line(geometry, distance_m)?;
                let side = clock_to_side(clock);
                if side.is_ambiguous() {
                    return Ok(pos.on_line);
                }
                let bearing = pos.tangent_deg + 90.0 * f64::from(side.sign);
                Ok(geodesy::destination(pos.on_line, self.lateral_offset_m, bearing))
            }
            AssetGeometry::Unsupported(kind) => {
                Err(ProjectionError::UnsupportedGeometry(kind.clone()))
            }
        }
    }

    /// Connection point on the asset and a stub of `stub_length_m` leaving it.
    ///
    /// Unlike `project`, an ambiguous side on a line defaults to the right:
    /// a stub always has to leave the mainline.
    pub fn stub(
        &self,
        geometry: &AssetGeometry,
        distance_m: f64,
        clock: Option<f64>,
        stub_length_m: f64,
    ) -> Result<StubGeometry, ProjectionError> {
        let distance_m = checked_distance(distance_m)?;

        match geometry {
            AssetGeometry::Point(origin) => {
                let end = geodesy::destination(*origin, stub_length_m, point_bearing(clock));
                Ok(StubGeometry {
                    connection_point: *origin,
                    stub_line: [*origin, end],
                })
            }
            AssetGeometry::LineString(_) | AssetGeometry::MultiLineString(_) => {
                let pos = self.locate_on_line(geometry, distance_m)?;
                let side = clock_to_side(clock);
                let sign = if side.is_ambiguous() { 1.0 } else { f64::from(side.sign) };
                let end = geodesy::destination(pos.on_line, stub_length_m, pos.tangent_deg + 90.0 * sign);
                Ok(StubGeometry {
                    connection_point: pos.on_line,
                    stub_line: [pos.on_line, end],
                })
            }
            AssetGeometry::Unsupported(kind) => {
                Err(ProjectionError::UnsupportedGeometry(kind.clone()))
            }
        }
    }

    fn locate_on_line(
        &self,
        geometry: &AssetGeometry,
        distance_m: f64,
    ) -> Result<LinePosition, ProjectionError> {
        let line = geometry
            .primary_line()
            .filter(|line| !line.is_empty())
            .ok_or(ProjectionError::EmptyGeometry)?;

        let total = geodesy::line_length_m(line);
        let d = distance_m.min(total);

        let on_line = geodesy::point_along(line, d).ok_or(ProjectionError::EmptyGeometry)?;
        let before = geodesy::point_along(line, (d - self.tangent_sample_m).max(0.0))
            .ok_or(ProjectionError::EmptyGeometry)?;
        let after = geodesy::point_along(line, (d + self.tangent_sample_m).min(total))
            .ok_or(ProjectionError::EmptyGeometry)?;

        // degenerate (single vertex or zero length) lines have no tangent
        let tangent_deg = if before == after {
            0.0
        } else {
            geodesy::initial_bearing_deg(before, after)
        };

        Ok(LinePosition { on_line, tangent_deg })
    }
}

fn checked_distance(distance_m: f64) -> Result<f64, ProjectionError> {
    if !distance_m.is_finite() {
        return Err(ProjectionError::InvalidDistance(distance_m));
    }
    Ok(distance_m.max(0.0))
}

fn point_bearing(clock: Option<f64>) -> f64 {
    clock.filter(|c| c.is_finite()).map(clock_to_bearing).unwrap_or(0.0)
}
