//! Spherical-earth helpers for short distances along pipes.
//!
//! Lateral offsets are a few metres and pipe segments rarely exceed a few
//! hundred, so a mean-radius sphere is accurate well below survey noise.

/// `[longitude, latitude]` in degrees.
pub type LngLat = [f64; 2];

/// Mean earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Feet to metres.
pub const FEET_TO_METERS: f64 = 0.3048;

/// Normalizes a bearing into `[0, 360)`.
#[inline]
pub fn normalize_bearing(deg: f64) -> f64 {
    let b = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// Great-circle distance between two points in metres.
#[inline]
pub fn haversine_m(from: LngLat, to: LngLat) -> f64 {
    let lat1 = from[1].to_radians();
    let lat2 = to[1].to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (to[0] - from[0]).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in `[0, 360)`.
#[inline]
pub fn initial_bearing_deg(from: LngLat, to: LngLat) -> f64 {
    let lat1 = from[1].to_radians();
    let lat2 = to[1].to_radians();
    let d_lon = (to[0] - from[0]).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` from `origin` on `bearing_deg`.
#[inline]
pub fn destination(origin: LngLat, distance_m: f64, bearing_deg: f64) -> LngLat {
    let lat1 = origin[1].to_radians();
    let lon1 = origin[0].to_radians();
    let brg = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let (sin_lat1, cos_lat1) = lat1.sin_cos();
    let (sin_delta, cos_delta) = delta.sin_cos();

    let lat2 = (sin_lat1 * cos_delta + cos_lat1 * sin_delta * brg.cos()).asin();
    let lon2 = lon1
        + (brg.sin() * sin_delta * cos_lat1).atan2(cos_delta - sin_lat1 * lat2.sin());

    [lon2.to_degrees(), lat2.to_degrees()]
}

/// Total length of a polyline in metres.
pub fn line_length_m(line: &[LngLat]) -> f64 {
    line.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Point `distance_m` along a polyline.
///
/// Distances below zero return the first vertex and distances past the end
/// return the last vertex; the line is never extrapolated. `None` only for
/// an empty line.
pub fn point_along(line: &[LngLat], distance_m: f64) -> Option<LngLat> {
    let first = *line.first()?;
    if distance_m <= 0.0 {
        return Some(first);
    }

    let mut travelled = 0.0;
    for w in line.windows(2) {
        let (start, end) = (w[0], w[1]);
        let seg = haversine_m(start, end);

        if travelled + seg >= distance_m {
            let overshoot = distance_m - travelled;
            if seg <= f64::EPSILON || overshoot <= 0.0 {
                return Some(start);
            }
            return Some(destination(start, overshoot, initial_bearing_deg(start, end)));
        }

        travelled += seg;
    }

    line.last().copied()
}
