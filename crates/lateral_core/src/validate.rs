//! Coordinate order repair.
//!
//! Exports disagree on whether pairs are `[lng, lat]` or `[lat, lng]`. The
//! validator guesses the order from magnitudes and signs, then clamps or
//! wraps whatever is still out of range. It favours returning a best guess
//! and only gives up on non-numeric input.
//!
//! The magnitude rules assume a service area away from the equator and the
//! prime meridian (north-american data, where |lng| > |lat| almost always
//! holds). The thresholds are therefore configurable.

use serde::{Deserialize, Serialize};

use crate::geodesy::LngLat;

/// Tunables for the "smaller magnitude is latitude" rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwapThresholds {
    /// Swap when the first value is below this and the second above it.
    pub split_deg: f64,
    /// Swap when `|first| < ratio * |second|`.
    pub ratio: f64,
    /// Swap when the first value is below this magnitude.
    pub small_first_deg: f64,
}

impl Default for SwapThresholds {
    fn default() -> Self {
        Self {
            split_deg: 60.0,
            ratio: 0.8,
            small_first_deg: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateValidator {
    pub thresholds: SwapThresholds,
}

impl CoordinateValidator {
    pub fn new(thresholds: SwapThresholds) -> Self {
        Self { thresholds }
    }

    /// Returns a valid `[lng, lat]` or `None` when nothing usable remains.
    pub fn validate(&self, raw: &[f64]) -> Option<LngLat> {
        let (a, b) = match raw {
            [a, b, ..] => (*a, *b),
            _ => return None,
        };
        if !a.is_finite() || !b.is_finite() {
            return None;
        }

        let (mut lng, mut lat) = if self.should_swap(a, b) { (b, a) } else { (a, b) };

        if !(-90.0..=90.0).contains(&lat) {
            if (-90.0..=90.0).contains(&lng) {
                std::mem::swap(&mut lng, &mut lat);
            } else {
                lat = lat.clamp(-90.0, 90.0);
            }
        }

        if !(-180.0..=180.0).contains(&lng) {
            lng = (lng + 180.0).rem_euclid(360.0) - 180.0;
        }

        if lat.is_nan() || !(-90.0..=90.0).contains(&lat) || lng.is_nan() {
            return None;
        }

        Some([lng, lat])
    }

    /// Whether `validate` would read `[a, b]` as `[lat, lng]`.
    pub fn should_swap(&self, a: f64, b: f64) -> bool {
        let (abs_a, abs_b) = (a.abs(), b.abs());

        // impossible as given
        if abs_b > 90.0 || abs_a > 180.0 {
            return true;
        }

        if abs_a > 90.0 {
            return false;
        }

        let t = &self.thresholds;
        abs_a < abs_b
            && ((a > 0.0 && b < 0.0)
                || (abs_a < t.split_deg && abs_b > t.split_deg)
                || abs_a < t.ratio * abs_b
                || abs_a < t.small_first_deg)
    }
}

/// Validates with the default thresholds.
pub fn validate_coordinate(raw: &[f64]) -> Option<LngLat> {
    CoordinateValidator::default().validate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lat_lng_from_us_export_is_swapped() {
        assert_eq!(
            validate_coordinate(&[37.6789, -121.8453]),
            Some([-121.8453, 37.6789])
        );
    }

    #[test]
    fn lng_lat_is_left_alone() {
        assert_eq!(
            validate_coordinate(&[-121.8453, 37.6789]),
            Some([-121.8453, 37.6789])
        );
        assert_eq!(validate_coordinate(&[-80.19, 25.76]), Some([-80.19, 25.76]));
    }

    #[test]
    fn positive_lat_negative_lng_with_small_magnitudes_is_swapped() {
        assert_eq!(validate_coordinate(&[25.76, -80.19]), Some([-80.19, 25.76]));
    }

    #[test]
    fn out_of_range_longitude_is_wrapped() {
        let [lng, lat] = validate_coordinate(&[200.0, 45.0]).unwrap();
        assert!((-180.0..=180.0).contains(&lng));
        assert_eq!(lat, 45.0);
        assert!((lng - -160.0).abs() < 1e-9);
    }

    #[test]
    fn latitude_never_escapes_range() {
        let [_, lat] = validate_coordinate(&[91.0, 45.0]).unwrap();
        assert!(lat.abs() <= 90.0);

        let [_, lat] = validate_coordinate(&[120.0, 95.0]).unwrap();
        assert!(lat.abs() <= 90.0);

        let [lng, lat] = validate_coordinate(&[500.0, 300.0]).unwrap();
        assert!(lat.abs() <= 90.0);
        assert!(lng.abs() <= 180.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(validate_coordinate(&[]), None);
        assert_eq!(validate_coordinate(&[1.0]), None);
        assert_eq!(validate_coordinate(&[f64::NAN, 10.0]), None);
        assert_eq!(validate_coordinate(&[10.0, f64::INFINITY]), None);
    }

    #[test]
    fn thresholds_are_configurable() {
        let strict = CoordinateValidator::new(SwapThresholds {
            split_deg: 0.0,
            ratio: 0.0,
            small_first_deg: 0.0,
        });
        // only the sign rule remains
        assert_eq!(strict.validate(&[10.0, 20.0]), Some([10.0, 20.0]));
        assert_eq!(strict.validate(&[10.0, -20.0]), Some([-20.0, 10.0]));
    }
}
