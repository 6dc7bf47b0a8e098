//! Clock-face readings to directions.
//!
//! Inspection crews record where a lateral enters the mainline as a clock
//! position looking downstream: 12 is the crown, 3 the right wall, 6 the
//! invert, 9 the left wall.

use serde::Serialize;

use crate::geodesy::normalize_bearing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
    None,
}

/// Horizontal sense of a clock reading: `+1` right, `-1` left, `0` undecided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SideReading {
    pub sign: i8,
    pub confidence: Confidence,
}

impl SideReading {
    pub const fn new(sign: i8, confidence: Confidence) -> Self {
        Self { sign, confidence }
    }

    #[inline]
    pub fn is_ambiguous(&self) -> bool {
        self.sign == 0
    }
}

/// Compass bearing for a clock reading, `(clock mod 12) * 30` in `[0, 360)`.
#[inline]
pub fn clock_to_bearing(clock: f64) -> f64 {
    normalize_bearing(clock.rem_euclid(12.0) * 30.0)
}

/// Which side of the pipe a clock reading points to.
///
/// A line has no radial direction, so only the left/right sense survives.
pub fn clock_to_side(clock: Option<f64>) -> SideReading {
    let Some(c) = clock.filter(|c| c.is_finite()) else {
        return SideReading::new(0, Confidence::None);
    };

    let c = c.rem_euclid(12.0);

    if c == 3.0 {
        SideReading::new(1, Confidence::High)
    } else if c == 9.0 {
        SideReading::new(-1, Confidence::High)
    } else if c > 0.0 && c < 6.0 {
        SideReading::new(1, Confidence::Low)
    } else if c > 6.0 && c < 12.0 {
        SideReading::new(-1, Confidence::Low)
    } else {
        // crown or invert
        SideReading::new(0, Confidence::Low)
    }
}
