//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rational number, used both for frame rates (e.g. 30000/1001) and for
/// stream timebases (e.g. 1/25, 1/44100).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_25: Self = Self { num: 25, den: 1 };
    pub const FPS_30: Self = Self { num: 30, den: 1 };
    pub const FPS_29_97: Self = Self {
        num: 30000,
        den: 1001,
    };
    pub const FPS_60: Self = Self { num: 60, den: 1 };

    /// Millisecond timebase (1/1000), the unit of caller-supplied timestamps.
    pub const MILLIS: Self = Self { num: 1, den: 1000 };

    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "Rational denominator must be > 0");
        Self { num, den }
    }

    /// Timebase of `1/den` (one tick per sample / per frame).
    pub fn timebase(den: u32) -> Self {
        Self::new(1, den)
    }

    /// Frame rate expressed as a timebase: 25 fps -> 1/25.
    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    /// Rescale `value` expressed in `from` units into `to` units.
    ///
    /// Computes `value * from / to` with a 128-bit intermediate and rounds
    /// half away from zero. The result saturates at the `i64` range.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let num = value as i128 * from.num as i128 * to.den as i128;
        let den = from.den as i128 * to.num as i128;
        if den == 0 {
            return 0;
        }
        let half = den / 2;
        let q = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        q.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Video/image resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 320x240, the capture default.
    pub const QVGA: Self = Self {
        width: 320,
        height: 240,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions non-zero.
    pub fn is_positive(self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Both dimensions are multiples of two (required for 4:2:0 chroma).
    pub fn is_even(self) -> bool {
        self.width.is_multiple_of(2) && self.height.is_multiple_of(2)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
