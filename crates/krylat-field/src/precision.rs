//! Storage precision tags and rounding.
//!
//! Fields always hold `Complex64` values, but each field carries a precision
//! tag and every write into it is rounded to that precision. This is how the
//! reduced-precision ("sloppy") operator variants behave on the CPU.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex64 as C64;
use serde::{Deserialize, Serialize};

/// Storage precision of a field or operator.
///
/// Ordered from coarsest to finest, so `a.min(b)` is the coarser of the two.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 16-bit style storage: f32 exponent range, 10-bit mantissa.
    Half,
    /// IEEE single precision.
    Single,
    /// IEEE double precision.
    #[default]
    Double,
}

/// Mantissa bits dropped from an f32 when rounding to half precision.
const HALF_DROPPED_BITS: u32 = 13;

impl Precision {
    /// Round a real value to this precision.
    #[inline]
    pub fn round(self, v: f64) -> f64 {
        match self {
            Precision::Double => v,
            Precision::Single => v as f32 as f64,
            Precision::Half => {
                let f = v as f32;
                if !f.is_finite() {
                    return f as f64;
                }
                // round to nearest on the dropped mantissa bits
                let half_ulp = 1u32 << (HALF_DROPPED_BITS - 1);
                let mask = !((1u32 << HALF_DROPPED_BITS) - 1);
                f32::from_bits((f.to_bits() + half_ulp) & mask) as f64
            }
        }
    }

    /// Round both components of a complex value.
    #[inline]
    pub fn round_c(self, z: C64) -> C64 {
        match self {
            Precision::Double => z,
            _ => C64::new(self.round(z.re), self.round(z.im)),
        }
    }

    /// Unit roundoff of this precision.
    pub fn epsilon(self) -> f64 {
        match self {
            Precision::Double => f64::EPSILON,
            Precision::Single => f32::EPSILON as f64,
            Precision::Half => 2f64.powi(-10),
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Precision::Half => "half",
            Precision::Single => "single",
            Precision::Double => "double",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "half" | "f16" => Ok(Precision::Half),
            "single" | "f32" => Ok(Precision::Single),
            "double" | "f64" => Ok(Precision::Double),
            other => Err(format!("unknown precision '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_is_exact() {
        let v = 1.0 / 3.0;
        assert_eq!(Precision::Double.round(v), v);
    }

    #[test]
    fn single_matches_f32_cast() {
        let v = 1.0 / 3.0;
        assert_eq!(Precision::Single.round(v), (v as f32) as f64);
        assert!((Precision::Single.round(v) - v).abs() < 1e-7);
    }

    #[test]
    fn half_keeps_ten_mantissa_bits() {
        let v = 1.0 / 3.0;
        let h = Precision::Half.round(v);
        assert!((h - v).abs() <= v * 2f64.powi(-11));
        assert!((h - v).abs() > 1e-7);
        // exactly representable values survive
        assert_eq!(Precision::Half.round(0.75), 0.75);
        assert_eq!(Precision::Half.round(-3.0), -3.0);
    }

    #[test]
    fn ordering_is_coarse_to_fine() {
        assert!(Precision::Half < Precision::Single);
        assert!(Precision::Single < Precision::Double);
        assert_eq!(Precision::Double.min(Precision::Single), Precision::Single);
    }

    #[test]
    fn parse_names() {
        assert_eq!("Double".parse::<Precision>(), Ok(Precision::Double));
        assert_eq!("f32".parse::<Precision>(), Ok(Precision::Single));
        assert!("quad".parse::<Precision>().is_err());
    }
}
