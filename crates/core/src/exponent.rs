//! Reward curve exponent.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ChopsError, Result};

/// Upper bound on the curve exponent. At 16 the top rank of a large field
/// already takes nearly the whole emission.
pub const MAX_CURVE_EXPONENT_MICROS: u64 = 16 * CurveExponent::SCALE;

/// Exponent of the rank-weighted reward curve, stored as integer millionths.
///
/// The decimal input is rounded once at parse time; everything downstream
/// works on the integer representation so generation and verification
/// paths produce identical weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurveExponent {
    micros: u64,
}

impl CurveExponent {
    pub const SCALE: u64 = 1_000_000;

    /// Linear curve (exponent 1).
    pub const LINEAR: Self = Self { micros: Self::SCALE };

    pub fn from_micros(micros: u64) -> Result<Self> {
        if micros == 0 {
            return Err(ChopsError::Validation(
                "curve exponent must be positive".to_string(),
            ));
        }
        if micros > MAX_CURVE_EXPONENT_MICROS {
            return Err(ChopsError::Validation(format!(
                "curve exponent {} exceeds maximum {}",
                micros as f64 / Self::SCALE as f64,
                MAX_CURVE_EXPONENT_MICROS / Self::SCALE,
            )));
        }
        Ok(Self { micros })
    }

    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ChopsError::Validation(format!(
                "curve exponent must be a positive finite number, got {}",
                value
            )));
        }
        let scaled = (value * Self::SCALE as f64).round();
        if scaled > MAX_CURVE_EXPONENT_MICROS as f64 {
            return Err(ChopsError::Validation(format!(
                "curve exponent {} exceeds maximum {}",
                value,
                MAX_CURVE_EXPONENT_MICROS / Self::SCALE,
            )));
        }
        Self::from_micros(scaled as u64)
    }

    pub fn micros(&self) -> u64 {
        self.micros
    }

    /// Whole part of the exponent.
    pub fn integer_part(&self) -> u32 {
        (self.micros / Self::SCALE) as u32
    }

    /// Fractional part in millionths (0..SCALE).
    pub fn fractional_micros(&self) -> u64 {
        self.micros % Self::SCALE
    }

    pub fn is_integral(&self) -> bool {
        self.fractional_micros() == 0
    }

    pub fn as_f64(&self) -> f64 {
        self.micros as f64 / Self::SCALE as f64
    }
}

impl Default for CurveExponent {
    fn default() -> Self {
        Self { micros: 1_500_000 }
    }
}

impl fmt::Display for CurveExponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frac = self.fractional_micros();
        if frac == 0 {
            return write!(f, "{}", self.integer_part());
        }
        let digits = format!("{:06}", frac);
        write!(f, "{}.{}", self.integer_part(), digits.trim_end_matches('0'))
    }
}

impl Serialize for CurveExponent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for CurveExponent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Self::from_f64(value).map_err(serde::de::Error::custom)
    }
}
