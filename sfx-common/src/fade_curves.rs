//! Fade curve implementations for source volume ramps
//!
//! Fade-in and fade-out effects on a sound source sample one of these
//! curves once per update tick and multiply the result into the source's
//! effective volume.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::str::FromStr;

/// Fade curve types
///
/// Each curve type provides a different perceptual quality:
/// - Linear: Constant rate of change (precise, predictable)
/// - Exponential: Slow start, fast finish (natural-sounding fade-in)
/// - Logarithmic: Fast start, slow finish (natural-sounding fade-out)
/// - SCurve: Smooth acceleration and deceleration
/// - EqualPower: Constant perceived loudness
///
/// Fade-in curves increase volume from 0.0 to 1.0, fade-out curves
/// decrease it from 1.0 to 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    Linear,

    /// Exponential: v(t) = t²
    Exponential,

    /// Logarithmic: v(t) = (1-t)² (for fade-out)
    Logarithmic,

    /// S-Curve: v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// Equal-Power: v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier (0.0 = silence, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            // Inverse of the quadratic fade-out
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Calculate fade-out multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier (1.0 at start, 0.0 at end)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Canonical config-file spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// Get all available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl FromStr for FadeCurve {
    type Err = String;

    /// Accepts the canonical spelling plus `cosine`, `scurve`, `s-curve`
    /// and `equalpower` aliases, case-insensitively
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            other => Err(format!("unknown fade curve '{}'", other)),
        }
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::Linear
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_bounds() {
        for curve in FadeCurve::all_variants() {
            let start_val = curve.calculate_fade_in(0.0);
            let end_val = curve.calculate_fade_in(1.0);
            assert!(
                start_val.abs() < 0.01,
                "{:?} fade-in at 0.0 should be ~0.0, got {}",
                curve,
                start_val
            );
            assert!(
                (end_val - 1.0).abs() < 0.01,
                "{:?} fade-in at 1.0 should be ~1.0, got {}",
                curve,
                end_val
            );
        }
    }

    #[test]
    fn test_fade_out_bounds() {
        for curve in FadeCurve::all_variants() {
            let start_val = curve.calculate_fade_out(0.0);
            let end_val = curve.calculate_fade_out(1.0);
            assert!((start_val - 1.0).abs() < 0.01, "{:?} start {}", curve, start_val);
            assert!(end_val.abs() < 0.01, "{:?} end {}", curve, end_val);
        }
    }

    #[test]
    fn test_position_is_clamped() {
        assert_eq!(FadeCurve::Linear.calculate_fade_in(-3.0), 0.0);
        assert_eq!(FadeCurve::Linear.calculate_fade_in(7.0), 1.0);
        assert_eq!(FadeCurve::Linear.calculate_fade_out(2.0), 0.0);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("cosine".parse::<FadeCurve>(), Ok(FadeCurve::SCurve));
        assert_eq!("S-Curve".parse::<FadeCurve>(), Ok(FadeCurve::SCurve));
        assert_eq!("equalpower".parse::<FadeCurve>(), Ok(FadeCurve::EqualPower));
        assert_eq!("EXPONENTIAL".parse::<FadeCurve>(), Ok(FadeCurve::Exponential));
        assert!("bogus".parse::<FadeCurve>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.to_string().parse::<FadeCurve>(), Ok(*curve));
        }
    }
}
