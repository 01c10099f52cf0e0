//! Fade curve shapes for volume envelopes
//!
//! A fade moves output volume from a start level to an end level over a
//! fixed duration. The curve decides how the travel is distributed over time:
//!
//! - **Linear**: constant rate of change
//! - **Exponential**: slow start, fast finish (natural for rising fades)
//! - **Logarithmic**: fast start, slow finish (natural for falling fades)
//! - **SCurve**: smooth acceleration and deceleration
//! - **EqualPower**: constant perceived loudness
//!
//! Every curve maps progress 0.0 to exactly the start level and progress 1.0
//! to exactly the end level, so a completed fade always lands on its target.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Fade curve types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = t² when rising, 1 - (1-t)² mirrored when falling
    Exponential,

    /// v(t) = √t when rising, (1-t)² remaining level when falling
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at normalized position (0.0 to 1.0)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Calculate fade-out multiplier at normalized position (0.0 to 1.0)
    ///
    /// Returns 1.0 at the start of the fade and 0.0 at the end.
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Volume level at `progress` of a ramp from `start` to `end`
    ///
    /// Rising ramps use the fade-in shape, falling ramps the fade-out shape.
    /// The result is clamped to `[0.0, 1.0]`.
    pub fn interpolate(&self, start: f32, end: f32, progress: f32) -> f32 {
        let t = progress.clamp(0.0, 1.0);
        if t >= 1.0 {
            return end.clamp(0.0, 1.0);
        }
        let travelled = if end >= start {
            self.calculate_fade_in(t)
        } else {
            1.0 - self.calculate_fade_out(t)
        };
        (start + (end - start) * travelled).clamp(0.0, 1.0)
    }

    /// Parse curve from its settings-table representation
    ///
    /// Accepts `linear`, `exponential`, `logarithmic`, `cosine`/`s_curve`/`scurve`
    /// and `equal_power`/`equalpower`, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "exponential" => Some(FadeCurve::Exponential),
            "logarithmic" => Some(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }

    /// Canonical settings-table value
    pub fn to_db_string(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "cosine",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// All available curves
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

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
