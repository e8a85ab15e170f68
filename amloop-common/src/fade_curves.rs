//! Crossfade curve generation
//!
//! Produces the fixed-resolution fade tables used for every loop and switch
//! transition. A table is computed once when the engine is constructed and is
//! read-only afterwards.
//!
//! Every shape is generated as a fade-in `f(t)` rising from 0.0 to 1.0; the
//! fade-out is always its complement `1.0 - f(t)`, so the two gains applied
//! over the same window sum to exactly 1.0 at every step.

use serde::Deserialize;
use std::f32::consts::PI;
use std::sync::Arc;

/// Minimum number of points in a generated curve
pub const MIN_CURVE_STEPS: u32 = 2;

/// Default curve resolution (inaudible stepping at any practical crossfade length)
pub const DEFAULT_CURVE_STEPS: u32 = 256;

/// Shape of the fade-in half of a crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeShape {
    /// Smootherstep: y = 6t⁵ − 15t⁴ + 10t³
    ///
    /// Zero first and second derivative at both ends, so the gain change
    /// starts and finishes without a click.
    #[default]
    Smootherstep,

    /// Cosine S-curve: y = 0.5 × (1 − cos(π × t))
    #[serde(alias = "cosine")]
    SCurve,

    /// Linear: y = t
    Linear,
}

impl FadeShape {
    /// Fade-in multiplier at normalized position `t` (clamped to 0.0..=1.0)
    pub fn fade_in(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);

        match self {
            FadeShape::Smootherstep => t * t * t * (t * (t * 6.0 - 15.0) + 10.0),
            FadeShape::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeShape::Linear => t,
        }
    }

    /// Configuration string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeShape::Smootherstep => "smootherstep",
            FadeShape::SCurve => "cosine",
            FadeShape::Linear => "linear",
        }
    }
}

/// Pair of complementary gain tables for one crossfade
///
/// Invariant: `fade_in[i] + fade_out[i] == 1.0` for every index, `fade_in`
/// is non-decreasing from 0.0 to 1.0.
///
/// Tables are reference-counted so every transition shares them without
/// copying.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossfadeCurve {
    fade_in: Arc<[f32]>,
    fade_out: Arc<[f32]>,
}

impl CrossfadeCurve {
    /// Generate a smootherstep crossfade with `steps` points
    ///
    /// `steps < 2` yields the 2-point linear fallback `[0, 1]` / `[1, 0]`
    /// rather than an error; a missing curve would silence every transition.
    pub fn generate(steps: u32) -> Self {
        Self::generate_with(FadeShape::Smootherstep, steps)
    }

    /// Generate a crossfade of the given shape with `steps` points
    pub fn generate_with(shape: FadeShape, steps: u32) -> Self {
        if steps < MIN_CURVE_STEPS {
            return Self {
                fade_in: Arc::from(vec![0.0, 1.0]),
                fade_out: Arc::from(vec![1.0, 0.0]),
            };
        }

        let last = (steps - 1) as f32;
        let fade_in: Vec<f32> = (0..steps)
            .map(|i| shape.fade_in(i as f32 / last))
            .collect();
        let fade_out: Vec<f32> = fade_in.iter().map(|v| 1.0 - v).collect();

        Self {
            fade_in: fade_in.into(),
            fade_out: fade_out.into(),
        }
    }

    /// Fade-in gain table (0.0 → 1.0)
    pub fn fade_in(&self) -> &[f32] {
        &self.fade_in
    }

    /// Fade-out gain table (1.0 → 0.0)
    pub fn fade_out(&self) -> &[f32] {
        &self.fade_out
    }

    /// Shared handle on the fade-in table
    pub fn shared_fade_in(&self) -> Arc<[f32]> {
        Arc::clone(&self.fade_in)
    }

    /// Shared handle on the fade-out table
    pub fn shared_fade_out(&self) -> Arc<[f32]> {
        Arc::clone(&self.fade_out)
    }

    /// Number of points in each table
    pub fn len(&self) -> usize {
        self.fade_in.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fade_in.is_empty()
    }

    /// Interpolated fade-in gain at normalized position `t`
    pub fn sample_fade_in(&self, t: f32) -> f32 {
        sample_table(&self.fade_in, t)
    }

    /// Interpolated fade-out gain at normalized position `t`
    pub fn sample_fade_out(&self, t: f32) -> f32 {
        sample_table(&self.fade_out, t)
    }
}

impl Default for CrossfadeCurve {
    fn default() -> Self {
        Self::generate(DEFAULT_CURVE_STEPS)
    }
}

/// Linearly interpolate a gain table at normalized position `t`
///
/// Positions outside 0.0..=1.0 hold the first/last value.
pub fn sample_table(table: &[f32], t: f32) -> f32 {
    match table.len() {
        0 => 0.0,
        1 => table[0],
        len => {
            let pos = t.clamp(0.0, 1.0) * (len - 1) as f32;
            let idx = pos.floor() as usize;
            if idx >= len - 1 {
                return table[len - 1];
            }
            let frac = pos - idx as f32;
            table[idx] + (table[idx + 1] - table[idx]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complementary_tables() {
        let curve = CrossfadeCurve::generate(300);
        assert_eq!(curve.len(), 300);

        for (fade_in, fade_out) in curve.fade_in().iter().zip(curve.fade_out()) {
            assert!((fade_in + fade_out - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_endpoints() {
        let curve = CrossfadeCurve::generate(64);
        assert_eq!(curve.fade_in()[0], 0.0);
        assert!((curve.fade_in()[63] - 1.0).abs() < 1e-6);
        assert_eq!(curve.fade_out()[0], 1.0);
        assert!(curve.fade_out()[63].abs() < 1e-6);
    }

    #[test]
    fn test_monotonic_fade_in() {
        for shape in [FadeShape::Smootherstep, FadeShape::SCurve, FadeShape::Linear] {
            let curve = CrossfadeCurve::generate_with(shape, 200);
            for pair in curve.fade_in().windows(2) {
                assert!(pair[1] >= pair[0], "{:?} not monotonic", shape);
            }
        }
    }

    #[test]
    fn test_smootherstep_shape() {
        let shape = FadeShape::Smootherstep;

        // Symmetric about the midpoint
        assert!((shape.fade_in(0.5) - 0.5).abs() < 1e-6);

        // Flatter than linear near the ends
        assert!(shape.fade_in(0.1) < 0.1);
        assert!(shape.fade_in(0.9) > 0.9);

        // 6(0.25)^5 - 15(0.25)^4 + 10(0.25)^3
        assert!((shape.fade_in(0.25) - 0.103_515_625).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_steps_fall_back_to_linear() {
        for steps in [0, 1] {
            let curve = CrossfadeCurve::generate(steps);
            assert_eq!(curve.fade_in(), &[0.0, 1.0]);
            assert_eq!(curve.fade_out(), &[1.0, 0.0]);
        }
    }

    #[test]
    fn test_two_steps_is_exact() {
        let curve = CrossfadeCurve::generate(2);
        assert_eq!(curve.fade_in(), &[0.0, 1.0]);
    }

    #[test]
    fn test_sample_interpolates() {
        let curve = CrossfadeCurve::generate_with(FadeShape::Linear, 3);
        assert!((curve.sample_fade_in(0.25) - 0.25).abs() < 1e-6);
        assert!((curve.sample_fade_out(0.75) - 0.25).abs() < 1e-6);

        // Clamped outside the window
        assert_eq!(curve.sample_fade_in(-1.0), 0.0);
        assert_eq!(curve.sample_fade_in(2.0), 1.0);
    }

    #[test]
    fn test_shape_names_round_trip_through_config() {
        #[derive(Deserialize)]
        struct Section {
            curve: FadeShape,
        }

        for shape in [FadeShape::Smootherstep, FadeShape::SCurve, FadeShape::Linear] {
            let text = format!("curve = \"{}\"", shape.as_str());
            let section: Section = toml::from_str(&text).unwrap();
            assert_eq!(section.curve, shape);
        }
        assert!(toml::from_str::<Section>("curve = \"exponential\"").is_err());
    }

    #[test]
    fn test_default() {
        assert_eq!(FadeShape::default(), FadeShape::Smootherstep);
        assert_eq!(CrossfadeCurve::default().len(), DEFAULT_CURVE_STEPS as usize);
    }
}
