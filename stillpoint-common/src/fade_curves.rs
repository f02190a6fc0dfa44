//! Fade curve implementations for crossfading
//!
//! Provides five fade curve types with precise mathematical formulas
//! for sample-accurate gain scheduling.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Fade curve types for crossfading and gain ramps
///
/// Each curve type provides a different perceptual quality:
/// - EqualPower: constant perceived loudness during crossfade (default)
/// - Linear: constant rate of change; has a -3 dB power dip at the midpoint
/// - Logarithmic: fast attack, slow approach
/// - Exponential: slow attack, fast finish
/// - SCurve: symmetric ease-in-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Equal-power: g(p) = sin(p * pi/2)
    ///
    /// The paired fade-out is cos(p * pi/2), so g_out^2 + g_in^2 = 1 at
    /// every point of the crossfade.
    EqualPower,

    /// Linear: g(p) = p
    Linear,

    /// Logarithmic: g(p) = log10(9p + 1)
    Logarithmic,

    /// Exponential: g(p) = p^2
    Exponential,

    /// S-Curve: g(p) = 3p^2 - 2p^3 (smoothstep)
    SCurve,
}

impl FadeCurve {
    /// Fade-in gain at the given progress
    ///
    /// `progress` is the normalized position through the fade; inputs outside
    /// [0.0, 1.0] are clamped. Returns a gain multiplier in [0.0, 1.0]
    /// (0.0 = silence, 1.0 = full volume).
    pub fn fade_in_gain(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);

        match self {
            FadeCurve::EqualPower => (p * FRAC_PI_2).sin(),
            FadeCurve::Linear => p,
            FadeCurve::Logarithmic => (9.0 * p + 1.0).log10(),
            FadeCurve::Exponential => p * p,
            FadeCurve::SCurve => p * p * (3.0 - 2.0 * p),
        }
    }

    /// Fade-out gain at the given progress
    ///
    /// The inverse fade: 1.0 at progress 0.0 falling to 0.0 at progress 1.0.
    /// For EqualPower this evaluates to cos(p * pi/2), the constant-power
    /// companion of the fade-in.
    pub fn fade_out_gain(&self, progress: f64) -> f64 {
        self.fade_in_gain(1.0 - progress.clamp(0.0, 1.0))
    }

    /// Parse curve from its canonical string form
    ///
    /// Accepts the snake_case names plus common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "equal_power" | "equalpower" | "equal-power" => Some(FadeCurve::EqualPower),
            "linear" => Some(FadeCurve::Linear),
            "logarithmic" | "log" => Some(FadeCurve::Logarithmic),
            "exponential" => Some(FadeCurve::Exponential),
            "s_curve" | "scurve" | "s-curve" => Some(FadeCurve::SCurve),
            _ => None,
        }
    }

    /// Human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::EqualPower => "Equal Power",
            FadeCurve::Linear => "Linear",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::Exponential => "Exponential",
            FadeCurve::SCurve => "S-Curve",
        }
    }

    /// All available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::EqualPower,
            FadeCurve::Linear,
            FadeCurve::Logarithmic,
            FadeCurve::Exponential,
            FadeCurve::SCurve,
        ]
    }
}

impl Default for FadeCurve {
    /// Default curve is EqualPower (constant perceived loudness)
    fn default() -> Self {
        FadeCurve::EqualPower
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Precomputed gain schedule for a paired crossfade
///
/// Divides a crossfade of `duration` seconds into `steps = floor(duration /
/// step_time)` equal ticks and yields `(gain_out, gain_in)` pairs for each
/// tick index `k in 0..=steps`.
#[derive(Debug, Clone)]
pub struct CrossfadeCalculator {
    curve: FadeCurve,
    steps: u32,
}

impl CrossfadeCalculator {
    /// Build a calculator for a crossfade of `duration` seconds ticked every
    /// `step_time` seconds. A degenerate duration still produces one step so
    /// the endpoints are always emitted.
    pub fn new(curve: FadeCurve, duration: f64, step_time: f64) -> Self {
        let steps = if step_time > 0.0 {
            ((duration / step_time).floor() as u32).max(1)
        } else {
            1
        };
        Self { curve, steps }
    }

    /// Total number of ticks (gain pairs are emitted for `0..=steps`)
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// `(gain_out, gain_in)` at tick `k`
    ///
    /// `k` beyond `steps` saturates to the final pair (0.0, 1.0)-shaped
    /// endpoint of the curve.
    pub fn gains_at(&self, k: u32) -> (f64, f64) {
        let progress = f64::from(k.min(self.steps)) / f64::from(self.steps);
        (
            self.curve.fade_out_gain(progress),
            self.curve.fade_in_gain(progress),
        )
    }

    /// Iterate all `(gain_out, gain_in)` pairs from start to finish
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        (0..=self.steps).map(move |k| self.gains_at(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_exact() {
        for curve in FadeCurve::all_variants() {
            assert!(
                curve.fade_in_gain(0.0) <= 1e-3,
                "{:?} fade-in at 0.0 should be ~0.0",
                curve
            );
            assert!(
                curve.fade_in_gain(1.0) >= 1.0 - 1e-3,
                "{:?} fade-in at 1.0 should be ~1.0",
                curve
            );
            assert!(
                curve.fade_out_gain(0.0) >= 1.0 - 1e-3,
                "{:?} fade-out at 0.0 should be ~1.0",
                curve
            );
            assert!(
                curve.fade_out_gain(1.0) <= 1e-3,
                "{:?} fade-out at 1.0 should be ~0.0",
                curve
            );
        }
    }

    #[test]
    fn test_equal_power_constant_power() {
        let curve = FadeCurve::EqualPower;
        for step in 0..=10 {
            let p = f64::from(step) / 10.0;
            let g_in = curve.fade_in_gain(p);
            let g_out = curve.fade_out_gain(p);
            let power = g_in * g_in + g_out * g_out;
            assert!(
                (power - 1.0).abs() < 0.01,
                "power at p={} was {}, expected ~1.0",
                p,
                power
            );
        }
    }

    #[test]
    fn test_power_floor() {
        // Equal-power holds full power everywhere; linear dips exactly to
        // half power at the midpoint and never below.
        for curve in [FadeCurve::EqualPower, FadeCurve::Linear] {
            for step in 0..=10 {
                let p = f64::from(step) / 10.0;
                let g_in = curve.fade_in_gain(p);
                let g_out = curve.fade_out_gain(p);
                let power = g_in * g_in + g_out * g_out;
                assert!(
                    power >= 0.5 - 1e-9,
                    "{:?} power at p={} was {}",
                    curve,
                    p,
                    power
                );
            }
        }
    }

    #[test]
    fn test_s_curve_symmetry() {
        let curve = FadeCurve::SCurve;
        for step in 0..=10 {
            let p = f64::from(step) / 10.0;
            let sum = curve.fade_in_gain(p) + curve.fade_in_gain(1.0 - p);
            assert!(
                (sum - 1.0).abs() < 1e-3,
                "s-curve symmetry broken at p={}: {}",
                p,
                sum
            );
        }
    }

    #[test]
    fn test_out_of_range_inputs_clamp() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.fade_in_gain(-0.5), curve.fade_in_gain(0.0));
            assert_eq!(curve.fade_in_gain(1.5), curve.fade_in_gain(1.0));
            assert_eq!(curve.fade_out_gain(-0.5), curve.fade_out_gain(0.0));
            assert_eq!(curve.fade_out_gain(1.5), curve.fade_out_gain(1.0));
        }
    }

    #[test]
    fn test_logarithmic_formula() {
        let curve = FadeCurve::Logarithmic;
        // log10(9 * 0.5 + 1) = log10(5.5)
        assert!((curve.fade_in_gain(0.5) - 5.5_f64.log10()).abs() < 1e-9);
        // Fast attack: above linear through the first half
        assert!(curve.fade_in_gain(0.25) > 0.25);
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(FadeCurve::parse("equal_power"), Some(FadeCurve::EqualPower));
        assert_eq!(FadeCurve::parse("Equal-Power"), Some(FadeCurve::EqualPower));
        assert_eq!(FadeCurve::parse("s_curve"), Some(FadeCurve::SCurve));
        assert_eq!(FadeCurve::parse("scurve"), Some(FadeCurve::SCurve));
        assert_eq!(FadeCurve::parse("linear"), Some(FadeCurve::Linear));
        assert_eq!(FadeCurve::parse("nope"), None);
        assert_eq!(FadeCurve::parse(""), None);
    }

    #[test]
    fn test_calculator_step_count() {
        let calc = CrossfadeCalculator::new(FadeCurve::EqualPower, 5.0, 0.010);
        assert_eq!(calc.steps(), 500);

        // Degenerate duration still yields one step
        let calc = CrossfadeCalculator::new(FadeCurve::Linear, 0.0, 0.010);
        assert_eq!(calc.steps(), 1);
    }

    #[test]
    fn test_calculator_endpoints_and_saturation() {
        let calc = CrossfadeCalculator::new(FadeCurve::EqualPower, 2.0, 0.010);
        let (out0, in0) = calc.gains_at(0);
        assert!(out0 >= 1.0 - 1e-3 && in0 <= 1e-3);

        let (out_n, in_n) = calc.gains_at(calc.steps());
        assert!(out_n <= 1e-3 && in_n >= 1.0 - 1e-3);

        // Past-the-end indices saturate to the endpoint
        assert_eq!(calc.gains_at(calc.steps() + 10), calc.gains_at(calc.steps()));
    }

    #[test]
    fn test_calculator_iterates_monotonically() {
        let calc = CrossfadeCalculator::new(FadeCurve::SCurve, 1.0, 0.010);
        let mut last_in = -1.0;
        let mut last_out = 2.0;
        for (g_out, g_in) in calc.iter() {
            assert!(g_in >= last_in, "fade-in gain regressed");
            assert!(g_out <= last_out, "fade-out gain advanced");
            last_in = g_in;
            last_out = g_out;
        }
    }
}
