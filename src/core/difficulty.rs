//! Stress-to-difficulty mapping.
//!
//! Each difficulty field is a piecewise-linear curve over stress in [0, 1],
//! clamped to the field's configured range. Curves are validated as
//! non-decreasing, so a rising stress score never lowers any field.

use crate::config::{Config, CurveParams, DifficultyCurves, StressLevels};
use crate::core::stress::{StressLevel, StressScore};
use serde::{Deserialize, Serialize};

/// Parameters handed to the game loop each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultySetting {
    /// Screen blur applied by the renderer (pixels)
    pub blur_radius: f64,
    /// Obstacle speed relative to normal
    pub speed_multiplier: f64,
    /// Obstacle spawns per second
    pub spawn_rate: f64,
    /// Stress score the setting was derived from
    pub stress_score: f64,
    /// Confidence of that score
    pub confidence: f64,
}

impl CurveParams {
    /// Evaluate the curve at `stress`, clamped to `[min, max]`.
    pub fn evaluate(&self, stress: f64) -> f64 {
        let (Some(&(first_x, first_y)), Some(&(last_x, last_y))) =
            (self.breakpoints.first(), self.breakpoints.last())
        else {
            return self.min;
        };

        let value = if stress <= first_x {
            first_y
        } else if stress >= last_x {
            last_y
        } else {
            self.breakpoints
                .windows(2)
                .find(|w| stress >= w[0].0 && stress <= w[1].0)
                .map(|w| {
                    let (x0, y0) = w[0];
                    let (x1, y1) = w[1];
                    let t = (stress - x0) / (x1 - x0);
                    y0 + t * (y1 - y0)
                })
                .unwrap_or(last_y)
        };
        value.clamp(self.min, self.max)
    }
}

/// Deterministic mapping from stress score to difficulty.
#[derive(Debug, Clone)]
pub struct DifficultyController {
    curves: DifficultyCurves,
    levels: StressLevels,
}

impl DifficultyController {
    pub fn new(curves: DifficultyCurves, levels: StressLevels) -> Self {
        Self { curves, levels }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.difficulty_curve_params.clone(),
            config.stress_levels.clone(),
        )
    }

    /// Difficulty for a stress value. Out-of-range input is clamped to
    /// [0, 1]; NaN maps as 0.
    pub fn map(&self, stress_score: f64) -> DifficultySetting {
        let stress = if stress_score.is_nan() {
            0.0
        } else {
            stress_score.clamp(0.0, 1.0)
        };
        DifficultySetting {
            blur_radius: self.curves.blur_radius.evaluate(stress),
            speed_multiplier: self.curves.speed_multiplier.evaluate(stress),
            spawn_rate: self.curves.spawn_rate.evaluate(stress),
            stress_score: stress,
            confidence: 1.0,
        }
    }

    /// Difficulty for a scored tick, carrying its confidence.
    pub fn apply(&self, score: &StressScore) -> DifficultySetting {
        DifficultySetting {
            confidence: score.confidence.clamp(0.0, 1.0),
            ..self.map(score.value)
        }
    }

    pub fn classify(&self, stress_score: f64) -> StressLevel {
        StressLevel::from_score(stress_score, &self.levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn controller() -> DifficultyController {
        DifficultyController::from_config(&Config::default())
    }

    #[test]
    fn test_default_curve_values() {
        let c = controller();
        let calm = c.map(0.0);
        assert_eq!(calm.blur_radius, 0.0);
        assert_eq!(calm.speed_multiplier, 1.0);
        assert_eq!(calm.spawn_rate, 0.6);

        let top = c.map(1.0);
        assert_eq!(top.blur_radius, 16.0);
        assert_eq!(top.speed_multiplier, 1.4);

        // Midway through the moderate band.
        assert!((c.map(0.5).blur_radius - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_over_rising_stress() {
        let c = controller();
        let settings: Vec<_> = (0..=10)
            .map(|i| c.map(0.1 + 0.07 * i as f64))
            .collect();
        for pair in settings.windows(2) {
            assert!(pair[1].blur_radius >= pair[0].blur_radius);
            assert!(pair[1].speed_multiplier >= pair[0].speed_multiplier);
            assert!(pair[1].spawn_rate >= pair[0].spawn_rate);
        }
        assert!(settings.iter().all(|s| s.blur_radius <= 16.0));
    }

    #[test]
    fn test_clamps_output_and_input() {
        let curves = DifficultyCurves {
            blur_radius: CurveParams::new(vec![(0.0, -5.0), (1.0, 50.0)], 0.0, 10.0),
            ..DifficultyCurves::default()
        };
        let c = DifficultyController::new(curves, StressLevels::default());
        assert_eq!(c.map(0.0).blur_radius, 0.0);
        assert_eq!(c.map(1.0).blur_radius, 10.0);
        assert_eq!(c.map(7.0), c.map(1.0));
        assert_eq!(c.map(-3.0), c.map(0.0));
        assert_eq!(c.map(f64::NAN), c.map(0.0));
    }

    #[test]
    fn test_single_breakpoint_is_constant() {
        let curve = CurveParams::new(vec![(0.5, 3.0)], 0.0, 10.0);
        assert_eq!(curve.evaluate(0.0), 3.0);
        assert_eq!(curve.evaluate(1.0), 3.0);
    }

    #[test]
    fn test_apply_carries_confidence() {
        let c = controller();
        let score = StressScore {
            timestamp: 3.0,
            value: 0.8,
            confidence: 0.49,
        };
        let setting = c.apply(&score);
        assert_eq!(setting.confidence, 0.49);
        assert_eq!(setting.stress_score, 0.8);
        assert_eq!(c.classify(score.value), StressLevel::Stressed);
    }
}
