//! Reference insulin activity and carb absorption curves.
//!
//! The loop only depends on the `InsulinModel` / `CarbAbsorptionModel` traits;
//! these implementations are what the CLI wires up from configuration.

use chrono::TimeDelta;
use glucoloop_traits::sample::minutes;
use glucoloop_traits::{CarbAbsorptionModel, InsulinModel};

use crate::error::BuildError;

/// Exponential insulin activity curve parameterized by action duration and peak time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialInsulinModel {
    action_duration: f64,
    peak: f64,
    delay: TimeDelta,
    tau: f64,
    a: f64,
    s: f64,
}

impl ExponentialInsulinModel {
    /// `action_duration` and `peak` in minutes; requires `0 < peak < action_duration / 2`.
    pub fn new(action_duration: f64, peak: f64, delay: TimeDelta) -> Result<Self, BuildError> {
        if !(action_duration > 0.0 && peak > 0.0 && peak < action_duration / 2.0) {
            return Err(BuildError::InvalidConfig(
                "insulin peak must be in (0, action_duration / 2)",
            ));
        }
        Ok(Self::curve(action_duration, peak, delay))
    }

    pub fn rapid_acting_adult() -> Self {
        Self::preset(360.0, 75.0)
    }

    pub fn rapid_acting_child() -> Self {
        Self::preset(360.0, 65.0)
    }

    pub fn fiasp() -> Self {
        Self::preset(360.0, 55.0)
    }

    fn preset(action_duration: f64, peak: f64) -> Self {
        Self::curve(action_duration, peak, TimeDelta::minutes(10))
    }

    fn curve(action_duration: f64, peak: f64, delay: TimeDelta) -> Self {
        let tau = peak * (1.0 - peak / action_duration) / (1.0 - 2.0 * peak / action_duration);
        let a = 2.0 * tau / action_duration;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-action_duration / tau).exp());
        Self {
            action_duration,
            peak,
            delay,
            tau,
            a,
            s,
        }
    }

    pub fn peak(&self) -> TimeDelta {
        glucoloop_traits::sample::from_minutes(self.peak)
    }
}

impl InsulinModel for ExponentialInsulinModel {
    fn percent_effect_remaining(&self, elapsed: TimeDelta) -> f64 {
        let t = minutes(elapsed);
        if t <= 0.0 {
            return 1.0;
        }
        if t >= self.action_duration {
            return 0.0;
        }
        let (tau, a, s, td) = (self.tau, self.a, self.s, self.action_duration);
        let remaining =
            1.0 - s * (1.0 - a) * ((t * t / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0);
        remaining.clamp(0.0, 1.0)
    }

    fn effect_duration(&self) -> TimeDelta {
        glucoloop_traits::sample::from_minutes(self.action_duration)
    }

    fn delay(&self) -> TimeDelta {
        self.delay
    }
}

/// Walsh polynomial curves for 3, 4, 5 and 6 hour action durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalshInsulinModel {
    hours: u8,
    delay: TimeDelta,
}

impl WalshInsulinModel {
    pub fn new(action_duration: TimeDelta, delay: TimeDelta) -> Result<Self, BuildError> {
        let hours = match action_duration.num_minutes() {
            180 => 3,
            240 => 4,
            300 => 5,
            360 => 6,
            _ => {
                return Err(BuildError::InvalidConfig(
                    "walsh action duration must be 3, 4, 5 or 6 hours",
                ));
            }
        };
        Ok(Self { hours, delay })
    }
}

impl InsulinModel for WalshInsulinModel {
    fn percent_effect_remaining(&self, elapsed: TimeDelta) -> f64 {
        let t = minutes(elapsed);
        if t <= 0.0 {
            return 1.0;
        }
        if t >= f64::from(self.hours) * 60.0 {
            return 0.0;
        }
        let (c4, c3, c2, c1, c0) = match self.hours {
            3 => (-3.2030e-9, 1.354e-6, -1.759e-4, 9.255e-4, 0.99951),
            4 => (-3.310e-10, 2.530e-7, -5.510e-5, -9.086e-4, 0.99950),
            5 => (-2.950e-10, 2.320e-7, -5.550e-5, 4.490e-4, 0.99300),
            _ => (-1.493e-10, 1.413e-7, -4.095e-5, 6.365e-4, 0.99700),
        };
        (c4 * t.powi(4) + c3 * t.powi(3) + c2 * t.powi(2) + c1 * t + c0).clamp(0.0, 1.0)
    }

    fn effect_duration(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.hours))
    }

    fn delay(&self) -> TimeDelta {
        self.delay
    }
}

/// Piecewise-quadratic absorption (Scheiner GI curve).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolicCarbModel {
    pub delay: TimeDelta,
}

impl Default for ParabolicCarbModel {
    fn default() -> Self {
        Self {
            delay: TimeDelta::minutes(10),
        }
    }
}

impl CarbAbsorptionModel for ParabolicCarbModel {
    fn percent_absorbed(&self, elapsed: TimeDelta, absorption_time: TimeDelta) -> f64 {
        let t = minutes(elapsed);
        let at = minutes(absorption_time);
        if t <= 0.0 || at <= 0.0 {
            0.0
        } else if t <= at / 2.0 {
            2.0 / (at * at) * t * t
        } else if t < at {
            -1.0 + 4.0 / at * (t - t * t / (2.0 * at))
        } else {
            1.0
        }
    }

    fn delay(&self) -> TimeDelta {
        self.delay
    }
}

/// Constant-rate absorption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCarbModel {
    pub delay: TimeDelta,
}

impl Default for LinearCarbModel {
    fn default() -> Self {
        Self {
            delay: TimeDelta::minutes(10),
        }
    }
}

impl CarbAbsorptionModel for LinearCarbModel {
    fn percent_absorbed(&self, elapsed: TimeDelta, absorption_time: TimeDelta) -> f64 {
        let at = minutes(absorption_time);
        if at <= 0.0 {
            return 0.0;
        }
        (minutes(elapsed) / at).clamp(0.0, 1.0)
    }

    fn delay(&self) -> TimeDelta {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_curve_is_monotone_and_bounded() {
        let m = ExponentialInsulinModel::rapid_acting_adult();
        assert_eq!(m.percent_effect_remaining(TimeDelta::zero()), 1.0);
        assert_eq!(m.percent_effect_remaining(TimeDelta::minutes(360)), 0.0);
        let mut prev = 1.0;
        for k in 1..72 {
            let r = m.percent_effect_remaining(TimeDelta::minutes(5 * k));
            assert!(r <= prev + 1e-12, "non-monotone at {k}");
            prev = r;
        }
    }

    #[test]
    fn presets_match_explicit_construction() {
        let explicit = ExponentialInsulinModel::new(360.0, 55.0, TimeDelta::minutes(10)).unwrap();
        assert_eq!(explicit, ExponentialInsulinModel::fiasp());
        assert!(ExponentialInsulinModel::new(360.0, 200.0, TimeDelta::zero()).is_err());
    }

    #[test]
    fn walsh_requires_supported_duration() {
        assert!(WalshInsulinModel::new(TimeDelta::hours(4), TimeDelta::zero()).is_ok());
        assert!(WalshInsulinModel::new(TimeDelta::minutes(200), TimeDelta::zero()).is_err());
    }

    #[test]
    fn parabolic_absorption_is_half_at_midpoint() {
        let m = ParabolicCarbModel::default();
        let at = TimeDelta::minutes(120);
        assert!((m.percent_absorbed(TimeDelta::minutes(60), at) - 0.5).abs() < 1e-12);
        assert_eq!(m.percent_absorbed(TimeDelta::minutes(-5), at), 0.0);
        assert_eq!(m.percent_absorbed(TimeDelta::minutes(130), at), 1.0);
    }
}
