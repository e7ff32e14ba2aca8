//! Runtime configuration types for the control loop.
//!
//! These are separate from the TOML-deserialized config in `glucoloop_config`;
//! see `conversions` for the mapping.

use chrono::TimeDelta;
use std::time::Duration;

/// Effect computation parameters.
#[derive(Debug, Clone)]
pub struct EffectCfg {
    /// Grid spacing of every effect timeline.
    pub delta: TimeDelta,
    /// Trailing window of glucose used for the momentum slope.
    pub momentum_window: TimeDelta,
    /// How far momentum is projected forward.
    pub momentum_duration: TimeDelta,
    /// Absorption time for carb entries that don't specify one.
    pub default_absorption_time: TimeDelta,
    /// Upper bound on any entry's absorption time; sets the carb lookback.
    pub max_absorption_time: TimeDelta,
    /// Allocate observed counteraction to logged carbs.
    pub dynamic_carb_absorption: bool,
    /// How much counteraction history the tracker keeps.
    pub counteraction_retention: TimeDelta,
}

impl Default for EffectCfg {
    fn default() -> Self {
        Self {
            delta: TimeDelta::minutes(5),
            momentum_window: TimeDelta::minutes(15),
            momentum_duration: TimeDelta::minutes(30),
            default_absorption_time: TimeDelta::minutes(180),
            max_absorption_time: TimeDelta::minutes(480),
            dynamic_carb_absorption: true,
            counteraction_retention: TimeDelta::hours(24),
        }
    }
}

/// Control law used by the retrospective correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetrospectiveMode {
    /// Proportional to the latest discrepancy; effect lasts `effect_duration_floor`.
    Standard,
    /// PID with integrator memory and a growing effect duration.
    #[default]
    Integral,
}

/// Retrospective correction controller parameters.
#[derive(Debug, Clone)]
pub struct RetrospectiveCfg {
    pub enabled: bool,
    pub mode: RetrospectiveMode,
    /// Proportional baseline gain.
    pub current_gain: f64,
    /// Steady-state gain for persistent error. `>= current_gain`.
    pub persistent_gain: f64,
    /// Integral accumulation time constant.
    pub time_constant: TimeDelta,
    /// Gain applied to the change in discrepancy between cycles. 0 disables it.
    pub differential_gain: f64,
    /// Nominal spacing between controller updates.
    pub sample_interval: TimeDelta,
    /// Lookback window over which one discrepancy is measured.
    pub grouping_interval: TimeDelta,
    pub effect_duration_floor: TimeDelta,
    pub effect_duration_increment: TimeDelta,
    pub max_effect_duration: TimeDelta,
    /// Minimum glucose samples in the lookback window.
    pub min_samples: usize,
    /// Lookback spans shorter than this are degenerate.
    pub min_lookback: TimeDelta,
    /// Carb-effect ceiling, expressed in grams and converted with ISF/CR.
    pub carb_effect_limit_grams: f64,
    /// mg/dL below the suspend threshold that a negative correction may reach.
    pub suspend_margin: f64,
}

impl Default for RetrospectiveCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RetrospectiveMode::Integral,
            current_gain: 1.0,
            persistent_gain: 5.0,
            time_constant: TimeDelta::minutes(90),
            differential_gain: 0.0,
            sample_interval: TimeDelta::minutes(5),
            grouping_interval: TimeDelta::minutes(30),
            effect_duration_floor: TimeDelta::minutes(60),
            effect_duration_increment: TimeDelta::minutes(10),
            max_effect_duration: TimeDelta::minutes(180),
            min_samples: 3,
            min_lookback: TimeDelta::minutes(1),
            carb_effect_limit_grams: 10.0,
            suspend_margin: 10.0,
        }
    }
}

impl RetrospectiveCfg {
    /// `exp(-sample_interval / time_constant)`
    pub fn forget(&self) -> f64 {
        let dt = self.sample_interval.num_milliseconds() as f64;
        let tau = self.time_constant.num_milliseconds() as f64;
        (-dt / tau).exp()
    }

    pub fn integral_gain(&self) -> f64 {
        let f = self.forget();
        ((1.0 - f) / f) * (self.persistent_gain - self.current_gain)
    }

    pub fn proportional_gain(&self) -> f64 {
        self.current_gain - self.integral_gain()
    }

    /// Largest gap between consecutive discrepancy windows that still counts as contiguous.
    pub fn contiguity_gap(&self) -> TimeDelta {
        self.grouping_interval + self.sample_interval
    }
}

/// Dose recommendation parameters.
#[derive(Debug, Clone)]
pub struct DosingCfg {
    /// Pump basal resolution; rates are rounded to `1 / increments` U/h.
    pub basal_rate_increments_per_unit: f64,
    pub bolus_increments_per_unit: f64,
    pub temp_basal_duration: TimeDelta,
    pub predictive_temp_below_range: bool,
    pub active_temp_remaining_threshold: TimeDelta,
    pub recency_interval: TimeDelta,
    pub recommendation_ttl: TimeDelta,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            basal_rate_increments_per_unit: 40.0,
            bolus_increments_per_unit: 40.0,
            temp_basal_duration: TimeDelta::minutes(30),
            predictive_temp_below_range: true,
            active_temp_remaining_threshold: TimeDelta::minutes(11),
            recency_interval: TimeDelta::minutes(15),
            recommendation_ttl: TimeDelta::minutes(5),
        }
    }
}

/// Collaborator timeouts.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Upper bound on each history fetch.
    pub fetch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_millis(2000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_gains_sum_to_current_gain() {
        let cfg = RetrospectiveCfg::default();
        let ki = cfg.integral_gain();
        let kp = cfg.proportional_gain();
        assert!(ki > 0.0);
        assert!((ki + kp - cfg.current_gain).abs() < 1e-12);
        // 5 min / 90 min with gains 1 and 5
        let f = (-5.0f64 / 90.0).exp();
        assert!((cfg.forget() - f).abs() < 1e-12);
        assert!((ki - (1.0 - f) / f * 4.0).abs() < 1e-12);
    }
}
