//! Retrospective correction: a discretized PID controller on prediction error.
//!
//! Each cycle measures the discrepancy between observed glucose and the
//! carb + insulin model over the grouping window, feeds it through the
//! controller, and emits a linearly decaying correction effect. Controller
//! memory lives in [`RetrospectiveCorrectionState`], owned by the session.
//!
//! `RetrospectiveMode::Standard` skips the controller and corrects in
//! proportion to the latest discrepancy alone.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::sample::minutes;
use glucoloop_traits::{GlucoseEffect, GlucoseSample, ScheduleProvider};

use crate::config::{RetrospectiveCfg, RetrospectiveMode};
use crate::timeline::{change_between, decay_effect};

/// Carb effect is compared on a 30-minute basis.
const CARB_EFFECT_BASIS_MIN: f64 = 30.0;

/// Why no correction was produced this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    Disabled,
    MissingSchedules,
    TooFewSamples,
    DegenerateLookback,
    StaleGlucose,
}

/// Which branch of the control law ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStatus {
    /// Proportional-only correction; integrator memory is not used.
    Standard,
    Accumulated,
    ResetOnReversal,
    ResetOnCarbOverride,
    Unavailable(UnavailableReason),
}

impl CorrectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Accumulated => "accumulated",
            Self::ResetOnReversal => "reset_on_reversal",
            Self::ResetOnCarbOverride => "reset_on_carb_override",
            Self::Unavailable(UnavailableReason::Disabled) => "disabled",
            Self::Unavailable(UnavailableReason::MissingSchedules) => "missing_schedules",
            Self::Unavailable(UnavailableReason::TooFewSamples) => "too_few_samples",
            Self::Unavailable(UnavailableReason::DegenerateLookback) => "degenerate_lookback",
            Self::Unavailable(UnavailableReason::StaleGlucose) => "stale_glucose",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionLimits {
    pub positive: f64,
    pub negative: f64,
}

/// Diagnostics for one controller update.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionReport {
    pub status: CorrectionStatus,
    pub discrepancy: Option<f64>,
    pub proportional: f64,
    pub integral: f64,
    pub differential: f64,
    pub overall: f64,
    pub effect_duration: TimeDelta,
    pub limits: Option<CorrectionLimits>,
}

impl CorrectionReport {
    fn unavailable(reason: UnavailableReason, state: &RetrospectiveCorrectionState) -> Self {
        Self {
            status: CorrectionStatus::Unavailable(reason),
            discrepancy: None,
            proportional: 0.0,
            integral: state.integral,
            differential: 0.0,
            overall: 0.0,
            effect_duration: state.effect_duration,
            limits: None,
        }
    }
}

/// Correction effect plus its report. `effect` is empty when unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub effect: Vec<GlucoseEffect>,
    pub report: CorrectionReport,
}

impl Correction {
    pub fn unavailable(reason: UnavailableReason, state: &RetrospectiveCorrectionState) -> Self {
        Self {
            effect: Vec::new(),
            report: CorrectionReport::unavailable(reason, state),
        }
    }
}

/// Observed-minus-modeled glucose over one lookback window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discrepancy {
    pub value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Latest observed glucose.
    pub latest: f64,
    /// Carb-effect change over the window.
    pub carb_change: f64,
}

/// Measure the discrepancy over `[latest - grouping_interval, latest]`.
pub fn measure_discrepancy(
    cfg: &RetrospectiveCfg,
    glucose: &[GlucoseSample],
    insulin_effect: &[GlucoseEffect],
    carb_effect: &[GlucoseEffect],
) -> Result<Discrepancy, UnavailableReason> {
    let Some(latest) = glucose.last() else {
        return Err(UnavailableReason::TooFewSamples);
    };
    let window_start = latest.time - cfg.grouping_interval;
    let from = glucose.partition_point(|s| s.time < window_start);
    let window = &glucose[from..];
    if window.len() < cfg.min_samples.max(2) {
        return Err(UnavailableReason::TooFewSamples);
    }
    let first = &window[0];
    if latest.time - first.time < cfg.min_lookback {
        return Err(UnavailableReason::DegenerateLookback);
    }
    let carb_change = change_between(carb_effect, first.time, latest.time);
    let modeled =
        first.quantity + change_between(insulin_effect, first.time, latest.time) + carb_change;
    Ok(Discrepancy {
        value: latest.quantity - modeled,
        start: first.time,
        end: latest.time,
        latest: latest.quantity,
        carb_change,
    })
}

/// Integrator memory carried across cycles of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrospectiveCorrectionState {
    integral: f64,
    previous_discrepancy: f64,
    effect_duration: TimeDelta,
    /// End of the window the last update measured.
    last_discrepancy_end: Option<DateTime<Utc>>,
}

impl RetrospectiveCorrectionState {
    pub fn new(cfg: &RetrospectiveCfg) -> Self {
        Self {
            integral: 0.0,
            previous_discrepancy: 0.0,
            effect_duration: cfg.effect_duration_floor,
            last_discrepancy_end: None,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_discrepancy(&self) -> f64 {
        self.previous_discrepancy
    }

    pub fn effect_duration(&self) -> TimeDelta {
        self.effect_duration
    }

    pub fn last_discrepancy_end(&self) -> Option<DateTime<Utc>> {
        self.last_discrepancy_end
    }

    pub fn reset(&mut self, cfg: &RetrospectiveCfg) {
        *self = Self::new(cfg);
    }

    /// Run one controller update.
    ///
    /// Leaves the state untouched when the correction is unavailable. A
    /// discrepancy window starting more than `contiguity_gap` after the last
    /// one ends is measured against a fresh state.
    pub fn update(
        &mut self,
        cfg: &RetrospectiveCfg,
        schedules: &dyn ScheduleProvider,
        glucose: &[GlucoseSample],
        insulin_effect: &[GlucoseEffect],
        carb_effect: &[GlucoseEffect],
        delta: TimeDelta,
    ) -> Correction {
        if !cfg.enabled {
            return Correction::unavailable(UnavailableReason::Disabled, self);
        }
        let d = match measure_discrepancy(cfg, glucose, insulin_effect, carb_effect) {
            Ok(d) => d,
            Err(reason) => return Correction::unavailable(reason, self),
        };
        if cfg.mode == RetrospectiveMode::Standard {
            return standard_correction(cfg, &d, self, delta);
        }
        let Some(limits) = limits_at(cfg, schedules, d.latest, d.end) else {
            return Correction::unavailable(UnavailableReason::MissingSchedules, self);
        };
        let Some(carb_limit) = carb_effect_limit(cfg, schedules, d.end) else {
            return Correction::unavailable(UnavailableReason::MissingSchedules, self);
        };

        if let Some(end) = self.last_discrepancy_end
            && d.start - end > cfg.contiguity_gap()
        {
            tracing::debug!(
                gap_min = (d.start - end).num_minutes(),
                "discrepancy not contiguous; controller starts fresh"
            );
            self.reset(cfg);
        }

        let forget = cfg.forget();
        let ki = cfg.integral_gain();
        let kp = cfg.proportional_gain();
        let discrepancy = d.value;

        let lookback_min = minutes(d.end - d.start);
        let scaled_carb_effect = d.carb_change * CARB_EFFECT_BASIS_MIN / lookback_min;

        let status = if discrepancy > 0.0 && scaled_carb_effect > carb_limit {
            CorrectionStatus::ResetOnCarbOverride
        } else if discrepancy * self.previous_discrepancy < 0.0 {
            CorrectionStatus::ResetOnReversal
        } else {
            CorrectionStatus::Accumulated
        };

        match status {
            CorrectionStatus::Accumulated => {
                self.integral = (forget * self.integral + ki * discrepancy)
                    .max(limits.negative)
                    .min(limits.positive);
                self.effect_duration =
                    (self.effect_duration + cfg.effect_duration_increment).min(cfg.max_effect_duration);
            }
            _ => {
                self.integral = ki * discrepancy;
                self.effect_duration = cfg.effect_duration_floor;
            }
        }

        let proportional = kp * discrepancy;
        let differential = cfg.differential_gain * (discrepancy - self.previous_discrepancy);
        let overall = proportional + self.integral + differential;
        self.previous_discrepancy = discrepancy;
        self.last_discrepancy_end = Some(d.end);

        let duration_min = minutes(self.effect_duration);
        let grouping_min = minutes(cfg.grouping_interval);
        let rate = if duration_min > 0.0 && grouping_min > 0.0 {
            overall * (60.0 / duration_min) / grouping_min
        } else {
            0.0
        };
        let effect = decay_effect(d.end, rate, self.effect_duration, delta);

        match status {
            CorrectionStatus::Accumulated => tracing::debug!(
                discrepancy,
                integral = self.integral,
                overall,
                effect_min = self.effect_duration.num_minutes(),
                "retrospective correction accumulated"
            ),
            _ => tracing::warn!(
                status = status.as_str(),
                discrepancy,
                integral = self.integral,
                "retrospective integrator reset"
            ),
        }

        Correction {
            effect,
            report: CorrectionReport {
                status,
                discrepancy: Some(discrepancy),
                proportional,
                integral: self.integral,
                differential,
                overall,
                effect_duration: self.effect_duration,
                limits: Some(limits),
            },
        }
    }
}

/// Proportional correction over a fixed effect duration. `state` is only reported.
fn standard_correction(
    cfg: &RetrospectiveCfg,
    d: &Discrepancy,
    state: &RetrospectiveCorrectionState,
    delta: TimeDelta,
) -> Correction {
    let span_min = minutes(d.end - d.start).max(minutes(cfg.grouping_interval));
    let rate = if span_min > 0.0 { d.value / span_min } else { 0.0 };
    let duration = cfg.effect_duration_floor;
    tracing::debug!(discrepancy = d.value, "standard retrospective correction");
    Correction {
        effect: decay_effect(d.end, rate, duration, delta),
        report: CorrectionReport {
            status: CorrectionStatus::Standard,
            discrepancy: Some(d.value),
            proportional: d.value,
            integral: state.integral,
            differential: 0.0,
            overall: d.value,
            effect_duration: duration,
            limits: None,
        },
    }
}

/// Integrator clamp at `at` for the latest glucose `latest`.
pub fn limits_at(
    cfg: &RetrospectiveCfg,
    schedules: &dyn ScheduleProvider,
    latest: f64,
    at: DateTime<Utc>,
) -> Option<CorrectionLimits> {
    let isf = schedules.insulin_sensitivity(at)?;
    let basal = schedules.basal_rate(at)?;
    let target = schedules.target_range(at)?;
    let zero_temp_effect = (isf * basal).abs();
    let positive = (latest - target.max)
        .max(2.0 * zero_temp_effect)
        .min(4.0 * zero_temp_effect);
    let floor = schedules.suspend_threshold().unwrap_or(target.min);
    let negative = -(latest - (floor - cfg.suspend_margin)).max(0.0);
    Some(CorrectionLimits { positive, negative })
}

/// mg/dL of carb effect per 30 minutes treated as "carbs not yet modeled".
fn carb_effect_limit(
    cfg: &RetrospectiveCfg,
    schedules: &dyn ScheduleProvider,
    at: DateTime<Utc>,
) -> Option<f64> {
    let isf = schedules.insulin_sensitivity(at)?;
    let cr = schedules.carb_ratio(at)?;
    (cr > 0.0).then(|| isf / cr * cfg.carb_effect_limit_grams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DailySchedule, TherapySettings};
    use glucoloop_traits::GlucoseRange;

    fn t(min: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::hours(1000) + TimeDelta::minutes(min)
    }

    fn settings() -> TherapySettings {
        TherapySettings {
            basal: Some(DailySchedule::constant(1.0)),
            sensitivity: Some(DailySchedule::constant(50.0)),
            carb_ratio: Some(DailySchedule::constant(10.0)),
            target: Some(DailySchedule::constant(GlucoseRange::new(100.0, 120.0))),
            suspend_threshold: Some(70.0),
            ..TherapySettings::default()
        }
    }

    fn rising(end_min: i64, total_rise: f64) -> Vec<GlucoseSample> {
        (0..=6)
            .map(|k| {
                let m = end_min - 30 + 5 * k;
                GlucoseSample::new(t(m), 150.0 + total_rise * k as f64 / 6.0, "cgm")
            })
            .collect()
    }

    #[test]
    fn discrepancy_needs_enough_samples() {
        let cfg = RetrospectiveCfg::default();
        let two = &rising(30, 10.0)[5..];
        assert_eq!(
            measure_discrepancy(&cfg, two, &[], &[]),
            Err(UnavailableReason::TooFewSamples)
        );
        let d = measure_discrepancy(&cfg, &rising(30, 10.0), &[], &[]).unwrap();
        assert!((d.value - 10.0).abs() < 1e-12);
    }

    #[test]
    fn limits_follow_zero_temp_effect() {
        let cfg = RetrospectiveCfg::default();
        let l = limits_at(&cfg, &settings(), 250.0, t(0)).unwrap();
        // zero temp effect 50: clamp(130, 100, 200)
        assert_eq!(l.positive, 130.0);
        assert_eq!(l.negative, -190.0);
        let l = limits_at(&cfg, &settings(), 110.0, t(0)).unwrap();
        assert_eq!(l.positive, 100.0);
    }

    #[test]
    fn unavailable_leaves_state_untouched() {
        let cfg = RetrospectiveCfg::default();
        let mut state = RetrospectiveCorrectionState::new(&cfg);
        let before = state.clone();
        let empty = TherapySettings::default();
        let c = state.update(&cfg, &empty, &rising(30, 10.0), &[], &[], TimeDelta::minutes(5));
        assert!(c.effect.is_empty());
        assert_eq!(
            c.report.status,
            CorrectionStatus::Unavailable(UnavailableReason::MissingSchedules)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn standard_mode_keeps_no_memory() {
        let cfg = RetrospectiveCfg {
            mode: RetrospectiveMode::Standard,
            ..RetrospectiveCfg::default()
        };
        let mut state = RetrospectiveCorrectionState::new(&cfg);
        let before = state.clone();
        for _ in 0..3 {
            let c = state.update(&cfg, &settings(), &rising(30, 10.0), &[], &[], TimeDelta::minutes(5));
            assert_eq!(c.report.status, CorrectionStatus::Standard);
            assert_eq!(c.report.overall, c.report.discrepancy.unwrap());
            assert_eq!(c.report.effect_duration, cfg.effect_duration_floor);
        }
        assert_eq!(state, before);
    }

    #[test]
    fn fresh_state_accumulates() {
        let cfg = RetrospectiveCfg::default();
        let mut state = RetrospectiveCorrectionState::new(&cfg);
        let c = state.update(&cfg, &settings(), &rising(30, 10.0), &[], &[], TimeDelta::minutes(5));
        assert_eq!(c.report.status, CorrectionStatus::Accumulated);
        assert!((state.integral() - cfg.integral_gain() * 10.0).abs() < 1e-12);
        assert_eq!(state.effect_duration(), TimeDelta::minutes(70));
        assert_eq!(c.effect.first().map(|e| e.time), Some(t(30)));
        assert!(c.effect.last().unwrap().quantity > 0.0);
    }
}
