//! Temp basal and bolus recommendations from a predicted glucose timeline.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::sample::minutes;
use glucoloop_traits::{DoseEntry, DoseKind, ScheduleProvider};

use crate::config::DosingCfg;
use crate::error::{LoopError, SettingKind};
use crate::predictor::PredictedGlucose;
use crate::schedule::require;

/// Rates within this of each other are treated as equal.
const RATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempBasalRecommendation {
    pub units_per_hour: f64,
    pub duration: TimeDelta,
}

impl TempBasalRecommendation {
    /// Cancel the running temp basal and return to schedule.
    pub fn cancel() -> Self {
        Self {
            units_per_hour: 0.0,
            duration: TimeDelta::zero(),
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.duration == TimeDelta::zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BolusNotice {
    GlucoseBelowSuspendThreshold,
    CurrentGlucoseBelowTarget,
    PredictedGlucoseBelowTarget,
}

impl BolusNotice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlucoseBelowSuspendThreshold => "glucose_below_suspend_threshold",
            Self::CurrentGlucoseBelowTarget => "current_glucose_below_target",
            Self::PredictedGlucoseBelowTarget => "predicted_glucose_below_target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusRecommendation {
    pub units: f64,
    /// Insulin already committed and subtracted from `units`.
    pub pending_insulin: f64,
    pub notice: Option<BolusNotice>,
}

/// A recommendation stamped with the instant it was computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedRecommendation<T> {
    pub value: T,
    pub computed_at: DateTime<Utc>,
}

impl<T> TimestampedRecommendation<T> {
    pub fn new(value: T, computed_at: DateTime<Utc>) -> Self {
        Self { value, computed_at }
    }

    /// The value if it is younger than `ttl` at `now`.
    pub fn check_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> Result<&T, LoopError> {
        if now - self.computed_at > ttl {
            return Err(LoopError::RecommendationExpired {
                computed_at: self.computed_at,
            });
        }
        Ok(&self.value)
    }
}

fn round_to(value: f64, increments_per_unit: f64) -> f64 {
    if increments_per_unit <= 0.0 {
        return value;
    }
    (value * increments_per_unit).round() / increments_per_unit
}

/// Round to the pump resolution without leaving `[0, max]`.
fn round_within(value: f64, max: f64, increments_per_unit: f64) -> f64 {
    let rounded = round_to(value.max(0.0).min(max), increments_per_unit);
    if rounded > max && increments_per_unit > 0.0 {
        (max * increments_per_unit).floor() / increments_per_unit
    } else {
        rounded.max(0.0)
    }
}

/// Rate that moves `from` to `to` over `duration` on top of the scheduled basal.
fn rate_for_glucose(
    from: f64,
    to: f64,
    isf: f64,
    scheduled: f64,
    max_rate: f64,
    duration: TimeDelta,
    increments_per_unit: f64,
) -> f64 {
    let hours = minutes(duration) / 60.0;
    let units = (from - to) / isf;
    let rate = if hours > 0.0 {
        units / hours + scheduled
    } else {
        scheduled
    };
    round_within(rate, max_rate, increments_per_unit)
}

/// Recommend a temp basal, or `None` when the schedule (or running temp) suffices.
pub fn recommend_temp_basal(
    prediction: &PredictedGlucose,
    schedules: &dyn ScheduleProvider,
    cfg: &DosingCfg,
    at: DateTime<Utc>,
    active_temp: Option<&DoseEntry>,
) -> Result<Option<TempBasalRecommendation>, LoopError> {
    let (Some(min), Some(eventual)) = (prediction.minimum(), prediction.eventual()) else {
        return Err(LoopError::MissingData(crate::error::DataKind::Glucose));
    };
    let min_target = require(schedules.target_range(min.time), SettingKind::TargetRangeSchedule)?;
    let eventual_target = require(
        schedules.target_range(eventual.time),
        SettingKind::TargetRangeSchedule,
    )?;
    let isf = require(schedules.insulin_sensitivity(at), SettingKind::SensitivitySchedule)?;
    let scheduled = require(schedules.basal_rate(at), SettingKind::BasalSchedule)?;
    let max_basal = require(schedules.max_basal_rate(), SettingKind::MaxBasalRate)?;
    let increments = cfg.basal_rate_increments_per_unit;
    let mut duration = cfg.temp_basal_duration;

    let min_below_floor = min.glucose < min_target.min;
    let mut rate = if schedules
        .suspend_threshold()
        .is_some_and(|threshold| min.glucose <= threshold)
    {
        Some(0.0)
    } else if min_below_floor
        && (eventual.glucose <= eventual_target.min || !cfg.predictive_temp_below_range)
    {
        Some(rate_for_glucose(
            min.glucose,
            min_target.midpoint(),
            isf,
            scheduled,
            max_basal,
            duration,
            increments,
        ))
    } else if eventual.glucose > eventual_target.max {
        // With the minimum also below range, never go above the schedule. The
        // cap is the schedule as the pump would run it, so it is suppressed below.
        let adjusted_max = if min_below_floor {
            round_to(scheduled, increments)
        } else {
            max_basal
        };
        Some(rate_for_glucose(
            eventual.glucose,
            eventual_target.midpoint(),
            isf,
            scheduled,
            adjusted_max,
            duration,
            increments,
        ))
    } else {
        None
    };

    if rate.is_some_and(|r| (r - round_to(scheduled, increments)).abs() < RATE_EPSILON) {
        rate = None;
    }

    if let Some(temp) = active_temp
        && temp.kind == DoseKind::TempBasal
        && temp.end > at
    {
        match rate {
            Some(r)
                if (r - temp.value).abs() < RATE_EPSILON
                    && temp.end - at > cfg.active_temp_remaining_threshold =>
            {
                rate = None;
            }
            Some(_) => {}
            None => {
                rate = Some(0.0);
                duration = TimeDelta::zero();
            }
        }
    }

    Ok(rate.map(|units_per_hour| TempBasalRecommendation {
        units_per_hour,
        duration,
    }))
}

/// Above-schedule insulin the running temp basal has yet to deliver.
pub fn pending_temp_basal_insulin(
    active_temp: Option<&DoseEntry>,
    schedules: &dyn ScheduleProvider,
    at: DateTime<Utc>,
) -> Result<f64, LoopError> {
    let Some(temp) = active_temp.filter(|d| d.kind == DoseKind::TempBasal && d.end > at) else {
        return Ok(0.0);
    };
    let scheduled = require(schedules.basal_rate(at), SettingKind::BasalSchedule)?;
    let remaining_hours = minutes(temp.end - at.max(temp.start)) / 60.0;
    Ok(((temp.value - scheduled) * remaining_hours).max(0.0))
}

/// Recommend a bolus that brings the eventual glucose to the top of range.
pub fn recommend_bolus(
    prediction: &PredictedGlucose,
    schedules: &dyn ScheduleProvider,
    cfg: &DosingCfg,
    at: DateTime<Utc>,
    pending_insulin: f64,
) -> Result<BolusRecommendation, LoopError> {
    let (Some(first), Some(min), Some(eventual)) =
        (prediction.start(), prediction.minimum(), prediction.eventual())
    else {
        return Err(LoopError::MissingData(crate::error::DataKind::Glucose));
    };
    let max_bolus = require(schedules.max_bolus(), SettingKind::MaxBolus)?;
    let target = require(
        schedules.target_range(eventual.time),
        SettingKind::TargetRangeSchedule,
    )?;
    let isf = require(schedules.insulin_sensitivity(at), SettingKind::SensitivitySchedule)?;
    let zero = |notice| BolusRecommendation {
        units: 0.0,
        pending_insulin,
        notice: Some(notice),
    };

    if schedules
        .suspend_threshold()
        .is_some_and(|threshold| min.glucose <= threshold)
    {
        return Ok(zero(BolusNotice::GlucoseBelowSuspendThreshold));
    }
    if min.glucose < target.min {
        return Ok(zero(if min.time == first.time {
            BolusNotice::CurrentGlucoseBelowTarget
        } else {
            BolusNotice::PredictedGlucoseBelowTarget
        }));
    }

    let needed = (eventual.glucose - target.max) / isf;
    Ok(BolusRecommendation {
        units: round_within(needed - pending_insulin, max_bolus, cfg.bolus_increments_per_unit),
        pending_insulin,
        notice: None,
    })
}
