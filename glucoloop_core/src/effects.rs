//! Glucose effect computation: insulin, carbs, and momentum.
//!
//! All effect timelines are cumulative (mg/dL) on a grid aligned to `delta`.
//! Rate doses are expressed relative to the scheduled basal rate, so a
//! temp basal equal to the schedule has no effect and a suspension has a
//! positive one.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::sample::minutes;
use glucoloop_traits::{
    CarbAbsorptionModel, CarbEntry, DoseEntry, DoseKind, GlucoseEffect, GlucoseSample,
    GlucoseVelocity, InsulinModel, ScheduleProvider,
};

use crate::error::{LoopError, SettingKind};
use crate::schedule::require;
use crate::timeline::{grid, value_at};

/// Net insulin delivered at one instant, with the sensitivity in effect then.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsulinPulse {
    pub time: DateTime<Utc>,
    pub units: f64,
    pub sensitivity: f64,
}

/// Split doses into net-of-basal pulses, truncating rate doses at `delivered_until`.
pub fn net_insulin_pulses(
    doses: &[DoseEntry],
    schedules: &dyn ScheduleProvider,
    delivered_until: DateTime<Utc>,
    delta: TimeDelta,
) -> Result<Vec<InsulinPulse>, LoopError> {
    let mut pulses = Vec::new();
    for dose in doses {
        match dose.kind {
            DoseKind::Basal | DoseKind::Resume => {}
            DoseKind::Bolus => {
                if dose.start > delivered_until {
                    continue;
                }
                let isf = require(
                    schedules.insulin_sensitivity(dose.start),
                    SettingKind::SensitivitySchedule,
                )?;
                pulses.push(InsulinPulse {
                    time: dose.start,
                    units: dose.value,
                    sensitivity: isf,
                });
            }
            DoseKind::TempBasal | DoseKind::Suspend => {
                let end = dose.end.min(delivered_until);
                let mut seg_start = dose.start;
                while seg_start < end {
                    let seg_end = (seg_start + delta).min(end);
                    let basal = require(
                        schedules.basal_rate(seg_start),
                        SettingKind::BasalSchedule,
                    )?;
                    let isf = require(
                        schedules.insulin_sensitivity(seg_start),
                        SettingKind::SensitivitySchedule,
                    )?;
                    let rate = if dose.kind == DoseKind::Suspend {
                        0.0
                    } else {
                        dose.value
                    };
                    let units = (rate - basal) * minutes(seg_end - seg_start) / 60.0;
                    if units != 0.0 {
                        pulses.push(InsulinPulse {
                            time: seg_start,
                            units,
                            sensitivity: isf,
                        });
                    }
                    seg_start = seg_end;
                }
            }
        }
    }
    pulses.sort_by_key(|p| p.time);
    Ok(pulses)
}

/// Cumulative insulin effect on the grid covering `[from, to]`.
pub fn insulin_effects(
    pulses: &[InsulinPulse],
    model: &dyn InsulinModel,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: TimeDelta,
) -> Vec<GlucoseEffect> {
    let delay = model.delay();
    grid(from, to, delta)
        .into_iter()
        .map(|t| {
            let value: f64 = pulses
                .iter()
                .filter(|p| p.time <= t)
                .map(|p| {
                    let remaining = model.percent_effect_remaining(t - p.time - delay);
                    -p.sensitivity * p.units * (1.0 - remaining)
                })
                .sum();
            GlucoseEffect::new(t, value)
        })
        .collect()
}

/// Net insulin still active at `at`.
pub fn insulin_on_board(pulses: &[InsulinPulse], model: &dyn InsulinModel, at: DateTime<Utc>) -> f64 {
    let delay = model.delay();
    pulses
        .iter()
        .filter(|p| p.time <= at)
        .map(|p| p.units * model.percent_effect_remaining(at - p.time - delay))
        .sum()
}

/// Carb inputs shared by effect and carbs-on-board computation.
pub struct CarbContext<'a> {
    pub schedules: &'a dyn ScheduleProvider,
    pub model: &'a dyn CarbAbsorptionModel,
    pub default_absorption_time: TimeDelta,
    /// Longer per-entry absorption times are capped to this.
    pub max_absorption_time: TimeDelta,
    /// Observed counteraction; `None` uses the model alone.
    pub counteraction: Option<&'a [GlucoseVelocity]>,
}

/// Per-entry absorption state derived once per computation.
struct EntryAbsorption {
    entry: CarbEntry,
    absorption_time: TimeDelta,
    /// mg/dL per gram at entry time.
    csf: f64,
    /// Cumulative grams attributed from counteraction, `(time, grams)`.
    observed: Vec<GlucoseEffect>,
}

impl EntryAbsorption {
    fn model_fraction(&self, ctx: &CarbContext<'_>, at: DateTime<Utc>) -> f64 {
        let elapsed = at - self.entry.start - ctx.model.delay();
        ctx.model
            .percent_absorbed(elapsed, self.absorption_time)
            .clamp(0.0, 1.0)
    }

    fn absorbed(&self, ctx: &CarbContext<'_>, at: DateTime<Utc>) -> f64 {
        let grams = self.entry.grams;
        if at < self.entry.start {
            return 0.0;
        }
        let model_now = grams * self.model_fraction(ctx, at);
        let Some(obs_end) = self.observed.last().map(|e| e.time) else {
            return model_now;
        };
        if at <= obs_end {
            let seen = value_at(&self.observed, at).unwrap_or(0.0);
            return model_now.max(seen).min(grams);
        }
        // Past the observations: rescale the model's remaining shape onto the
        // carbs not yet absorbed at the last observation.
        let base = (grams * self.model_fraction(ctx, obs_end))
            .max(value_at(&self.observed, obs_end).unwrap_or(0.0))
            .min(grams);
        let p_end = self.model_fraction(ctx, obs_end);
        if 1.0 - p_end <= f64::EPSILON {
            return grams;
        }
        let p_now = self.model_fraction(ctx, at);
        base + (grams - base) * ((p_now - p_end) / (1.0 - p_end)).clamp(0.0, 1.0)
    }
}

fn entry_absorptions(
    entries: &[CarbEntry],
    ctx: &CarbContext<'_>,
) -> Result<Vec<EntryAbsorption>, LoopError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let isf = require(
            ctx.schedules.insulin_sensitivity(entry.start),
            SettingKind::SensitivitySchedule,
        )?;
        let cr = require(
            ctx.schedules.carb_ratio(entry.start),
            SettingKind::CarbRatioSchedule,
        )?;
        out.push(EntryAbsorption {
            entry: *entry,
            absorption_time: entry
                .absorption_time
                .unwrap_or(ctx.default_absorption_time)
                .min(ctx.max_absorption_time),
            csf: isf / cr,
            observed: Vec::new(),
        });
    }
    out.sort_by_key(|e| e.entry.start);

    let Some(velocities) = ctx.counteraction else {
        return Ok(out);
    };
    // Allocate observed absorption to entries in start order.
    let mut allocated: Vec<f64> = vec![0.0; out.len()];
    for v in velocities {
        let rise = v.total();
        if rise <= 0.0 {
            continue;
        }
        let isf = require(
            ctx.schedules.insulin_sensitivity(v.start),
            SettingKind::SensitivitySchedule,
        )?;
        let cr = require(ctx.schedules.carb_ratio(v.start), SettingKind::CarbRatioSchedule)?;
        let mut grams = rise * cr / isf;
        for (idx, ea) in out.iter_mut().enumerate() {
            if grams <= 0.0 {
                break;
            }
            if ea.entry.start >= v.end {
                continue;
            }
            let capacity = ea.entry.grams - allocated[idx];
            if capacity <= 0.0 {
                continue;
            }
            let take = grams.min(capacity);
            if ea.observed.is_empty() {
                ea.observed.push(GlucoseEffect::new(ea.entry.start.min(v.start), 0.0));
            }
            allocated[idx] += take;
            grams -= take;
            if let Some(last) = ea.observed.last_mut()
                && last.time == v.end
            {
                last.quantity = allocated[idx];
            } else {
                ea.observed.push(GlucoseEffect::new(v.end, allocated[idx]));
            }
        }
    }
    Ok(out)
}

/// Cumulative carb effect on the grid covering `[from, to]`.
pub fn carb_effects(
    entries: &[CarbEntry],
    ctx: &CarbContext<'_>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: TimeDelta,
) -> Result<Vec<GlucoseEffect>, LoopError> {
    let absorptions = entry_absorptions(entries, ctx)?;
    Ok(grid(from, to, delta)
        .into_iter()
        .map(|t| {
            let value: f64 = absorptions
                .iter()
                .map(|ea| ea.csf * ea.absorbed(ctx, t))
                .sum();
            GlucoseEffect::new(t, value)
        })
        .collect())
}

/// Grams not yet absorbed at `at`.
pub fn carbs_on_board(
    entries: &[CarbEntry],
    ctx: &CarbContext<'_>,
    at: DateTime<Utc>,
) -> Result<f64, LoopError> {
    let absorptions = entry_absorptions(entries, ctx)?;
    Ok(absorptions
        .iter()
        .filter(|ea| ea.entry.start <= at)
        .map(|ea| (ea.entry.grams - ea.absorbed(ctx, at)).max(0.0))
        .sum())
}

/// Minimum span of samples used for a momentum slope.
const MOMENTUM_MIN_SPAN: TimeDelta = TimeDelta::minutes(4);
const MOMENTUM_MIN_SAMPLES: usize = 3;

/// Least-squares trend over the trailing `window`, projected `duration` ahead.
///
/// Empty when fewer than three usable samples span at least four minutes,
/// when sources are mixed, or when any sample is a calibration.
pub fn momentum_effect(
    samples: &[GlucoseSample],
    window: TimeDelta,
    duration: TimeDelta,
    delta: TimeDelta,
) -> Vec<GlucoseEffect> {
    let Some(last) = samples.last() else {
        return Vec::new();
    };
    let recent: Vec<&GlucoseSample> = samples
        .iter()
        .filter(|s| s.time >= last.time - window)
        .collect();
    if recent.len() < MOMENTUM_MIN_SAMPLES {
        return Vec::new();
    }
    let first = recent[0];
    if last.time - first.time < MOMENTUM_MIN_SPAN
        || recent.iter().any(|s| s.is_calibration || s.provenance != last.provenance)
    {
        return Vec::new();
    }
    let Some(slope) = linear_slope(&recent, last.time) else {
        return Vec::new();
    };
    grid(last.time, last.time + duration, delta)
        .into_iter()
        .map(|t| GlucoseEffect::new(t, slope * minutes(t - last.time).max(0.0)))
        .collect()
}

/// mg/dL per minute, `None` when degenerate.
fn linear_slope(samples: &[&GlucoseSample], origin: DateTime<Utc>) -> Option<f64> {
    let n = samples.len() as f64;
    let xs: Vec<f64> = samples.iter().map(|s| minutes(s.time - origin)).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = samples.iter().map(|s| s.quantity).sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, s) in xs.iter().zip(samples) {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (s.quantity - mean_y);
    }
    if sxx <= 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = sxy / sxx;
    slope.is_finite().then_some(slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExponentialInsulinModel, LinearCarbModel};
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
            ..TherapySettings::default()
        }
    }

    #[test]
    fn bolus_effect_approaches_full_drop() {
        let s = settings();
        let model = ExponentialInsulinModel::rapid_acting_adult();
        let doses = [DoseEntry::bolus(t(0), 2.0)];
        let pulses = net_insulin_pulses(&doses, &s, t(0), TimeDelta::minutes(5)).unwrap();
        let fx = insulin_effects(&pulses, &model, t(0), t(400), TimeDelta::minutes(5));
        assert_eq!(fx[0].quantity, 0.0);
        let last = fx.last().unwrap().quantity;
        assert!((last + 100.0).abs() < 1e-9, "2 U x 50 mg/dL/U, got {last}");
        assert!(fx.windows(2).all(|w| w[1].quantity <= w[0].quantity + 1e-12));
    }

    #[test]
    fn temp_basal_at_schedule_has_no_effect_and_suspend_raises() {
        let s = settings();
        let model = ExponentialInsulinModel::rapid_acting_adult();
        let neutral = [DoseEntry::temp_basal(t(0), TimeDelta::minutes(30), 1.0)];
        let pulses = net_insulin_pulses(&neutral, &s, t(30), TimeDelta::minutes(5)).unwrap();
        assert!(pulses.is_empty());

        let suspend = [DoseEntry::suspend(t(0), t(60))];
        let pulses = net_insulin_pulses(&suspend, &s, t(60), TimeDelta::minutes(5)).unwrap();
        let total: f64 = pulses.iter().map(|p| p.units).sum();
        assert!((total + 1.0).abs() < 1e-12);
        let fx = insulin_effects(&pulses, &model, t(0), t(480), TimeDelta::minutes(5));
        assert!(fx.last().unwrap().quantity > 49.0);
    }

    #[test]
    fn rate_doses_are_truncated_at_delivery_time() {
        let s = settings();
        let doses = [DoseEntry::temp_basal(t(0), TimeDelta::minutes(30), 3.0)];
        let pulses = net_insulin_pulses(&doses, &s, t(10), TimeDelta::minutes(5)).unwrap();
        let total: f64 = pulses.iter().map(|p| p.units).sum();
        // (3 - 1) U/h for 10 minutes
        assert!((total - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn missing_basal_schedule_is_a_configuration_error() {
        let s = TherapySettings {
            basal: None,
            ..settings()
        };
        let doses = [DoseEntry::temp_basal(t(0), TimeDelta::minutes(30), 3.0)];
        let err = net_insulin_pulses(&doses, &s, t(30), TimeDelta::minutes(5)).unwrap_err();
        assert_eq!(err, LoopError::Configuration(SettingKind::BasalSchedule));
    }

    #[test]
    fn carb_effect_reaches_csf_times_grams() {
        let s = settings();
        let model = LinearCarbModel {
            delay: TimeDelta::zero(),
        };
        let ctx = CarbContext {
            schedules: &s,
            model: &model,
            default_absorption_time: TimeDelta::minutes(120),
            max_absorption_time: TimeDelta::minutes(480),
            counteraction: None,
        };
        let entries = [CarbEntry::new(t(0), 30.0)];
        let fx = carb_effects(&entries, &ctx, t(0), t(180), TimeDelta::minutes(5)).unwrap();
        assert!((fx.last().unwrap().quantity - 150.0).abs() < 1e-9);
        let cob = carbs_on_board(&entries, &ctx, t(60)).unwrap();
        assert!((cob - 15.0).abs() < 1e-9);
    }

    #[test]
    fn observed_counteraction_speeds_absorption() {
        let s = settings();
        let model = LinearCarbModel {
            delay: TimeDelta::zero(),
        };
        // 25 mg/dL rise over 10 minutes = 5 g at CSF 5
        let observed = [GlucoseVelocity {
            start: t(0),
            end: t(10),
            per_minute: 2.5,
        }];
        let entries = [CarbEntry::new(t(0), 30.0)];
        let model_only = CarbContext {
            schedules: &s,
            model: &model,
            default_absorption_time: TimeDelta::minutes(120),
            max_absorption_time: TimeDelta::minutes(480),
            counteraction: None,
        };
        let dynamic = CarbContext {
            counteraction: Some(&observed),
            ..model_only
        };
        let a = carbs_on_board(&entries, &model_only, t(10)).unwrap();
        let b = carbs_on_board(&entries, &dynamic, t(10)).unwrap();
        assert!((a - 27.5).abs() < 1e-9);
        assert!((b - 25.0).abs() < 1e-9);
        // All carbs are eventually absorbed either way
        let fx = carb_effects(&entries, &dynamic, t(0), t(200), TimeDelta::minutes(5)).unwrap();
        assert!((fx.last().unwrap().quantity - 150.0).abs() < 1e-9);
    }

    #[test]
    fn entry_absorption_is_capped() {
        let s = settings();
        let model = LinearCarbModel {
            delay: TimeDelta::zero(),
        };
        let ctx = CarbContext {
            schedules: &s,
            model: &model,
            default_absorption_time: TimeDelta::minutes(120),
            max_absorption_time: TimeDelta::minutes(240),
            counteraction: None,
        };
        let entries = [CarbEntry::new(t(0), 30.0).with_absorption(TimeDelta::minutes(600))];
        // Linear over the capped 240 minutes: half absorbed at 120
        let cob = carbs_on_board(&entries, &ctx, t(120)).unwrap();
        assert!((cob - 15.0).abs() < 1e-9);
    }

    #[test]
    fn momentum_requires_three_samples_from_one_source() {
        let d = TimeDelta::minutes(5);
        let rising: Vec<GlucoseSample> = (0..4)
            .map(|k| GlucoseSample::new(t(5 * k), 100.0 + 10.0 * k as f64, "cgm"))
            .collect();
        let fx = momentum_effect(&rising, TimeDelta::minutes(15), TimeDelta::minutes(30), d);
        let last = fx.last().unwrap();
        assert_eq!(last.time, t(45));
        assert!((last.quantity - 60.0).abs() < 1e-9);

        let fx = momentum_effect(&rising[2..], TimeDelta::minutes(15), TimeDelta::minutes(30), d);
        assert!(fx.is_empty());

        let mut mixed = rising.clone();
        mixed[2].provenance = "meter".into();
        assert!(momentum_effect(&mixed, TimeDelta::minutes(15), TimeDelta::minutes(30), d).is_empty());
    }
}
