//! Mapping from `glucoloop_config` types to `glucoloop_core` types.
//!
//! Plain settings use `From`; anything that can fail validation goes through
//! a function returning `BuildError`.

use glucoloop_config::history::{CarbRow, DoseKindCsv, DoseRow, GlucoseRow};
use glucoloop_config::{CarbModelKind, InsulinModelKind, ScheduleItem};
use glucoloop_traits::sample::from_minutes;
use glucoloop_traits::{
    CarbAbsorptionModel, CarbEntry, DoseEntry, DoseKind, GlucoseRange, GlucoseSample, InsulinModel,
};
use std::time::Duration;

use crate::config::{DosingCfg, EffectCfg, RetrospectiveCfg, RetrospectiveMode, Timeouts};
use crate::error::BuildError;
use crate::models::{ExponentialInsulinModel, LinearCarbModel, ParabolicCarbModel, WalshInsulinModel};
use crate::schedule::{DailySchedule, TemporaryOverride, TherapySettings};

// ── EffectCfg ────────────────────────────────────────────────────────────────

impl From<&glucoloop_config::CarbsCfg> for EffectCfg {
    fn from(c: &glucoloop_config::CarbsCfg) -> Self {
        Self {
            default_absorption_time: from_minutes(c.default_absorption_min),
            max_absorption_time: from_minutes(c.max_absorption_min),
            dynamic_carb_absorption: c.dynamic_absorption,
            ..Self::default()
        }
    }
}

// ── RetrospectiveCfg ─────────────────────────────────────────────────────────

impl From<&glucoloop_config::RetrospectiveCfg> for RetrospectiveCfg {
    fn from(c: &glucoloop_config::RetrospectiveCfg) -> Self {
        Self {
            enabled: c.enabled,
            mode: match c.mode {
                glucoloop_config::RetrospectiveMode::Standard => RetrospectiveMode::Standard,
                glucoloop_config::RetrospectiveMode::Integral => RetrospectiveMode::Integral,
            },
            current_gain: c.current_gain,
            persistent_gain: c.persistent_gain,
            time_constant: from_minutes(c.time_constant_min),
            differential_gain: c.differential_gain,
            sample_interval: from_minutes(c.sample_interval_min),
            grouping_interval: from_minutes(c.grouping_interval_min),
            effect_duration_floor: from_minutes(c.effect_duration_floor_min),
            effect_duration_increment: from_minutes(c.effect_duration_increment_min),
            max_effect_duration: from_minutes(c.max_effect_duration_min),
            min_samples: c.min_samples,
            min_lookback: from_minutes(c.min_lookback_min),
            carb_effect_limit_grams: c.carb_effect_limit_grams,
            suspend_margin: c.suspend_margin,
        }
    }
}

// ── DosingCfg ────────────────────────────────────────────────────────────────

impl From<&glucoloop_config::DosingCfg> for DosingCfg {
    fn from(c: &glucoloop_config::DosingCfg) -> Self {
        Self {
            basal_rate_increments_per_unit: c.basal_rate_increments_per_unit,
            bolus_increments_per_unit: c.bolus_increments_per_unit,
            temp_basal_duration: from_minutes(c.temp_basal_duration_min),
            predictive_temp_below_range: c.predictive_temp_below_range,
            active_temp_remaining_threshold: from_minutes(c.active_temp_remaining_threshold_min),
            recency_interval: from_minutes(c.recency_interval_min),
            recommendation_ttl: from_minutes(c.recommendation_ttl_min),
        }
    }
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

impl From<&glucoloop_config::Timeouts> for Timeouts {
    fn from(c: &glucoloop_config::Timeouts) -> Self {
        Self {
            fetch: Duration::from_millis(c.fetch_ms),
        }
    }
}

// ── TherapySettings ──────────────────────────────────────────────────────────

fn scalar_schedule(
    items: Option<&Vec<ScheduleItem>>,
    offset: i32,
) -> Result<Option<DailySchedule<f64>>, BuildError> {
    items
        .map(|v| DailySchedule::new(v.iter().map(|i| (i.start_min, i.value)).collect(), offset))
        .transpose()
}

impl TryFrom<&glucoloop_config::Config> for TherapySettings {
    type Error = BuildError;

    fn try_from(c: &glucoloop_config::Config) -> Result<Self, Self::Error> {
        let t = &c.therapy;
        let offset = t.utc_offset_minutes;
        let target = t
            .target_schedule
            .as_ref()
            .map(|v| {
                DailySchedule::new(
                    v.iter()
                        .map(|i| (i.start_min, GlucoseRange::new(i.min, i.max)))
                        .collect(),
                    offset,
                )
            })
            .transpose()?;
        let overrides = c
            .overrides
            .iter()
            .map(|o| TemporaryOverride {
                name: o.name.clone(),
                start: o.start,
                end: o.end,
                target_range: o
                    .target_min
                    .zip(o.target_max)
                    .map(|(min, max)| GlucoseRange::new(min, max)),
                insulin_needs_scale_factor: o.insulin_needs_scale_factor,
            })
            .collect();
        Ok(Self {
            basal: scalar_schedule(t.basal_schedule.as_ref(), offset)?,
            sensitivity: scalar_schedule(t.sensitivity_schedule.as_ref(), offset)?,
            carb_ratio: scalar_schedule(t.carb_ratio_schedule.as_ref(), offset)?,
            target,
            overrides,
            suspend_threshold: t.suspend_threshold,
            max_basal_rate: t.max_basal_rate,
            max_bolus: t.max_bolus,
        })
    }
}

// ── Models ───────────────────────────────────────────────────────────────────

/// Build the configured insulin model; `None` when the section is absent.
pub fn insulin_model_from(
    cfg: Option<&glucoloop_config::InsulinModelCfg>,
) -> Result<Option<Box<dyn InsulinModel + Send + Sync>>, BuildError> {
    let Some(c) = cfg else {
        return Ok(None);
    };
    let delay = from_minutes(c.delay_min);
    let (duration, peak) = match c.kind {
        InsulinModelKind::RapidActingAdult => (360.0, 75.0),
        InsulinModelKind::RapidActingChild => (360.0, 65.0),
        InsulinModelKind::Fiasp => (360.0, 55.0),
        InsulinModelKind::Walsh => {
            let d = c.action_duration_min.unwrap_or(360.0);
            let model = WalshInsulinModel::new(from_minutes(d), delay)?;
            return Ok(Some(Box::new(model)));
        }
    };
    let model = ExponentialInsulinModel::new(
        c.action_duration_min.unwrap_or(duration),
        c.peak_min.unwrap_or(peak),
        delay,
    )?;
    Ok(Some(Box::new(model)))
}

pub fn carb_model_from(cfg: &glucoloop_config::CarbsCfg) -> Box<dyn CarbAbsorptionModel + Send + Sync> {
    let delay = from_minutes(cfg.delay_min);
    match cfg.model {
        CarbModelKind::Parabolic => Box::new(ParabolicCarbModel { delay }),
        CarbModelKind::Linear => Box::new(LinearCarbModel { delay }),
    }
}

// ── History rows ─────────────────────────────────────────────────────────────

pub fn glucose_from_rows(rows: &[GlucoseRow]) -> Vec<GlucoseSample> {
    rows.iter()
        .map(|r| GlucoseSample::new(r.time, r.mg_dl, r.source.clone().unwrap_or_else(|| "csv".into())))
        .collect()
}

pub fn doses_from_rows(rows: &[DoseRow]) -> Vec<DoseEntry> {
    rows.iter()
        .map(|r| DoseEntry {
            kind: match r.kind {
                DoseKindCsv::Basal => DoseKind::Basal,
                DoseKindCsv::TempBasal => DoseKind::TempBasal,
                DoseKindCsv::Bolus => DoseKind::Bolus,
                DoseKindCsv::Suspend => DoseKind::Suspend,
                DoseKindCsv::Resume => DoseKind::Resume,
            },
            start: r.start,
            end: r.end.unwrap_or(r.start),
            value: r.value,
        })
        .collect()
}

pub fn carbs_from_rows(rows: &[CarbRow]) -> Vec<CarbEntry> {
    rows.iter()
        .map(|r| {
            let entry = CarbEntry::new(r.time, r.grams);
            match r.absorption_min {
                Some(m) => entry.with_absorption(from_minutes(m)),
                None => entry,
            }
        })
        .collect()
}
