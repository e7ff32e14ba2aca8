#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and history parsing for the glucose control loop.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - History CSV loaders (`history` module) enforce headers and time ordering.
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::Deserializer;

pub mod history;

/// Longest absorption or correction horizon accepted, in minutes.
const MAX_HORIZON_MIN: f64 = 24.0 * 60.0;

pub use history::{
    CarbRow, DoseKindCsv, DoseRow, GlucoseRow, load_carbs_csv, load_doses_csv, load_glucose_csv,
};

/// One step of a time-of-day schedule. `start_min` is minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleItem {
    pub start_min: u32,
    pub value: f64,
}

/// One step of a target range schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeItem {
    pub start_min: u32,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Therapy {
    /// Fixed offset of the user's local time from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Basal rates (U/h). Accepts either:
    /// - array of tables: [{ start = "00:00", value = 0.8 }, ...]
    /// - array of tuples: [["00:00", 0.8], ["06:00", 1.1], ...]
    #[serde(deserialize_with = "de_schedule")]
    pub basal_schedule: Option<Vec<ScheduleItem>>,
    /// Insulin sensitivity (mg/dL per U).
    #[serde(deserialize_with = "de_schedule")]
    pub sensitivity_schedule: Option<Vec<ScheduleItem>>,
    /// Carb ratio (g per U).
    #[serde(deserialize_with = "de_schedule")]
    pub carb_ratio_schedule: Option<Vec<ScheduleItem>>,
    /// Correction range (mg/dL). Tables `{ start, min, max }` or tuples `[start, min, max]`.
    #[serde(deserialize_with = "de_range_schedule")]
    pub target_schedule: Option<Vec<RangeItem>>,
    pub suspend_threshold: Option<f64>,
    pub max_basal_rate: Option<f64>,
    pub max_bolus: Option<f64>,
}

/// Temporary therapy override. Times are quoted RFC 3339 strings.
#[derive(Debug, Deserialize, Clone)]
pub struct OverrideCfg {
    #[serde(default)]
    pub name: Option<String>,
    pub start: DateTime<Utc>,
    /// Absent means the override stays active until removed.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_min: Option<f64>,
    #[serde(default)]
    pub target_max: Option<f64>,
    #[serde(default)]
    pub insulin_needs_scale_factor: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsulinModelKind {
    #[default]
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
    /// Polynomial curve; requires `action_duration_min` of 180, 240, 300 or 360.
    Walsh,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InsulinModelCfg {
    pub kind: InsulinModelKind,
    /// Overrides the preset's action duration.
    pub action_duration_min: Option<f64>,
    /// Overrides the preset's peak activity time (exponential kinds only).
    pub peak_min: Option<f64>,
    pub delay_min: f64,
}

impl Default for InsulinModelCfg {
    fn default() -> Self {
        Self {
            kind: InsulinModelKind::RapidActingAdult,
            action_duration_min: None,
            peak_min: None,
            delay_min: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CarbModelKind {
    #[default]
    Parabolic,
    Linear,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CarbsCfg {
    pub model: CarbModelKind,
    pub default_absorption_min: f64,
    /// Per-entry absorption times are capped here; also bounds the carb lookback.
    pub max_absorption_min: f64,
    pub delay_min: f64,
    /// Use observed counteraction to adjust absorption of logged carbs.
    pub dynamic_absorption: bool,
}

impl Default for CarbsCfg {
    fn default() -> Self {
        Self {
            model: CarbModelKind::Parabolic,
            default_absorption_min: 180.0,
            max_absorption_min: 480.0,
            delay_min: 10.0,
            dynamic_absorption: true,
        }
    }
}

/// Which retrospective correction law runs.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrospectiveMode {
    /// Proportional only, fixed effect duration.
    Standard,
    #[default]
    Integral,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrospectiveCfg {
    pub enabled: bool,
    pub mode: RetrospectiveMode,
    pub current_gain: f64,
    /// Must be >= current_gain.
    pub persistent_gain: f64,
    pub time_constant_min: f64,
    pub differential_gain: f64,
    pub sample_interval_min: f64,
    pub grouping_interval_min: f64,
    pub effect_duration_floor_min: f64,
    pub effect_duration_increment_min: f64,
    pub max_effect_duration_min: f64,
    pub min_samples: usize,
    pub min_lookback_min: f64,
    pub carb_effect_limit_grams: f64,
    pub suspend_margin: f64,
}

impl Default for RetrospectiveCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RetrospectiveMode::Integral,
            current_gain: 1.0,
            persistent_gain: 5.0,
            time_constant_min: 90.0,
            differential_gain: 0.0,
            sample_interval_min: 5.0,
            grouping_interval_min: 30.0,
            effect_duration_floor_min: 60.0,
            effect_duration_increment_min: 10.0,
            max_effect_duration_min: 180.0,
            min_samples: 3,
            min_lookback_min: 1.0,
            carb_effect_limit_grams: 10.0,
            suspend_margin: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DosingCfg {
    pub basal_rate_increments_per_unit: f64,
    pub bolus_increments_per_unit: f64,
    pub temp_basal_duration_min: f64,
    /// When false, any predicted dip below range lowers the temp basal even if
    /// the eventual glucose recovers above the range floor.
    pub predictive_temp_below_range: bool,
    /// A running temp basal with more than this much time left is left alone
    /// when the new rate matches it.
    pub active_temp_remaining_threshold_min: f64,
    /// Glucose and pump status older than this block dosing.
    pub recency_interval_min: f64,
    /// Recommendations older than this must not be enacted.
    pub recommendation_ttl_min: f64,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            basal_rate_increments_per_unit: 40.0,
            bolus_increments_per_unit: 40.0,
            temp_basal_duration_min: 30.0,
            predictive_temp_below_range: true,
            active_temp_remaining_threshold_min: 11.0,
            recency_interval_min: 15.0,
            recommendation_ttl_min: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Upper bound for each history fetch (ms). Also accepts alias "history_ms".
    #[serde(alias = "history_ms")]
    pub fetch_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { fetch_ms: 2000 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub therapy: Therapy,
    #[serde(default)]
    pub overrides: Vec<OverrideCfg>,
    /// Absent means no insulin model is configured; cycles then fail with a configuration error.
    #[serde(default)]
    pub insulin_model: Option<InsulinModelCfg>,
    #[serde(default)]
    pub carbs: CarbsCfg,
    #[serde(default)]
    pub retrospective: RetrospectiveCfg,
    #[serde(default)]
    pub dosing: DosingCfg,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Parse `"HH:MM"` into minutes after midnight.
pub fn parse_time_of_day(s: &str) -> Result<u32, String> {
    let (h, m) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("time of day must be HH:MM, got {s:?}"))?;
    let h: u32 = h
        .parse()
        .map_err(|_| format!("invalid hour in {s:?}"))?;
    let m: u32 = m
        .parse()
        .map_err(|_| format!("invalid minute in {s:?}"))?;
    if h > 23 || m > 59 {
        return Err(format!("time of day out of range: {s:?}"));
    }
    Ok(h * 60 + m)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScheduleItemToml {
    Tuple((String, f64)),
    Table { start: String, value: f64 },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RangeItemToml {
    Tuple((String, f64, f64)),
    Table { start: String, min: f64, max: f64 },
}

fn de_schedule<'de, D>(deserializer: D) -> Result<Option<Vec<ScheduleItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<ScheduleItemToml>> = Option::deserialize(deserializer)?;
    let Some(items) = opt else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let (start, value) = match item {
            ScheduleItemToml::Tuple((start, value)) => (start, value),
            ScheduleItemToml::Table { start, value } => (start, value),
        };
        let start_min = parse_time_of_day(&start).map_err(serde::de::Error::custom)?;
        out.push(ScheduleItem { start_min, value });
    }
    Ok(Some(out))
}

fn de_range_schedule<'de, D>(deserializer: D) -> Result<Option<Vec<RangeItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<RangeItemToml>> = Option::deserialize(deserializer)?;
    let Some(items) = opt else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let (start, min, max) = match item {
            RangeItemToml::Tuple((start, min, max)) => (start, min, max),
            RangeItemToml::Table { start, min, max } => (start, min, max),
        };
        let start_min = parse_time_of_day(&start).map_err(serde::de::Error::custom)?;
        out.push(RangeItem {
            start_min,
            min,
            max,
        });
    }
    Ok(Some(out))
}

fn validate_schedule(name: &str, items: &[ScheduleItem]) -> eyre::Result<()> {
    let Some(first) = items.first() else {
        eyre::bail!("therapy.{name} must not be empty");
    };
    if first.start_min != 0 {
        eyre::bail!("therapy.{name} must start at 00:00");
    }
    for w in items.windows(2) {
        if w[1].start_min <= w[0].start_min {
            eyre::bail!("therapy.{name} start times must be strictly increasing");
        }
    }
    for it in items {
        if !it.value.is_finite() {
            eyre::bail!("therapy.{name} values must be finite");
        }
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let t = &self.therapy;

        // Therapy
        if !(-14 * 60..=14 * 60).contains(&t.utc_offset_minutes) {
            eyre::bail!("therapy.utc_offset_minutes must be within +/-14h");
        }
        if let Some(items) = &t.basal_schedule {
            validate_schedule("basal_schedule", items)?;
            if items.iter().any(|i| i.value < 0.0) {
                eyre::bail!("therapy.basal_schedule rates must be >= 0");
            }
        }
        if let Some(items) = &t.sensitivity_schedule {
            validate_schedule("sensitivity_schedule", items)?;
            if items.iter().any(|i| i.value <= 0.0) {
                eyre::bail!("therapy.sensitivity_schedule values must be > 0");
            }
        }
        if let Some(items) = &t.carb_ratio_schedule {
            validate_schedule("carb_ratio_schedule", items)?;
            if items.iter().any(|i| i.value <= 0.0) {
                eyre::bail!("therapy.carb_ratio_schedule values must be > 0");
            }
        }
        if let Some(items) = &t.target_schedule {
            let as_steps: Vec<ScheduleItem> = items
                .iter()
                .map(|r| ScheduleItem {
                    start_min: r.start_min,
                    value: r.min,
                })
                .collect();
            validate_schedule("target_schedule", &as_steps)?;
            if items.iter().any(|r| !(r.min > 0.0 && r.min <= r.max)) {
                eyre::bail!("therapy.target_schedule ranges must satisfy 0 < min <= max");
            }
        }
        if let Some(v) = t.suspend_threshold
            && !(v > 0.0 && v.is_finite())
        {
            eyre::bail!("therapy.suspend_threshold must be > 0");
        }
        if let Some(v) = t.max_basal_rate
            && !(v >= 0.0 && v.is_finite())
        {
            eyre::bail!("therapy.max_basal_rate must be >= 0");
        }
        if let Some(v) = t.max_bolus
            && !(v >= 0.0 && v.is_finite())
        {
            eyre::bail!("therapy.max_bolus must be >= 0");
        }

        // Overrides
        for (idx, o) in self.overrides.iter().enumerate() {
            if let Some(end) = o.end
                && end <= o.start
            {
                eyre::bail!("overrides[{idx}].end must be after start");
            }
            if let Some(f) = o.insulin_needs_scale_factor
                && !(f > 0.0 && f.is_finite())
            {
                eyre::bail!("overrides[{idx}].insulin_needs_scale_factor must be > 0");
            }
            match (o.target_min, o.target_max) {
                (Some(min), Some(max)) if !(min > 0.0 && min <= max) => {
                    eyre::bail!("overrides[{idx}] target must satisfy 0 < target_min <= target_max");
                }
                (Some(_), None) | (None, Some(_)) => {
                    eyre::bail!("overrides[{idx}] target_min and target_max must be set together");
                }
                _ => {}
            }
        }

        // Insulin model
        if let Some(m) = &self.insulin_model {
            if m.delay_min < 0.0 {
                eyre::bail!("insulin_model.delay_min must be >= 0");
            }
            if let Some(d) = m.action_duration_min
                && d <= 0.0
            {
                eyre::bail!("insulin_model.action_duration_min must be > 0");
            }
            if let Some(p) = m.peak_min {
                let duration = m.action_duration_min.unwrap_or(360.0);
                if !(p > 0.0 && p < duration / 2.0) {
                    eyre::bail!("insulin_model.peak_min must be in (0, action_duration_min / 2)");
                }
            }
            if m.kind == InsulinModelKind::Walsh {
                let d = m.action_duration_min.unwrap_or(360.0);
                if ![180.0, 240.0, 300.0, 360.0].contains(&d) {
                    eyre::bail!("insulin_model.action_duration_min must be 180, 240, 300 or 360 for walsh");
                }
            }
        }

        // Carbs
        if self.carbs.default_absorption_min <= 0.0 {
            eyre::bail!("carbs.default_absorption_min must be > 0");
        }
        if self.carbs.max_absorption_min < self.carbs.default_absorption_min {
            eyre::bail!("carbs.max_absorption_min must be >= default_absorption_min");
        }
        if self.carbs.max_absorption_min > MAX_HORIZON_MIN {
            eyre::bail!("carbs.max_absorption_min must be <= 1440");
        }
        if self.carbs.delay_min < 0.0 {
            eyre::bail!("carbs.delay_min must be >= 0");
        }

        // Retrospective correction
        let r = &self.retrospective;
        if r.current_gain < 0.0 {
            eyre::bail!("retrospective.current_gain must be >= 0");
        }
        if r.persistent_gain < r.current_gain {
            eyre::bail!("retrospective.persistent_gain must be >= current_gain");
        }
        if r.time_constant_min <= 0.0 {
            eyre::bail!("retrospective.time_constant_min must be > 0");
        }
        if r.differential_gain < 0.0 {
            eyre::bail!("retrospective.differential_gain must be >= 0");
        }
        if r.sample_interval_min <= 0.0 {
            eyre::bail!("retrospective.sample_interval_min must be > 0");
        }
        if r.grouping_interval_min <= 0.0 {
            eyre::bail!("retrospective.grouping_interval_min must be > 0");
        }
        if r.effect_duration_floor_min <= 0.0 {
            eyre::bail!("retrospective.effect_duration_floor_min must be > 0");
        }
        if r.effect_duration_increment_min < 0.0 {
            eyre::bail!("retrospective.effect_duration_increment_min must be >= 0");
        }
        if r.max_effect_duration_min < r.effect_duration_floor_min {
            eyre::bail!("retrospective.max_effect_duration_min must be >= effect_duration_floor_min");
        }
        if r.max_effect_duration_min > MAX_HORIZON_MIN {
            eyre::bail!("retrospective.max_effect_duration_min must be <= 1440");
        }
        if r.min_samples < 2 {
            eyre::bail!("retrospective.min_samples must be >= 2");
        }
        if r.carb_effect_limit_grams < 0.0 {
            eyre::bail!("retrospective.carb_effect_limit_grams must be >= 0");
        }
        if r.suspend_margin < 0.0 {
            eyre::bail!("retrospective.suspend_margin must be >= 0");
        }

        // Dosing
        let d = &self.dosing;
        if d.basal_rate_increments_per_unit <= 0.0 {
            eyre::bail!("dosing.basal_rate_increments_per_unit must be > 0");
        }
        if d.bolus_increments_per_unit <= 0.0 {
            eyre::bail!("dosing.bolus_increments_per_unit must be > 0");
        }
        if d.temp_basal_duration_min <= 0.0 {
            eyre::bail!("dosing.temp_basal_duration_min must be > 0");
        }
        if d.active_temp_remaining_threshold_min < 0.0 {
            eyre::bail!("dosing.active_temp_remaining_threshold_min must be >= 0");
        }
        if d.recency_interval_min <= 0.0 {
            eyre::bail!("dosing.recency_interval_min must be > 0");
        }
        if d.recommendation_ttl_min <= 0.0 {
            eyre::bail!("dosing.recommendation_ttl_min must be > 0");
        }

        // Timeouts
        if self.timeouts.fetch_ms == 0 {
            eyre::bail!("timeouts.fetch_ms must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_of_day() {
        assert_eq!(parse_time_of_day("00:00"), Ok(0));
        assert_eq!(parse_time_of_day("06:30"), Ok(390));
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("6h").is_err());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_toml("").unwrap();
        assert!(cfg.therapy.basal_schedule.is_none());
        assert!(cfg.insulin_model.is_none());
        assert_eq!(cfg.dosing.temp_basal_duration_min, 30.0);
        assert_eq!(cfg.retrospective.max_effect_duration_min, 180.0);
        cfg.validate().unwrap();
    }
}
