//! Time-of-day schedules, temporary overrides, and the `TherapySettings` provider.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::{GlucoseRange, ScheduleProvider};

use crate::error::{BuildError, LoopError, SettingKind};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;
const MAX_UTC_OFFSET_SECS: i32 = 14 * 60 * 60;

/// Piecewise-constant daily schedule evaluated in a fixed UTC offset.
///
/// Items are `(seconds after local midnight, value)`; the first starts at midnight
/// and start times strictly increase.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySchedule<T> {
    items: Vec<(u32, T)>,
    offset_secs: i32,
}

impl<T: Copy> DailySchedule<T> {
    /// Build from `(minutes after midnight, value)` pairs.
    pub fn new(items: Vec<(u32, T)>, utc_offset_minutes: i32) -> Result<Self, BuildError> {
        let offset_secs = utc_offset_minutes.saturating_mul(60);
        if offset_secs.abs() > MAX_UTC_OFFSET_SECS {
            return Err(BuildError::InvalidSchedule("utc offset out of range"));
        }
        let items: Vec<(u32, T)> = items
            .into_iter()
            .map(|(m, v)| (m.saturating_mul(60), v))
            .collect();
        match items.first() {
            None => return Err(BuildError::InvalidSchedule("schedule is empty")),
            Some((0, _)) => {}
            Some(_) => return Err(BuildError::InvalidSchedule("schedule must start at midnight")),
        }
        if items.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(BuildError::InvalidSchedule(
                "schedule start times must be strictly increasing",
            ));
        }
        if items.iter().any(|(s, _)| *s >= SECONDS_PER_DAY) {
            return Err(BuildError::InvalidSchedule("schedule item starts after midnight"));
        }
        Ok(Self { items, offset_secs })
    }

    /// Single value for the whole day, in UTC.
    pub fn constant(value: T) -> Self {
        Self {
            items: vec![(0, value)],
            offset_secs: 0,
        }
    }

    pub fn value_at(&self, at: DateTime<Utc>) -> T {
        let local = at.timestamp() + i64::from(self.offset_secs);
        let secs = local.rem_euclid(i64::from(SECONDS_PER_DAY)) as u32;
        let idx = self.items.partition_point(|(start, _)| *start <= secs);
        // items[0] starts at midnight, so idx >= 1
        self.items[idx.saturating_sub(1)].1
    }

    pub fn items(&self) -> impl Iterator<Item = (TimeDelta, T)> + '_ {
        self.items
            .iter()
            .map(|(s, v)| (TimeDelta::seconds(i64::from(*s)), *v))
    }
}

/// Temporary adjustment of targets and insulin needs.
///
/// While active, basal rates are multiplied by `insulin_needs_scale_factor`
/// and sensitivity and carb ratio are divided by it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporaryOverride {
    pub name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub target_range: Option<GlucoseRange>,
    pub insulin_needs_scale_factor: Option<f64>,
}

impl TemporaryOverride {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && self.end.is_none_or(|end| at < end)
    }

    fn scale(&self) -> f64 {
        self.insulin_needs_scale_factor.unwrap_or(1.0)
    }
}

/// Therapy settings backed by daily schedules.
#[derive(Debug, Clone, Default)]
pub struct TherapySettings {
    pub basal: Option<DailySchedule<f64>>,
    pub sensitivity: Option<DailySchedule<f64>>,
    pub carb_ratio: Option<DailySchedule<f64>>,
    pub target: Option<DailySchedule<GlucoseRange>>,
    pub overrides: Vec<TemporaryOverride>,
    pub suspend_threshold: Option<f64>,
    pub max_basal_rate: Option<f64>,
    pub max_bolus: Option<f64>,
}

impl TherapySettings {
    /// The most recently started override active at `at`.
    pub fn active_override(&self, at: DateTime<Utc>) -> Option<&TemporaryOverride> {
        self.overrides
            .iter()
            .filter(|o| o.is_active_at(at))
            .max_by_key(|o| o.start)
    }

    fn scale_at(&self, at: DateTime<Utc>) -> f64 {
        self.active_override(at).map_or(1.0, TemporaryOverride::scale)
    }
}

impl ScheduleProvider for TherapySettings {
    fn basal_rate(&self, at: DateTime<Utc>) -> Option<f64> {
        self.basal.as_ref().map(|s| s.value_at(at) * self.scale_at(at))
    }

    fn insulin_sensitivity(&self, at: DateTime<Utc>) -> Option<f64> {
        self.sensitivity
            .as_ref()
            .map(|s| s.value_at(at) / self.scale_at(at))
    }

    fn carb_ratio(&self, at: DateTime<Utc>) -> Option<f64> {
        self.carb_ratio
            .as_ref()
            .map(|s| s.value_at(at) / self.scale_at(at))
    }

    fn target_range(&self, at: DateTime<Utc>) -> Option<GlucoseRange> {
        self.active_override(at)
            .and_then(|o| o.target_range)
            .or_else(|| self.target.as_ref().map(|s| s.value_at(at)))
    }

    fn suspend_threshold(&self) -> Option<f64> {
        self.suspend_threshold
    }

    fn max_basal_rate(&self) -> Option<f64> {
        self.max_basal_rate
    }

    fn max_bolus(&self) -> Option<f64> {
        self.max_bolus
    }
}

/// Turn an unset schedule into a configuration error.
pub(crate) fn require<T>(value: Option<T>, kind: SettingKind) -> Result<T, LoopError> {
    value.ok_or(LoopError::Configuration(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).single().unwrap()
    }

    #[test]
    fn value_at_respects_boundaries() {
        let s = DailySchedule::new(vec![(0, 0.8), (6 * 60, 1.2), (22 * 60, 0.9)], 0).unwrap();
        assert_eq!(s.value_at(at(5, 59)), 0.8);
        assert_eq!(s.value_at(at(6, 0)), 1.2);
        assert_eq!(s.value_at(at(23, 30)), 0.9);
    }

    #[test]
    fn value_at_uses_local_offset() {
        // UTC+2: 05:00 UTC is 07:00 local
        let s = DailySchedule::new(vec![(0, 0.8), (6 * 60, 1.2)], 120).unwrap();
        assert_eq!(s.value_at(at(5, 0)), 1.2);
        assert_eq!(s.value_at(at(3, 0)), 0.8);
    }

    #[test]
    fn rejects_malformed_tables() {
        assert!(DailySchedule::<f64>::new(vec![], 0).is_err());
        assert!(DailySchedule::new(vec![(30, 1.0)], 0).is_err());
        assert!(DailySchedule::new(vec![(0, 1.0), (0, 2.0)], 0).is_err());
        assert!(DailySchedule::new(vec![(0, 1.0)], 20 * 60).is_err());
    }

    #[test]
    fn override_scales_and_replaces_target() {
        let settings = TherapySettings {
            basal: Some(DailySchedule::constant(1.0)),
            sensitivity: Some(DailySchedule::constant(50.0)),
            carb_ratio: Some(DailySchedule::constant(10.0)),
            target: Some(DailySchedule::constant(GlucoseRange::new(100.0, 120.0))),
            overrides: vec![TemporaryOverride {
                name: Some("workout".into()),
                start: at(16, 0),
                end: Some(at(17, 0)),
                target_range: Some(GlucoseRange::new(140.0, 160.0)),
                insulin_needs_scale_factor: Some(0.5),
            }],
            ..TherapySettings::default()
        };
        assert_eq!(settings.basal_rate(at(16, 30)), Some(0.5));
        assert_eq!(settings.insulin_sensitivity(at(16, 30)), Some(100.0));
        assert_eq!(settings.carb_ratio(at(16, 30)), Some(20.0));
        assert_eq!(
            settings.target_range(at(16, 30)),
            Some(GlucoseRange::new(140.0, 160.0))
        );
        // Outside the window the schedule applies unchanged
        assert_eq!(settings.basal_rate(at(17, 0)), Some(1.0));
        assert_eq!(
            settings.target_range(at(15, 59)),
            Some(GlucoseRange::new(100.0, 120.0))
        );
    }
}
