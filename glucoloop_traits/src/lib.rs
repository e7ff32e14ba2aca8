pub mod clock;
pub mod sample;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sample::{
    CarbEntry, DoseEntry, DoseKind, GlucoseEffect, GlucoseRange, GlucoseSample, GlucoseVelocity,
    TimeRange,
};

use chrono::{DateTime, TimeDelta, Utc};

/// Error type returned by history providers; mapped to `EffectUnavailable` by the core.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Glucose history, ordered by time.
pub trait GlucoseHistory {
    fn glucose_samples(&self, range: TimeRange) -> Result<Vec<GlucoseSample>, ProviderError>;
}

/// Insulin dose history, ordered by start time.
pub trait DoseHistory {
    fn dose_history(&self, range: TimeRange) -> Result<Vec<DoseEntry>, ProviderError>;

    /// Instant of the last successful pump status report, if any.
    fn pump_status_date(&self) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(None)
    }
}

/// Carbohydrate history, ordered by start time.
pub trait CarbHistory {
    fn carb_history(&self, range: TimeRange) -> Result<Vec<CarbEntry>, ProviderError>;
}

/// Read-only, time-indexed therapy settings.
///
/// `None` means the schedule is not configured.
pub trait ScheduleProvider {
    fn basal_rate(&self, at: DateTime<Utc>) -> Option<f64>;
    fn insulin_sensitivity(&self, at: DateTime<Utc>) -> Option<f64>;
    fn carb_ratio(&self, at: DateTime<Utc>) -> Option<f64>;
    fn target_range(&self, at: DateTime<Utc>) -> Option<GlucoseRange>;
    fn suspend_threshold(&self) -> Option<f64>;
    fn max_basal_rate(&self) -> Option<f64>;
    fn max_bolus(&self) -> Option<f64>;
}

/// Insulin activity curve: fraction of a dose's glucose effect still to come.
pub trait InsulinModel {
    /// Fraction in `[0, 1]` of the effect remaining `elapsed` after delivery (delay already removed).
    fn percent_effect_remaining(&self, elapsed: TimeDelta) -> f64;

    /// Total activity duration; the effect is complete afterwards.
    fn effect_duration(&self) -> TimeDelta;

    /// Delay between delivery and onset.
    fn delay(&self) -> TimeDelta {
        TimeDelta::minutes(10)
    }
}

/// Carbohydrate absorption curve.
pub trait CarbAbsorptionModel {
    /// Fraction in `[0, 1]` of an entry absorbed `elapsed` after the (delayed) start.
    fn percent_absorbed(&self, elapsed: TimeDelta, absorption_time: TimeDelta) -> f64;

    /// Delay between eating and onset of absorption.
    fn delay(&self) -> TimeDelta {
        TimeDelta::minutes(10)
    }
}
