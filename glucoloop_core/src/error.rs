//! Typed errors for the control loop and session construction.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Inputs whose absence aborts a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Glucose,
    InsulinEffect,
    CarbEffect,
    MomentumEffect,
    Reservoir,
}

/// Inputs whose age is checked against the recency interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaleKind {
    Glucose,
    PumpStatus,
}

/// Therapy settings the loop cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKind {
    BasalSchedule,
    SensitivitySchedule,
    CarbRatioSchedule,
    TargetRangeSchedule,
    InsulinModel,
    MaxBasalRate,
    MaxBolus,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoopError {
    #[error("missing data: {0:?}")]
    MissingData(DataKind),
    #[error("stale data: {kind:?} is {} min old", age.num_minutes())]
    StaleData { kind: StaleKind, age: TimeDelta },
    #[error("configuration error: missing {0:?}")]
    Configuration(SettingKind),
    #[error("recommendation computed at {computed_at} has expired")]
    RecommendationExpired { computed_at: DateTime<Utc> },
    #[error("effect unavailable: {0}")]
    EffectUnavailable(String),
}

impl LoopError {
    /// Stable machine-readable name of the error kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MissingData(_) => "MissingData",
            Self::StaleData { .. } => "StaleData",
            Self::Configuration(_) => "Configuration",
            Self::RecommendationExpired { .. } => "RecommendationExpired",
            Self::EffectUnavailable(_) => "EffectUnavailable",
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing glucose history provider")]
    MissingGlucoseHistory,
    #[error("missing dose history provider")]
    MissingDoseHistory,
    #[error("missing carb history provider")]
    MissingCarbHistory,
    #[error("missing therapy settings")]
    MissingSettings,
    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
