//! Value types shared between history providers and the loop core.
//!
//! Units: glucose in mg/dL, insulin in units (U), rates in U/h, carbs in grams.

use chrono::{DateTime, TimeDelta, Utc};

/// Closed instant range `[start, end]` used to scope history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whether the interval `[start, end]` overlaps this range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.end && end >= self.start
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// A single glucose reading.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseSample {
    pub time: DateTime<Utc>,
    pub quantity: f64,
    /// Source identifier (sensor serial, "fingerstick", ...).
    pub provenance: String,
    /// Calibration readings are excluded from trend estimation.
    pub is_calibration: bool,
}

impl GlucoseSample {
    pub fn new(time: DateTime<Utc>, quantity: f64, provenance: impl Into<String>) -> Self {
        Self {
            time,
            quantity,
            provenance: provenance.into(),
            is_calibration: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoseKind {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

/// A delivered (or programmed) insulin dose.
///
/// `value` is units for `Bolus`, U/h for `Basal`/`TempBasal`, and ignored for
/// `Suspend`/`Resume`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoseEntry {
    pub kind: DoseKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
}

impl DoseEntry {
    pub fn bolus(at: DateTime<Utc>, units: f64) -> Self {
        Self {
            kind: DoseKind::Bolus,
            start: at,
            end: at,
            value: units,
        }
    }

    pub fn temp_basal(start: DateTime<Utc>, duration: TimeDelta, rate: f64) -> Self {
        Self {
            kind: DoseKind::TempBasal,
            start,
            end: start + duration,
            value: rate,
        }
    }

    pub fn suspend(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            kind: DoseKind::Suspend,
            start,
            end,
            value: 0.0,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whether this is a rate-based dose still running at `at`.
    pub fn is_active_rate_at(&self, at: DateTime<Utc>) -> bool {
        matches!(self.kind, DoseKind::TempBasal | DoseKind::Suspend) && self.start <= at && self.end > at
    }
}

/// A logged carbohydrate entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbEntry {
    pub start: DateTime<Utc>,
    pub grams: f64,
    /// Expected absorption time; `None` uses the configured default.
    pub absorption_time: Option<TimeDelta>,
}

impl CarbEntry {
    pub fn new(start: DateTime<Utc>, grams: f64) -> Self {
        Self {
            start,
            grams,
            absorption_time: None,
        }
    }

    pub fn with_absorption(mut self, absorption_time: TimeDelta) -> Self {
        self.absorption_time = Some(absorption_time);
        self
    }
}

/// One point of a cumulative glucose-effect timeline (mg/dL).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseEffect {
    pub time: DateTime<Utc>,
    pub quantity: f64,
}

impl GlucoseEffect {
    pub fn new(time: DateTime<Utc>, quantity: f64) -> Self {
        Self { time, quantity }
    }
}

/// Interval-valued glucose rate of change (mg/dL/min). `end > start`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseVelocity {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub per_minute: f64,
}

impl GlucoseVelocity {
    pub fn minutes(&self) -> f64 {
        minutes(self.end - self.start)
    }

    /// Total glucose change over the interval.
    pub fn total(&self) -> f64 {
        self.per_minute * self.minutes()
    }
}

/// Target glucose range (mg/dL). `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseRange {
    pub min: f64,
    pub max: f64,
}

impl GlucoseRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Convert a duration to fractional minutes.
#[inline]
pub fn minutes(d: TimeDelta) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

/// Convert fractional minutes to a duration (millisecond resolution).
#[inline]
pub fn from_minutes(m: f64) -> TimeDelta {
    TimeDelta::milliseconds((m * 60_000.0).round() as i64)
}
