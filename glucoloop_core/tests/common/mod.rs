#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use glucoloop_core::mocks::{InMemoryCarbStore, InMemoryDoseStore, InMemoryGlucoseStore};
use glucoloop_core::{
    DailySchedule, ExponentialInsulinModel, LoopSession, LoopSessionBuilder, Set, TherapySettings,
};
use glucoloop_traits::{GlucoseRange, GlucoseSample, ManualClock};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap()
}

pub fn at(min: i64) -> DateTime<Utc> {
    t0() + TimeDelta::minutes(min)
}

/// Basal 1.0 U/h, ISF 50, CR 10, target 100-120, suspend at 70.
pub fn settings() -> TherapySettings {
    TherapySettings {
        basal: Some(DailySchedule::constant(1.0)),
        sensitivity: Some(DailySchedule::constant(50.0)),
        carb_ratio: Some(DailySchedule::constant(10.0)),
        target: Some(DailySchedule::constant(GlucoseRange::new(100.0, 120.0))),
        overrides: Vec::new(),
        suspend_threshold: Some(70.0),
        max_basal_rate: Some(3.0),
        max_bolus: Some(10.0),
    }
}

/// CGM readings every five minutes, the last one at `at(end_min)`.
pub fn readings(end_min: i64, values: &[f64]) -> Vec<GlucoseSample> {
    let n = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| GlucoseSample::new(at(end_min - 5 * (n - 1 - i as i64)), *v, "cgm"))
        .collect()
}

pub struct Harness {
    pub clock: ManualClock,
    pub glucose: InMemoryGlucoseStore,
    pub doses: InMemoryDoseStore,
    pub carbs: InMemoryCarbStore,
}

impl Harness {
    pub fn new(glucose: Vec<GlucoseSample>) -> Self {
        Self {
            clock: ManualClock::new(t0()),
            glucose: InMemoryGlucoseStore::new(glucose),
            doses: InMemoryDoseStore::default(),
            carbs: InMemoryCarbStore::default(),
        }
    }

    pub fn builder(&self, settings: TherapySettings) -> LoopSessionBuilder<Set, Set, Set, Set> {
        LoopSession::builder()
            .with_glucose_history(self.glucose.clone())
            .with_dose_history(self.doses.clone())
            .with_carb_history(self.carbs.clone())
            .with_settings(settings)
            .with_clock(Box::new(self.clock.clone()))
    }

    pub fn session(&self) -> LoopSession {
        self.builder(settings())
            .with_insulin_model(ExponentialInsulinModel::rapid_acting_adult())
            .build()
            .unwrap()
    }
}

/// Two hours of flat readings ending at `t0`.
pub fn flat(value: f64) -> Vec<GlucoseSample> {
    readings(0, &[value; 25])
}
