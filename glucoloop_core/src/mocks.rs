//! In-memory history stores for tests, replay, and benches.
//!
//! Stores are cheap to clone and share their contents, so a test can hand one
//! clone to a session and keep appending through another.

use chrono::{DateTime, Utc};
use glucoloop_traits::{
    CarbEntry, CarbHistory, DoseEntry, DoseHistory, GlucoseHistory, GlucoseSample, ProviderError,
    TimeRange,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn poisoned() -> ProviderError {
    Box::new(std::io::Error::other("store lock poisoned"))
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGlucoseStore {
    samples: Arc<Mutex<Vec<GlucoseSample>>>,
}

impl InMemoryGlucoseStore {
    pub fn new(samples: Vec<GlucoseSample>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(samples)),
        }
    }

    pub fn push(&self, sample: GlucoseSample) {
        if let Ok(mut s) = self.samples.lock() {
            s.push(sample);
            s.sort_by_key(|x| x.time);
        }
    }
}

impl GlucoseHistory for InMemoryGlucoseStore {
    fn glucose_samples(&self, range: TimeRange) -> Result<Vec<GlucoseSample>, ProviderError> {
        let s = self.samples.lock().map_err(|_| poisoned())?;
        Ok(s.iter().filter(|x| range.contains(x.time)).cloned().collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDoseStore {
    doses: Arc<Mutex<Vec<DoseEntry>>>,
    pump_status: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl InMemoryDoseStore {
    pub fn new(doses: Vec<DoseEntry>) -> Self {
        Self {
            doses: Arc::new(Mutex::new(doses)),
            pump_status: Arc::default(),
        }
    }

    pub fn push(&self, dose: DoseEntry) {
        if let Ok(mut d) = self.doses.lock() {
            d.push(dose);
            d.sort_by_key(|x| x.start);
        }
    }

    pub fn set_pump_status_date(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut p) = self.pump_status.lock() {
            *p = at;
        }
    }
}

impl DoseHistory for InMemoryDoseStore {
    fn dose_history(&self, range: TimeRange) -> Result<Vec<DoseEntry>, ProviderError> {
        let d = self.doses.lock().map_err(|_| poisoned())?;
        Ok(d.iter()
            .filter(|x| range.overlaps(x.start, x.end))
            .copied()
            .collect())
    }

    fn pump_status_date(&self) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(*self.pump_status.lock().map_err(|_| poisoned())?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCarbStore {
    entries: Arc<Mutex<Vec<CarbEntry>>>,
}

impl InMemoryCarbStore {
    pub fn new(entries: Vec<CarbEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn push(&self, entry: CarbEntry) {
        if let Ok(mut e) = self.entries.lock() {
            e.push(entry);
            e.sort_by_key(|x| x.start);
        }
    }
}

impl CarbHistory for InMemoryCarbStore {
    fn carb_history(&self, range: TimeRange) -> Result<Vec<CarbEntry>, ProviderError> {
        let e = self.entries.lock().map_err(|_| poisoned())?;
        Ok(e.iter().filter(|x| range.contains(x.start)).copied().collect())
    }
}

/// A store whose every query fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingStore {
    message: String,
}

impl FailingStore {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, ProviderError> {
        Err(Box::new(std::io::Error::other(self.message.clone())))
    }
}

impl GlucoseHistory for FailingStore {
    fn glucose_samples(&self, _range: TimeRange) -> Result<Vec<GlucoseSample>, ProviderError> {
        self.fail()
    }
}

impl DoseHistory for FailingStore {
    fn dose_history(&self, _range: TimeRange) -> Result<Vec<DoseEntry>, ProviderError> {
        self.fail()
    }
}

impl CarbHistory for FailingStore {
    fn carb_history(&self, _range: TimeRange) -> Result<Vec<CarbEntry>, ProviderError> {
        self.fail()
    }
}

/// Wraps a store and blocks for `delay` before every query.
#[derive(Debug, Clone)]
pub struct SlowStore<S> {
    inner: S,
    delay: Duration,
}

impl<S> SlowStore<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<S: GlucoseHistory> GlucoseHistory for SlowStore<S> {
    fn glucose_samples(&self, range: TimeRange) -> Result<Vec<GlucoseSample>, ProviderError> {
        std::thread::sleep(self.delay);
        self.inner.glucose_samples(range)
    }
}

impl<S: DoseHistory> DoseHistory for SlowStore<S> {
    fn dose_history(&self, range: TimeRange) -> Result<Vec<DoseEntry>, ProviderError> {
        std::thread::sleep(self.delay);
        self.inner.dose_history(range)
    }

    fn pump_status_date(&self) -> Result<Option<DateTime<Utc>>, ProviderError> {
        self.inner.pump_status_date()
    }
}

impl<S: CarbHistory> CarbHistory for SlowStore<S> {
    fn carb_history(&self, range: TimeRange) -> Result<Vec<CarbEntry>, ProviderError> {
        std::thread::sleep(self.delay);
        self.inner.carb_history(range)
    }
}
