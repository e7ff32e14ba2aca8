//! Insulin counteraction: glucose movement not explained by modeled insulin.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::sample::minutes;
use glucoloop_traits::{GlucoseEffect, GlucoseSample, GlucoseVelocity};

/// Glucose samples closer together than this are merged into the next interval.
pub const MIN_INTERVAL: TimeDelta = TimeDelta::minutes(4);

/// Velocities of observed glucose minus the insulin effect's velocity.
///
/// Intervals are consecutive samples at least [`MIN_INTERVAL`] apart. An
/// interval containing fewer than two insulin-effect points emits nothing.
pub fn counteraction_effects(
    glucose: &[GlucoseSample],
    insulin_effect: &[GlucoseEffect],
) -> Vec<GlucoseVelocity> {
    let mut out = Vec::new();
    let Some(mut start) = glucose.first() else {
        return out;
    };
    for end in &glucose[1..] {
        if end.time - start.time < MIN_INTERVAL {
            continue;
        }
        let lo = insulin_effect.partition_point(|e| e.time < start.time);
        let hi = insulin_effect.partition_point(|e| e.time <= end.time);
        if hi.saturating_sub(lo) >= 2 {
            let (first, last) = (insulin_effect[lo], insulin_effect[hi - 1]);
            let effect_minutes = minutes(last.time - first.time);
            let glucose_minutes = minutes(end.time - start.time);
            if effect_minutes > 0.0 && glucose_minutes > 0.0 {
                let glucose_rate = (end.quantity - start.quantity) / glucose_minutes;
                let effect_rate = (last.quantity - first.quantity) / effect_minutes;
                out.push(GlucoseVelocity {
                    start: start.time,
                    end: end.time,
                    per_minute: glucose_rate - effect_rate,
                });
            }
        }
        start = end;
    }
    out
}

/// Rolling counteraction history kept across cycles.
#[derive(Debug, Clone)]
pub struct CounteractionTracker {
    entries: Vec<GlucoseVelocity>,
    retention: TimeDelta,
}

impl CounteractionTracker {
    pub fn new(retention: TimeDelta) -> Self {
        Self {
            entries: Vec::new(),
            retention,
        }
    }

    /// Append intervals that start at or after the last retained end, then prune.
    pub fn merge(&mut self, fresh: &[GlucoseVelocity], now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for v in fresh {
            if v.end <= v.start {
                continue;
            }
            if self.entries.last().is_none_or(|last| v.start >= last.end) {
                self.entries.push(*v);
                added += 1;
            }
        }
        self.prune(now);
        added
    }

    /// Drop intervals that ended before `now - retention`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.entries.retain(|v| v.end >= cutoff);
    }

    pub fn entries(&self) -> &[GlucoseVelocity] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
