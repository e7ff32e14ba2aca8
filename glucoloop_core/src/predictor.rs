//! Glucose prediction from the latest reading and a selected set of effects.

use bitflags::bitflags;
use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::{GlucoseEffect, GlucoseSample};

use crate::timeline::value_at;

bitflags! {
    /// Effects summed into a prediction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PredictionInputs: u32 {
        const CARBS = 1 << 0;
        const INSULIN = 1 << 1;
        const MOMENTUM = 1 << 2;
        const RETROSPECTION = 1 << 3;
    }
}

impl Default for PredictionInputs {
    fn default() -> Self {
        Self::all()
    }
}

/// Borrowed effect timelines available to the predictor.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectSet<'a> {
    pub carbs: &'a [GlucoseEffect],
    pub insulin: &'a [GlucoseEffect],
    pub momentum: &'a [GlucoseEffect],
    pub retrospection: &'a [GlucoseEffect],
}

impl<'a> EffectSet<'a> {
    fn selected(&self, inputs: PredictionInputs) -> Vec<&'a [GlucoseEffect]> {
        let mut out = Vec::with_capacity(4);
        for (flag, effect) in [
            (PredictionInputs::CARBS, self.carbs),
            (PredictionInputs::INSULIN, self.insulin),
            (PredictionInputs::MOMENTUM, self.momentum),
            (PredictionInputs::RETROSPECTION, self.retrospection),
        ] {
            if inputs.contains(flag) && !effect.is_empty() {
                out.push(effect);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedPoint {
    pub time: DateTime<Utc>,
    pub glucose: f64,
}

/// Predicted glucose; the first point is the latest reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedGlucose {
    points: Vec<PredictedPoint>,
    action_duration: TimeDelta,
}

impl PredictedGlucose {
    pub fn points(&self) -> &[PredictedPoint] {
        &self.points
    }

    pub fn start(&self) -> Option<PredictedPoint> {
        self.points.first().copied()
    }

    /// Lowest point; the earliest one on ties.
    pub fn minimum(&self) -> Option<PredictedPoint> {
        self.points.iter().copied().reduce(|min, p| if p.glucose < min.glucose { p } else { min })
    }

    /// Last point no later than `start + insulin action duration`.
    pub fn eventual(&self) -> Option<PredictedPoint> {
        let start = self.points.first()?.time;
        let horizon = start + self.action_duration;
        self.points.iter().rev().find(|p| p.time <= horizon).copied()
    }

    pub fn action_duration(&self) -> TimeDelta {
        self.action_duration
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Sum the selected effects onto `latest`.
///
/// Each effect contributes `E(t) - E(latest.time)`, interpolated on the grid
/// `latest.time + k * delta`. The timeline runs to the later of the longest
/// effect and `latest.time + action_duration`; effects that end earlier hold
/// their last value.
pub fn predict(
    latest: &GlucoseSample,
    effects: &EffectSet<'_>,
    inputs: PredictionInputs,
    action_duration: TimeDelta,
    delta: TimeDelta,
) -> PredictedGlucose {
    let selected = effects.selected(inputs);
    let anchor = latest.time;
    let mut end = anchor + action_duration;
    for effect in &selected {
        if let Some(last) = effect.last()
            && last.time > end
        {
            end = last.time;
        }
    }
    let bases: Vec<f64> = selected
        .iter()
        .map(|e| value_at(e, anchor).unwrap_or(0.0))
        .collect();

    let mut points = vec![PredictedPoint {
        time: anchor,
        glucose: latest.quantity,
    }];
    if delta > TimeDelta::zero() {
        let mut t = anchor + delta;
        while t <= end {
            let change: f64 = selected
                .iter()
                .zip(&bases)
                .map(|(e, base)| value_at(e, t).unwrap_or(*base) - base)
                .sum();
            points.push(PredictedPoint {
                time: t,
                glucose: latest.quantity + change,
            });
            t += delta;
        }
    }
    PredictedGlucose {
        points,
        action_duration,
    }
}
