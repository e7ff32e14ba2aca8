//! The loop cycle orchestrator.
//!
//! A `LoopSession` owns the effect cache, the counteraction history and the
//! retrospective controller state. `run_cycle` works on scratch copies of all
//! three and commits them only when the cycle completes, so a failed cycle
//! leaves the session exactly as it found it.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_traits::clock::Clock;
use glucoloop_traits::{
    CarbAbsorptionModel, DoseEntry, DoseKind, GlucoseSample, GlucoseVelocity, InsulinModel,
    ScheduleProvider, TimeRange,
};
use std::time::{Duration, Instant};

use crate::cache::{
    CachedCarbs, CachedCorrection, CachedInsulin, CachedMomentum, EffectCache, EffectSlot,
    InvalidationTrigger,
};
use crate::config::{DosingCfg, EffectCfg, RetrospectiveCfg, Timeouts};
use crate::counteraction::{CounteractionTracker, counteraction_effects};
use crate::dose::{
    BolusRecommendation, TempBasalRecommendation, TimestampedRecommendation,
    pending_temp_basal_insulin, recommend_bolus, recommend_temp_basal,
};
use crate::effects::{
    CarbContext, carb_effects, carbs_on_board, insulin_effects, insulin_on_board,
    momentum_effect, net_insulin_pulses,
};
use crate::error::{DataKind, LoopError, Result, SettingKind, StaleKind};
use crate::fetch::{FetchPlan, Providers, fetch_all};
use crate::predictor::{EffectSet, PredictedGlucose, PredictionInputs, predict};
use crate::retrospective::{
    Correction, CorrectionReport, RetrospectiveCorrectionState, UnavailableReason,
};
use crate::status::CyclePhase;
use crate::timeline::floor_to;

/// Result of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub computed_at: DateTime<Utc>,
    pub latest_glucose: GlucoseSample,
    pub prediction: PredictedGlucose,
    pub temp_basal: Option<TempBasalRecommendation>,
    pub bolus: Option<BolusRecommendation>,
    pub correction: CorrectionReport,
    pub insulin_on_board: f64,
    pub carbs_on_board: f64,
    /// False when inputs were too old to dose on; recommendations are then absent.
    pub dosing_safe: bool,
    pub dosing_blocked_by: Option<LoopError>,
    pub phase_timings: Vec<(CyclePhase, Duration)>,
}

impl CycleOutput {
    pub fn temp_basal_recommendation(
        &self,
    ) -> Option<TimestampedRecommendation<TempBasalRecommendation>> {
        self.temp_basal
            .map(|t| TimestampedRecommendation::new(t, self.computed_at))
    }

    pub fn bolus_recommendation(&self) -> Option<TimestampedRecommendation<BolusRecommendation>> {
        self.bolus
            .map(|b| TimestampedRecommendation::new(b, self.computed_at))
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestedBolus {
    units: f64,
    at: DateTime<Utc>,
}

/// Cross-cycle state, copied at cycle start and committed on success.
#[derive(Debug, Clone)]
struct Scratch {
    cache: EffectCache,
    counteraction: CounteractionTracker,
    correction: RetrospectiveCorrectionState,
}

/// Tracks the current phase and how long each one took.
struct PhaseClock {
    current: CyclePhase,
    started: Instant,
    timings: Vec<(CyclePhase, Duration)>,
}

impl PhaseClock {
    fn new() -> Self {
        Self {
            current: CyclePhase::Idle,
            started: Instant::now(),
            timings: Vec::with_capacity(6),
        }
    }

    fn enter(&mut self, next: CyclePhase) {
        let now = Instant::now();
        if self.current != CyclePhase::Idle {
            self.timings.push((self.current, now - self.started));
        }
        tracing::debug!(phase = next.as_str(), "cycle phase");
        self.current = next;
        self.started = now;
    }
}

pub struct LoopSession {
    pub(crate) providers: Providers,
    pub(crate) settings: Box<dyn ScheduleProvider + Send + Sync>,
    pub(crate) insulin_model: Option<Box<dyn InsulinModel + Send + Sync>>,
    pub(crate) carb_model: Box<dyn CarbAbsorptionModel + Send + Sync>,
    pub(crate) clock: Box<dyn Clock + Send + Sync>,
    pub(crate) effects_cfg: EffectCfg,
    pub(crate) retrospective_cfg: RetrospectiveCfg,
    pub(crate) dosing_cfg: DosingCfg,
    pub(crate) timeouts: Timeouts,
    pub(crate) prediction_inputs: PredictionInputs,
    pub(crate) cache: EffectCache,
    pub(crate) counteraction: CounteractionTracker,
    pub(crate) correction_state: RetrospectiveCorrectionState,
    pub(crate) pending: Vec<InvalidationTrigger>,
    requested_bolus: Option<RequestedBolus>,
    phase: CyclePhase,
    last_output: Option<CycleOutput>,
}

impl core::fmt::Debug for LoopSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoopSession")
            .field("phase", &self.phase)
            .field("pending", &self.pending)
            .field("counteraction_len", &self.counteraction.len())
            .field("prediction_inputs", &self.prediction_inputs)
            .finish_non_exhaustive()
    }
}

impl LoopSession {
    pub(crate) fn assemble(
        providers: Providers,
        settings: Box<dyn ScheduleProvider + Send + Sync>,
        insulin_model: Option<Box<dyn InsulinModel + Send + Sync>>,
        carb_model: Box<dyn CarbAbsorptionModel + Send + Sync>,
        clock: Box<dyn Clock + Send + Sync>,
        configs: (EffectCfg, RetrospectiveCfg, DosingCfg, Timeouts),
        prediction_inputs: PredictionInputs,
    ) -> Self {
        let (effects_cfg, retrospective_cfg, dosing_cfg, timeouts) = configs;
        Self {
            providers,
            settings,
            insulin_model,
            carb_model,
            clock,
            counteraction: CounteractionTracker::new(effects_cfg.counteraction_retention),
            correction_state: RetrospectiveCorrectionState::new(&retrospective_cfg),
            effects_cfg,
            retrospective_cfg,
            dosing_cfg,
            timeouts,
            prediction_inputs,
            cache: EffectCache::default(),
            pending: Vec::new(),
            requested_bolus: None,
            phase: CyclePhase::Idle,
            last_output: None,
        }
    }

    /// Phase of the most recent cycle; `Done` or `Failed` once one has run.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn last_output(&self) -> Option<&CycleOutput> {
        self.last_output.as_ref()
    }

    pub fn cache(&self) -> &EffectCache {
        &self.cache
    }

    pub fn counteraction(&self) -> &[GlucoseVelocity] {
        self.counteraction.entries()
    }

    pub fn dosing_cfg(&self) -> &DosingCfg {
        &self.dosing_cfg
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record an upstream change; applied at the start of the next cycle.
    pub fn notify(&mut self, trigger: InvalidationTrigger) {
        tracing::debug!(?trigger, "invalidation queued");
        if !self.pending.contains(&trigger) {
            self.pending.push(trigger);
        }
    }

    /// A bolus has been sent to the pump but is not yet in dose history.
    pub fn record_requested_bolus(&mut self, units: f64) {
        self.requested_bolus = Some(RequestedBolus {
            units: units.max(0.0),
            at: self.clock.now(),
        });
    }

    /// The requested bolus now shows up in dose history.
    pub fn confirm_bolus(&mut self) {
        if self.requested_bolus.take().is_some() {
            self.notify(InvalidationTrigger::DosesChanged);
        }
    }

    /// Drop all controller memory and cached effects, as for a new session.
    pub fn reset(&mut self) {
        self.cache = EffectCache::default();
        self.counteraction.clear();
        self.correction_state.reset(&self.retrospective_cfg);
        self.pending.clear();
        self.phase = CyclePhase::Idle;
        self.last_output = None;
    }

    /// Run one full cycle: fetch, effects, correction, prediction, recommendation.
    pub fn run_cycle(&mut self) -> Result<CycleOutput> {
        for trigger in std::mem::take(&mut self.pending) {
            self.cache.apply(trigger);
        }
        let now = self.clock.now();
        let mut scratch = Scratch {
            cache: self.cache.clone(),
            counteraction: self.counteraction.clone(),
            correction: self.correction_state.clone(),
        };
        let mut phases = PhaseClock::new();
        match self.compute(now, &mut scratch, &mut phases) {
            Ok(output) => {
                self.cache = scratch.cache;
                self.counteraction = scratch.counteraction;
                self.correction_state = scratch.correction;
                self.phase = CyclePhase::Done;
                tracing::info!(
                    at = %now,
                    glucose = output.latest_glucose.quantity,
                    eventual = output.prediction.eventual().map(|p| p.glucose),
                    temp_basal = output.temp_basal.map(|t| t.units_per_hour),
                    bolus = output.bolus.map(|b| b.units),
                    dosing_safe = output.dosing_safe,
                    "loop cycle complete"
                );
                self.last_output = Some(output.clone());
                Ok(output)
            }
            Err(err) => {
                let failed_in = phases.current;
                self.phase = CyclePhase::Failed;
                tracing::error!(
                    phase = failed_in.as_str(),
                    kind = err.kind_name(),
                    error = %err,
                    "loop cycle aborted"
                );
                Err(eyre::Report::new(err).wrap_err(format!("loop cycle failed while {failed_in}")))
            }
        }
    }

    fn compute(
        &self,
        now: DateTime<Utc>,
        scratch: &mut Scratch,
        phases: &mut PhaseClock,
    ) -> std::result::Result<CycleOutput, LoopError> {
        let settings = self.settings.as_ref();
        let cfg = &self.effects_cfg;
        let delta = cfg.delta;

        phases.enter(CyclePhase::FetchingInputs);
        let insulin_model = self
            .insulin_model
            .as_deref()
            .ok_or(LoopError::Configuration(SettingKind::InsulinModel))?;
        let action = insulin_model.effect_duration();
        // Cached effects are keyed on the grid slot holding `now` and cover
        // delivery through the end of that slot.
        let slot = floor_to(now, delta);
        let slot_end = slot + delta;
        let effect_from = floor_to(now - cfg.counteraction_retention, delta);
        let key = (effect_from, slot);
        let carbs_cached = scratch.cache.carbs_for(key).is_some();
        let plan = FetchPlan {
            glucose: TimeRange::new(effect_from, now),
            doses: TimeRange::new(effect_from - action, now),
            carbs: (!carbs_cached)
                .then(|| TimeRange::new(effect_from - cfg.max_absorption_time, now)),
        };
        let mut inputs = fetch_all(&self.providers, plan, self.timeouts.fetch)?;
        inputs.glucose.sort_by_key(|s| s.time);
        inputs.doses.sort_by_key(|d| d.start);
        let latest = inputs
            .glucose
            .last()
            .cloned()
            .ok_or(LoopError::MissingData(DataKind::Glucose))?;

        phases.enter(CyclePhase::ComputingEffects);
        let (insulin_effect, pulses) = if let Some(hit) = scratch.cache.insulin_for(key) {
            (hit.effect.clone(), hit.pulses.clone())
        } else {
            let pulses = net_insulin_pulses(&inputs.doses, settings, slot_end, delta)?;
            let effect =
                insulin_effects(&pulses, insulin_model, effect_from, slot_end + action, delta);
            scratch.cache.insulin = Some(CachedInsulin {
                key,
                pulses: pulses.clone(),
                effect: effect.clone(),
            });
            (effect, pulses)
        };
        if insulin_effect.is_empty() {
            return Err(LoopError::MissingData(DataKind::InsulinEffect));
        }
        let iob = insulin_on_board(&pulses, insulin_model, now);

        if scratch.cache.counteraction_stale {
            scratch.counteraction.clear();
            scratch.cache.counteraction_stale = false;
        }
        let fresh = counteraction_effects(&inputs.glucose, &insulin_effect);
        scratch.counteraction.merge(&fresh, now);

        let ctx = CarbContext {
            schedules: settings,
            model: self.carb_model.as_ref(),
            default_absorption_time: cfg.default_absorption_time,
            max_absorption_time: cfg.max_absorption_time,
            counteraction: cfg
                .dynamic_carb_absorption
                .then(|| scratch.counteraction.entries()),
        };
        let (carb_effect, carb_entries) = if let Some(hit) = scratch.cache.carbs_for(key) {
            (hit.effect.clone(), hit.entries.clone())
        } else {
            let entries = inputs
                .carbs
                .take()
                .ok_or(LoopError::MissingData(DataKind::CarbEffect))?;
            let carb_to = entries
                .iter()
                .map(|e| {
                    let absorption = e
                        .absorption_time
                        .unwrap_or(cfg.default_absorption_time)
                        .min(cfg.max_absorption_time);
                    e.start + absorption + self.carb_model.delay()
                })
                .fold(slot_end + action, std::cmp::max);
            let effect = carb_effects(&entries, &ctx, effect_from, carb_to, delta)?;
            scratch.cache.carbs = Some(CachedCarbs {
                key,
                entries: entries.clone(),
                effect: effect.clone(),
            });
            (effect, entries)
        };
        if carb_effect.is_empty() {
            return Err(LoopError::MissingData(DataKind::CarbEffect));
        }
        let cob = carbs_on_board(&carb_entries, &ctx, now)?;

        let momentum = if let Some(hit) = scratch.cache.momentum_for(latest.time) {
            hit.effect.clone()
        } else {
            let effect = momentum_effect(
                &inputs.glucose,
                cfg.momentum_window,
                cfg.momentum_duration,
                delta,
            );
            scratch.cache.momentum = Some(CachedMomentum {
                latest_glucose: latest.time,
                effect: effect.clone(),
            });
            effect
        };

        phases.enter(CyclePhase::Correcting);
        let recency = self.dosing_cfg.recency_interval;
        let glucose_age = now - latest.time;
        let glucose_stale = glucose_age > recency;
        let correction = if glucose_stale {
            Correction::unavailable(UnavailableReason::StaleGlucose, &scratch.correction)
        } else if let Some(hit) = scratch.cache.correction_for(latest.time) {
            hit.clone()
        } else {
            // Inputs for an already corrected sample changed: start over from
            // the state that sample was first corrected from.
            if let Some(base) = scratch.cache.correction_base(latest.time) {
                scratch.correction = base.clone();
            }
            let state_before = scratch.correction.clone();
            let c = scratch.correction.update(
                &self.retrospective_cfg,
                settings,
                &inputs.glucose,
                &insulin_effect,
                &carb_effect,
                delta,
            );
            scratch.cache.retrospection = Some(CachedCorrection {
                latest_glucose: latest.time,
                state_before,
                correction: Some(c.clone()),
            });
            c
        };

        phases.enter(CyclePhase::Predicting);
        let effects = EffectSet {
            carbs: &carb_effect,
            insulin: &insulin_effect,
            momentum: &momentum,
            retrospection: &correction.effect,
        };
        let prediction = predict(&latest, &effects, self.prediction_inputs, action, delta);

        phases.enter(CyclePhase::Recommending);
        let pump_stale = inputs
            .pump_status_date
            .map(|at| now - at)
            .filter(|age| *age > recency);
        let blocked = if glucose_stale {
            Some(LoopError::StaleData {
                kind: StaleKind::Glucose,
                age: glucose_age,
            })
        } else {
            pump_stale.map(|age| LoopError::StaleData {
                kind: StaleKind::PumpStatus,
                age,
            })
        };

        let (temp_basal, bolus) = if let Some(err) = &blocked {
            tracing::warn!(error = %err, "dosing blocked; returning prediction only");
            (None, None)
        } else {
            let active_temp = active_temp_basal(&inputs.doses, now);
            let temp = recommend_temp_basal(
                &prediction,
                settings,
                &self.dosing_cfg,
                now,
                active_temp,
            )?;
            let pending = pending_temp_basal_insulin(active_temp, settings, now)?
                + self.unconfirmed_bolus(now, recency);
            let bolus = recommend_bolus(&prediction, settings, &self.dosing_cfg, now, pending)?;
            (temp, Some(bolus))
        };
        phases.enter(CyclePhase::Done);

        Ok(CycleOutput {
            computed_at: now,
            latest_glucose: latest,
            prediction,
            temp_basal,
            bolus,
            correction: correction.report,
            insulin_on_board: iob,
            carbs_on_board: cob,
            dosing_safe: blocked.is_none(),
            dosing_blocked_by: blocked,
            phase_timings: std::mem::take(&mut phases.timings),
        })
    }

    fn unconfirmed_bolus(&self, now: DateTime<Utc>, recency: TimeDelta) -> f64 {
        self.requested_bolus
            .filter(|r| now - r.at <= recency)
            .map_or(0.0, |r| r.units)
    }

    /// Whether `slot` currently holds a reusable value.
    pub fn is_cached(&self, slot: EffectSlot) -> bool {
        self.cache.is_cached(slot)
    }
}

/// The most recent temp basal still running at `now`.
fn active_temp_basal(doses: &[DoseEntry], now: DateTime<Utc>) -> Option<&DoseEntry> {
    doses
        .iter()
        .rev()
        .find(|d| d.kind == DoseKind::TempBasal && d.is_active_rate_at(now))
}
