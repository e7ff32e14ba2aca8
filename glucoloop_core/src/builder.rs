//! Type-state builder for `LoopSession`.
//!
//! The builder enforces at compile time that glucose, dose and carb history
//! and therapy settings are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use glucoloop_traits::clock::{Clock, SystemClock};
use glucoloop_traits::{CarbAbsorptionModel, CarbHistory, DoseHistory, GlucoseHistory, InsulinModel, ScheduleProvider};

use crate::config::{DosingCfg, EffectCfg, RetrospectiveCfg, Timeouts};
use crate::error::{BuildError, Result};
use crate::fetch::Providers;
use crate::models::ParabolicCarbModel;
use crate::predictor::PredictionInputs;
use crate::session::LoopSession;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Longest absorption or correction horizon a session accepts.
const MAX_HORIZON: chrono::TimeDelta = chrono::TimeDelta::hours(24);

type SharedGlucose = Arc<dyn GlucoseHistory + Send + Sync>;
type SharedDoses = Arc<dyn DoseHistory + Send + Sync>;
type SharedCarbs = Arc<dyn CarbHistory + Send + Sync>;

/// Optional parts; all have defaults except the insulin model.
#[derive(Default)]
struct Options {
    insulin_model: Option<Box<dyn InsulinModel + Send + Sync>>,
    carb_model: Option<Box<dyn CarbAbsorptionModel + Send + Sync>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    effects: Option<EffectCfg>,
    retrospective: Option<RetrospectiveCfg>,
    dosing: Option<DosingCfg>,
    timeouts: Option<Timeouts>,
    prediction_inputs: Option<PredictionInputs>,
}

/// Builder for `LoopSession`. Configuration is validated on `build()`.
pub struct LoopSessionBuilder<G, D, C, S> {
    glucose: Option<SharedGlucose>,
    doses: Option<SharedDoses>,
    carbs: Option<SharedCarbs>,
    settings: Option<Box<dyn ScheduleProvider + Send + Sync>>,
    options: Options,
    _g: PhantomData<G>,
    _d: PhantomData<D>,
    _c: PhantomData<C>,
    _s: PhantomData<S>,
}

impl Default for LoopSessionBuilder<Missing, Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            glucose: None,
            doses: None,
            carbs: None,
            settings: None,
            options: Options::default(),
            _g: PhantomData,
            _d: PhantomData,
            _c: PhantomData,
            _s: PhantomData,
        }
    }
}

impl LoopSession {
    /// Start building a session.
    pub fn builder() -> LoopSessionBuilder<Missing, Missing, Missing, Missing> {
        LoopSessionBuilder::default()
    }
}

/// Validate configuration and assemble the session.
///
/// Shared by `try_build()` and `build()` so validation lives in one place.
fn validate_and_build(
    providers: Providers,
    settings: Box<dyn ScheduleProvider + Send + Sync>,
    options: Options,
) -> Result<LoopSession> {
    let effects = options.effects.unwrap_or_default();
    let retrospective = options.retrospective.unwrap_or_default();
    let dosing = options.dosing.unwrap_or_default();
    let timeouts = options.timeouts.unwrap_or_default();

    let invalid = |msg| Err(eyre::Report::new(BuildError::InvalidConfig(msg)));
    if effects.delta <= chrono::TimeDelta::zero() {
        return invalid("effects.delta must be > 0");
    }
    if effects.momentum_window <= chrono::TimeDelta::zero()
        || effects.momentum_duration <= chrono::TimeDelta::zero()
    {
        return invalid("momentum window and duration must be > 0");
    }
    if effects.counteraction_retention < effects.delta {
        return invalid("counteraction retention must cover at least one delta");
    }
    if effects.max_absorption_time < effects.default_absorption_time
        || effects.max_absorption_time > MAX_HORIZON
    {
        return invalid("max absorption time must be between the default and 24 h");
    }
    if retrospective.time_constant <= chrono::TimeDelta::zero()
        || retrospective.sample_interval <= chrono::TimeDelta::zero()
        || retrospective.grouping_interval <= chrono::TimeDelta::zero()
    {
        return invalid("retrospective intervals must be > 0");
    }
    if retrospective.persistent_gain < retrospective.current_gain {
        return invalid("persistent_gain must be >= current_gain");
    }
    if retrospective.effect_duration_floor > retrospective.max_effect_duration {
        return invalid("effect duration floor must not exceed the maximum");
    }
    if retrospective.max_effect_duration > MAX_HORIZON {
        return invalid("max effect duration must not exceed 24 h");
    }
    if dosing.temp_basal_duration <= chrono::TimeDelta::zero() {
        return invalid("temp basal duration must be > 0");
    }
    if dosing.basal_rate_increments_per_unit <= 0.0 || dosing.bolus_increments_per_unit <= 0.0 {
        return invalid("dose increments must be > 0");
    }
    if timeouts.fetch.is_zero() {
        return invalid("fetch timeout must be > 0");
    }

    Ok(LoopSession::assemble(
        providers,
        settings,
        options.insulin_model,
        options
            .carb_model
            .unwrap_or_else(|| Box::new(ParabolicCarbModel::default())),
        options.clock.unwrap_or_else(|| Box::new(SystemClock::new())),
        (effects, retrospective, dosing, timeouts),
        options.prediction_inputs.unwrap_or_default(),
    ))
}

impl<G, D, C, S> LoopSessionBuilder<G, D, C, S> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<LoopSession> {
        let glucose = self
            .glucose
            .ok_or_else(|| eyre::Report::new(BuildError::MissingGlucoseHistory))?;
        let doses = self
            .doses
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDoseHistory))?;
        let carbs = self
            .carbs
            .ok_or_else(|| eyre::Report::new(BuildError::MissingCarbHistory))?;
        let settings = self
            .settings
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSettings))?;
        validate_and_build(
            Providers {
                glucose,
                doses,
                carbs,
            },
            settings,
            self.options,
        )
    }

    fn retype<G2, D2, C2, S2>(self) -> LoopSessionBuilder<G2, D2, C2, S2> {
        LoopSessionBuilder {
            glucose: self.glucose,
            doses: self.doses,
            carbs: self.carbs,
            settings: self.settings,
            options: self.options,
            _g: PhantomData,
            _d: PhantomData,
            _c: PhantomData,
            _s: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<G, D, C, S> LoopSessionBuilder<G, D, C, S> {
    pub fn with_insulin_model(mut self, model: impl InsulinModel + Send + Sync + 'static) -> Self {
        self.options.insulin_model = Some(Box::new(model));
        self
    }

    pub fn with_boxed_insulin_model(mut self, model: Box<dyn InsulinModel + Send + Sync>) -> Self {
        self.options.insulin_model = Some(model);
        self
    }

    pub fn with_carb_model(
        mut self,
        model: impl CarbAbsorptionModel + Send + Sync + 'static,
    ) -> Self {
        self.options.carb_model = Some(Box::new(model));
        self
    }

    pub fn with_boxed_carb_model(
        mut self,
        model: Box<dyn CarbAbsorptionModel + Send + Sync>,
    ) -> Self {
        self.options.carb_model = Some(model);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.options.clock = Some(clock);
        self
    }

    pub fn with_effects(mut self, effects: EffectCfg) -> Self {
        self.options.effects = Some(effects);
        self
    }

    pub fn with_retrospective(mut self, retrospective: RetrospectiveCfg) -> Self {
        self.options.retrospective = Some(retrospective);
        self
    }

    pub fn with_dosing(mut self, dosing: DosingCfg) -> Self {
        self.options.dosing = Some(dosing);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.options.timeouts = Some(timeouts);
        self
    }

    /// Restrict which effects feed the prediction (default: all).
    pub fn with_prediction_inputs(mut self, inputs: PredictionInputs) -> Self {
        self.options.prediction_inputs = Some(inputs);
        self
    }
}

// Setters that advance type-state
impl<D, C, S> LoopSessionBuilder<Missing, D, C, S> {
    pub fn with_glucose_history(
        mut self,
        store: impl GlucoseHistory + Send + Sync + 'static,
    ) -> LoopSessionBuilder<Set, D, C, S> {
        self.glucose = Some(Arc::new(store));
        self.retype()
    }
}

impl<G, C, S> LoopSessionBuilder<G, Missing, C, S> {
    pub fn with_dose_history(
        mut self,
        store: impl DoseHistory + Send + Sync + 'static,
    ) -> LoopSessionBuilder<G, Set, C, S> {
        self.doses = Some(Arc::new(store));
        self.retype()
    }
}

impl<G, D, S> LoopSessionBuilder<G, D, Missing, S> {
    pub fn with_carb_history(
        mut self,
        store: impl CarbHistory + Send + Sync + 'static,
    ) -> LoopSessionBuilder<G, D, Set, S> {
        self.carbs = Some(Arc::new(store));
        self.retype()
    }
}

impl<G, D, C> LoopSessionBuilder<G, D, C, Missing> {
    pub fn with_settings(
        mut self,
        settings: impl ScheduleProvider + Send + Sync + 'static,
    ) -> LoopSessionBuilder<G, D, C, Set> {
        self.settings = Some(Box::new(settings));
        self.retype()
    }
}

impl LoopSessionBuilder<Set, Set, Set, Set> {
    /// Validate and build. Only available once every collaborator is set.
    pub fn build(self) -> Result<LoopSession> {
        self.try_build()
    }
}
