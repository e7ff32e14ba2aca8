//! Config loading, history loading, and session assembly.

use chrono::{DateTime, Utc};
use eyre::WrapErr;
use glucoloop_config::Config;
use glucoloop_core::conversions::{
    carb_model_from, carbs_from_rows, doses_from_rows, glucose_from_rows, insulin_model_from,
};
use glucoloop_core::mocks::{InMemoryCarbStore, InMemoryDoseStore, InMemoryGlucoseStore};
use glucoloop_core::{
    DosingCfg, EffectCfg, LoopSession, PredictionInputs, RetrospectiveCfg, TherapySettings,
    Timeouts,
};
use glucoloop_traits::{CarbEntry, DoseEntry, GlucoseSample, ManualClock};
use std::path::Path;

use crate::cli::HistoryArgs;

pub fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = glucoloop_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Recorded history, sorted and converted to core types.
pub struct History {
    pub glucose: Vec<GlucoseSample>,
    pub doses: Vec<DoseEntry>,
    pub carbs: Vec<CarbEntry>,
}

impl History {
    pub fn load(args: &HistoryArgs) -> eyre::Result<Self> {
        let glucose = glucose_from_rows(&glucoloop_config::load_glucose_csv(&args.glucose)?);
        let doses = match &args.doses {
            Some(p) => doses_from_rows(&glucoloop_config::load_doses_csv(p)?),
            None => Vec::new(),
        };
        let carbs = match &args.carbs {
            Some(p) => carbs_from_rows(&glucoloop_config::load_carbs_csv(p)?),
            None => Vec::new(),
        };
        tracing::debug!(
            glucose = glucose.len(),
            doses = doses.len(),
            carbs = carbs.len(),
            "history loaded"
        );
        Ok(Self {
            glucose,
            doses,
            carbs,
        })
    }

    pub fn last_glucose_time(&self) -> Option<DateTime<Utc>> {
        self.glucose.last().map(|s| s.time)
    }
}

/// Stores the session reads from; clones share contents with the session.
#[derive(Clone, Default)]
pub struct Stores {
    pub glucose: InMemoryGlucoseStore,
    pub doses: InMemoryDoseStore,
    pub carbs: InMemoryCarbStore,
}

impl Stores {
    pub fn filled(history: &History) -> Self {
        Self {
            glucose: InMemoryGlucoseStore::new(history.glucose.clone()),
            doses: InMemoryDoseStore::new(history.doses.clone()),
            carbs: InMemoryCarbStore::new(history.carbs.clone()),
        }
    }
}

/// Build a session wired to `stores` with every setting taken from `cfg`.
pub fn build_session(
    cfg: &Config,
    stores: &Stores,
    clock: &ManualClock,
    no_retrospection: bool,
) -> eyre::Result<LoopSession> {
    let settings = TherapySettings::try_from(cfg)?;
    let mut builder = LoopSession::builder()
        .with_glucose_history(stores.glucose.clone())
        .with_dose_history(stores.doses.clone())
        .with_carb_history(stores.carbs.clone())
        .with_settings(settings)
        .with_boxed_carb_model(carb_model_from(&cfg.carbs))
        .with_clock(Box::new(clock.clone()))
        .with_effects(EffectCfg::from(&cfg.carbs))
        .with_retrospective(RetrospectiveCfg::from(&cfg.retrospective))
        .with_dosing(DosingCfg::from(&cfg.dosing))
        .with_timeouts(Timeouts::from(&cfg.timeouts));
    if let Some(model) = insulin_model_from(cfg.insulin_model.as_ref())? {
        builder = builder.with_boxed_insulin_model(model);
    }
    if no_retrospection {
        builder = builder
            .with_prediction_inputs(PredictionInputs::all() - PredictionInputs::RETROSPECTION);
    }
    builder.build()
}
