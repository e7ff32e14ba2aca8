#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Glucose prediction and dose recommendation loop.
//!
//! Everything here is device-agnostic. History comes in through the
//! `glucoloop_traits` provider traits and recommendations go out as plain
//! values; nothing in this crate talks to a pump or a sensor.
//!
//! ## Architecture
//!
//! - **Schedules**: time-of-day therapy settings and overrides (`schedule` module)
//! - **Models**: insulin activity and carb absorption curves (`models` module)
//! - **Effects**: insulin, carb and momentum effect timelines (`effects` module)
//! - **Counteraction**: observed vs. insulin-predicted glucose change (`counteraction` module)
//! - **Retrospective correction**: PID controller on the recent discrepancy (`retrospective` module)
//! - **Prediction**: summed effects anchored on the latest glucose (`predictor` module)
//! - **Dosing**: temp basal and bolus recommendations (`dose` module)
//! - **Session**: one loop cycle with cached effects (`session`, `cache`, `fetch` modules)
//!
//! ## Units
//!
//! Glucose is mg/dL, insulin is U, basal rates are U/h and carbs are grams.
//! Timelines are sampled on a fixed grid (`EffectCfg::delta`, 5 minutes by default).

pub mod builder;
pub mod cache;
pub mod config;
pub mod conversions;
pub mod counteraction;
pub mod dose;
pub mod effects;
pub mod error;
pub mod fetch;
pub mod mocks;
pub mod models;
pub mod predictor;
pub mod retrospective;
pub mod schedule;
pub mod session;
pub mod status;
pub mod timeline;

pub use builder::{LoopSessionBuilder, Missing, Set};
pub use cache::{EffectCache, EffectSlot, InvalidationTrigger};
pub use config::{DosingCfg, EffectCfg, RetrospectiveCfg, RetrospectiveMode, Timeouts};
pub use counteraction::CounteractionTracker;
pub use dose::{
    BolusNotice, BolusRecommendation, TempBasalRecommendation, TimestampedRecommendation,
};
pub use error::{BuildError, DataKind, LoopError, Report, Result, SettingKind, StaleKind};
pub use models::{ExponentialInsulinModel, LinearCarbModel, ParabolicCarbModel, WalshInsulinModel};
pub use predictor::{EffectSet, PredictedGlucose, PredictedPoint, PredictionInputs};
pub use retrospective::{
    CorrectionReport, CorrectionStatus, RetrospectiveCorrectionState, UnavailableReason,
};
pub use schedule::{DailySchedule, TemporaryOverride, TherapySettings};
pub use session::{CycleOutput, LoopSession};
pub use status::CyclePhase;
