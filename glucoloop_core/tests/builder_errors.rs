mod common;

use common::{Harness, flat, settings};
use glucoloop_core::error::BuildError;
use glucoloop_core::mocks::{InMemoryCarbStore, InMemoryDoseStore};
use chrono::TimeDelta;
use glucoloop_core::{EffectCfg, LoopSession, RetrospectiveCfg};
use rstest::rstest;

#[rstest]
fn builder_missing_glucose_yields_typed_build_error() {
    let err = LoopSession::builder()
        // missing with_glucose_history()
        .with_dose_history(InMemoryDoseStore::default())
        .with_carb_history(InMemoryCarbStore::default())
        .with_settings(settings())
        .try_build()
        .expect_err("should fail with MissingGlucoseHistory");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingGlucoseHistory) => {}
        other => panic!("expected MissingGlucoseHistory, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_settings_yields_typed_build_error() {
    let h = Harness::new(flat(120.0));
    let err = LoopSession::builder()
        .with_glucose_history(h.glucose.clone())
        .with_dose_history(h.doses.clone())
        .with_carb_history(h.carbs.clone())
        .try_build()
        .expect_err("should fail with MissingSettings");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingSettings)
    ));
}

#[rstest]
fn builder_rejects_inverted_gains() {
    let h = Harness::new(flat(120.0));
    let err = h
        .builder(settings())
        .with_retrospective(RetrospectiveCfg {
            current_gain: 2.0,
            persistent_gain: 1.0,
            ..RetrospectiveCfg::default()
        })
        .build()
        .expect_err("should fail with InvalidConfig");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains("persistent_gain")),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[rstest]
#[case(TimeDelta::hours(25), "max effect duration")]
#[case(TimeDelta::days(100_000), "max effect duration")]
fn builder_rejects_unbounded_effect_duration(#[case] max: TimeDelta, #[case] needle: &str) {
    let h = Harness::new(flat(120.0));
    let err = h
        .builder(settings())
        .with_retrospective(RetrospectiveCfg {
            max_effect_duration: max,
            ..RetrospectiveCfg::default()
        })
        .build()
        .expect_err("should fail with InvalidConfig");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains(needle)),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[rstest]
fn builder_rejects_max_absorption_below_default() {
    let h = Harness::new(flat(120.0));
    let err = h
        .builder(settings())
        .with_effects(EffectCfg {
            max_absorption_time: TimeDelta::minutes(60),
            ..EffectCfg::default()
        })
        .build()
        .expect_err("should fail with InvalidConfig");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(msg)) if msg.contains("max absorption")
    ));
}
