mod common;

use chrono::TimeDelta;
use common::{at, readings, settings};
use glucoloop_core::retrospective::limits_at;
use glucoloop_core::{
    CorrectionStatus, RetrospectiveCfg, RetrospectiveCorrectionState, RetrospectiveMode,
};
use glucoloop_traits::{GlucoseEffect, GlucoseSample};
use proptest::prelude::*;
use rstest::rstest;

const DELTA: TimeDelta = TimeDelta::minutes(5);

/// Seven readings over the 30 minute window rising by `rise` in total.
fn window(end_min: i64, start: f64, rise: f64) -> Vec<GlucoseSample> {
    let values: Vec<f64> = (0..7).map(|k| start + rise * f64::from(k) / 6.0).collect();
    readings(end_min, &values)
}

fn carb_ramp(end_min: i64, total: f64) -> Vec<GlucoseEffect> {
    (0..7)
        .map(|k| GlucoseEffect::new(at(end_min - 30 + 5 * k), total * k as f64 / 6.0))
        .collect()
}

#[test]
fn constant_discrepancy_extends_duration_and_integral() {
    let cfg = RetrospectiveCfg::default();
    let schedules = settings();
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    let glucose = window(0, 100.0, 10.0);
    let limit = limits_at(&cfg, &schedules, 110.0, at(0)).unwrap().positive;

    let mut last_integral = 0.0;
    for cycle in 1..=6 {
        let c = state.update(&cfg, &schedules, &glucose, &[], &[], DELTA);
        assert_eq!(c.report.status, CorrectionStatus::Accumulated);
        assert!((c.report.discrepancy.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(
            c.report.effect_duration,
            TimeDelta::minutes(60 + 10 * cycle)
        );
        assert!(c.report.integral > last_integral);
        assert!(c.report.integral <= limit);
        last_integral = c.report.integral;
    }
    assert_eq!(state.effect_duration(), TimeDelta::minutes(120));

    // Steady state is ki * d / (1 - forget)
    let steady = cfg.integral_gain() * 10.0 / (1.0 - cfg.forget());
    assert!(last_integral < steady);

    for _ in 0..20 {
        state.update(&cfg, &schedules, &glucose, &[], &[], DELTA);
    }
    assert_eq!(state.effect_duration(), cfg.max_effect_duration);
}

#[test]
fn polarity_reversal_resets_integrator() {
    let cfg = RetrospectiveCfg::default();
    let schedules = settings();
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    for _ in 0..3 {
        state.update(&cfg, &schedules, &window(0, 130.0, 20.0), &[], &[], DELTA);
    }
    assert_eq!(state.effect_duration(), TimeDelta::minutes(90));

    let c = state.update(&cfg, &schedules, &window(5, 150.0, -15.0), &[], &[], DELTA);
    assert_eq!(c.report.status, CorrectionStatus::ResetOnReversal);
    assert!((c.report.integral - cfg.integral_gain() * -15.0).abs() < 1e-9);
    assert_eq!(c.report.effect_duration, cfg.effect_duration_floor);
    assert!(c.report.overall < 0.0);
}

#[test]
fn unmodeled_carbs_reset_integrator_on_positive_discrepancy() {
    let cfg = RetrospectiveCfg::default();
    let schedules = settings();
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    for _ in 0..3 {
        state.update(&cfg, &schedules, &window(0, 130.0, 20.0), &[], &[], DELTA);
    }

    // Carb effect of 100 mg/dL per 30 min against a limit of 50 / 10 * 10 = 50.
    let glucose = window(0, 100.0, 120.0);
    let carbs = carb_ramp(0, 100.0);
    let c = state.update(&cfg, &schedules, &glucose, &[], &carbs, DELTA);
    assert_eq!(c.report.status, CorrectionStatus::ResetOnCarbOverride);
    assert!((c.report.discrepancy.unwrap() - 20.0).abs() < 1e-9);
    assert!((c.report.integral - cfg.integral_gain() * 20.0).abs() < 1e-9);
    assert_eq!(c.report.effect_duration, cfg.effect_duration_floor);
}

#[rstest]
#[case(250.0, 130.0, -190.0)]
#[case(110.0, 100.0, -50.0)]
#[case(55.0, 100.0, 0.0)]
fn integral_limits_follow_latest_glucose(
    #[case] latest: f64,
    #[case] positive: f64,
    #[case] negative: f64,
) {
    let cfg = RetrospectiveCfg::default();
    let limits = limits_at(&cfg, &settings(), latest, at(0)).unwrap();
    assert_eq!(limits.positive, positive);
    assert_eq!(limits.negative, negative);
}

#[test]
fn correction_effect_decays_to_a_plateau() {
    let cfg = RetrospectiveCfg::default();
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    let c = state.update(&cfg, &settings(), &window(0, 100.0, 30.0), &[], &[], DELTA);
    let effect = &c.effect;
    assert_eq!(effect.first().unwrap().time, at(0));
    assert_eq!(effect.first().unwrap().quantity, 0.0);
    assert_eq!(effect.last().unwrap().time, at(70));
    assert!(effect.windows(2).all(|w| w[1].quantity >= w[0].quantity));
}

#[rstest]
#[case(RetrospectiveMode::Standard, CorrectionStatus::Standard, 60, 60)]
#[case(RetrospectiveMode::Integral, CorrectionStatus::Accumulated, 70, 90)]
fn modes_differ_in_memory(
    #[case] mode: RetrospectiveMode,
    #[case] status: CorrectionStatus,
    #[case] first_duration: i64,
    #[case] third_duration: i64,
) {
    let cfg = RetrospectiveCfg {
        mode,
        ..RetrospectiveCfg::default()
    };
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    let glucose = window(0, 100.0, 12.0);

    let first = state.update(&cfg, &settings(), &glucose, &[], &[], DELTA);
    assert_eq!(first.report.status, status);
    assert!((first.report.discrepancy.unwrap() - 12.0).abs() < 1e-9);
    assert_eq!(first.report.effect_duration, TimeDelta::minutes(first_duration));

    state.update(&cfg, &settings(), &glucose, &[], &[], DELTA);
    let third = state.update(&cfg, &settings(), &glucose, &[], &[], DELTA);
    assert_eq!(third.report.effect_duration, TimeDelta::minutes(third_duration));
    assert!(third.effect.last().unwrap().quantity > 0.0);
}

#[test]
fn standard_mode_spreads_the_discrepancy_over_the_window() {
    let cfg = RetrospectiveCfg {
        mode: RetrospectiveMode::Standard,
        ..RetrospectiveCfg::default()
    };
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    let c = state.update(&cfg, &settings(), &window(0, 100.0, 30.0), &[], &[], DELTA);
    assert_eq!(c.report.overall, c.report.proportional);
    assert_eq!(c.report.integral, 0.0);
    // 30 mg/dL over 30 minutes decays over 12 steps: 5 * (12 + 1) / 2
    let last = c.effect.last().unwrap();
    assert_eq!(last.time, at(60));
    assert!((last.quantity - 32.5).abs() < 1e-9);
}

#[test]
fn gap_between_windows_resets_the_controller() {
    let cfg = RetrospectiveCfg::default();
    let schedules = settings();
    let mut state = RetrospectiveCorrectionState::new(&cfg);
    for _ in 0..3 {
        state.update(&cfg, &schedules, &window(0, 130.0, 20.0), &[], &[], DELTA);
    }
    assert_eq!(state.effect_duration(), TimeDelta::minutes(90));

    // 40 minutes later the window still touches the previous one.
    let c = state.update(&cfg, &schedules, &window(40, 150.0, 20.0), &[], &[], DELTA);
    assert_eq!(c.report.effect_duration, TimeDelta::minutes(100));
    assert_eq!(state.last_discrepancy_end(), Some(at(40)));

    // Three hours later it does not.
    let c = state.update(&cfg, &schedules, &window(220, 150.0, 20.0), &[], &[], DELTA);
    assert_eq!(c.report.status, CorrectionStatus::Accumulated);
    assert_eq!(c.report.effect_duration, TimeDelta::minutes(70));
    assert!((c.report.integral - cfg.integral_gain() * 20.0).abs() < 1e-9);
}

proptest! {
    #[test]
    fn effect_duration_stays_within_bounds(
        rises in prop::collection::vec(-40.0f64..40.0, 1..60),
        gaps in prop::collection::vec(0i64..60, 60),
    ) {
        let cfg = RetrospectiveCfg::default();
        let schedules = settings();
        let mut state = RetrospectiveCorrectionState::new(&cfg);
        let mut end = 0;
        for (rise, gap) in rises.iter().zip(&gaps) {
            end += 5 + gap;
            let c = state.update(&cfg, &schedules, &window(end, 150.0, *rise), &[], &[], DELTA);
            prop_assert!(c.report.effect_duration >= cfg.effect_duration_floor);
            prop_assert!(c.report.effect_duration <= cfg.max_effect_duration);
            prop_assert!(state.effect_duration() <= cfg.max_effect_duration);
        }
    }
}
