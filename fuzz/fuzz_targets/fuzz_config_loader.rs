#![no_main]
use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_core::TherapySettings;
use glucoloop_core::conversions::insulin_model_from;
use glucoloop_traits::ScheduleProvider;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = glucoloop_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }

    // A validated config must convert, and its schedules must resolve at any instant.
    let Ok(settings) = TherapySettings::try_from(&cfg) else {
        return;
    };
    let _ = insulin_model_from(cfg.insulin_model.as_ref());
    let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(19_783);
    for step in 0..48 {
        let at = start + TimeDelta::minutes(30 * step);
        let _ = settings.basal_rate(at);
        let _ = settings.insulin_sensitivity(at);
        let _ = settings.carb_ratio(at);
        if let Some(range) = settings.target_range(at) {
            assert!(range.min <= range.max);
        }
    }
});
