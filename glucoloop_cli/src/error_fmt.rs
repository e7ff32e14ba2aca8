//! Human-readable error descriptions and structured JSON error formatting.

use glucoloop_core::{BuildError, DataKind, LoopError, SettingKind, StaleKind};

fn setting_hint(kind: SettingKind) -> &'static str {
    match kind {
        SettingKind::BasalSchedule => "therapy.basal_schedule",
        SettingKind::SensitivitySchedule => "therapy.sensitivity_schedule",
        SettingKind::CarbRatioSchedule => "therapy.carb_ratio_schedule",
        SettingKind::TargetRangeSchedule => "therapy.target_schedule",
        SettingKind::InsulinModel => "[insulin_model]",
        SettingKind::MaxBasalRate => "therapy.max_basal_rate",
        SettingKind::MaxBolus => "therapy.max_bolus",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingGlucoseHistory
            | BuildError::MissingDoseHistory
            | BuildError::MissingCarbHistory => format!(
                "What happened: {be}.\nLikely causes: A history store was not wired into the session builder.\nHow to fix: Pass --glucose (and optionally --doses/--carbs) and report this as a bug if it persists."
            ),
            BuildError::MissingSettings => "What happened: No therapy settings were provided.\nLikely causes: The [therapy] table is missing from the config.\nHow to fix: Add a [therapy] table with schedules and limits. See etc/glucoloop.toml.".to_string(),
            BuildError::InvalidSchedule(msg) => format!(
                "What happened: A therapy schedule is invalid ({msg}).\nLikely causes: Duplicate or unordered start times, or a non-positive value.\nHow to fix: List schedule items in increasing start order with positive values."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/glucoloop.toml for a sample."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LoopError>() {
        return match le {
            LoopError::Configuration(kind) => format!(
                "What happened: The loop cannot run without the {kind:?} setting.\nLikely causes: The setting is absent from the config.\nHow to fix: Add {} to the config and rerun `self-check`.",
                setting_hint(*kind)
            ),
            LoopError::MissingData(DataKind::Glucose) => "What happened: No glucose readings fall inside the evaluation window.\nLikely causes: Empty glucose CSV, or --at far from the recorded readings.\nHow to fix: Check the glucose CSV and the --at instant.".to_string(),
            LoopError::MissingData(kind) => format!(
                "What happened: Required input {kind:?} was not available.\nLikely causes: History does not cover the evaluation window.\nHow to fix: Provide history reaching back at least one insulin action duration."
            ),
            LoopError::StaleData { kind: StaleKind::Glucose, age } => format!(
                "What happened: The latest glucose reading is {} min old.\nLikely causes: Sensor gap or --at later than the last reading.\nHow to fix: Wait for a fresh reading; no dosing is recommended on stale glucose.",
                age.num_minutes()
            ),
            LoopError::StaleData { kind: StaleKind::PumpStatus, age } => format!(
                "What happened: Pump status is {} min old.\nLikely causes: Lost pump communication.\nHow to fix: Restore pump communication before dosing.",
                age.num_minutes()
            ),
            LoopError::RecommendationExpired { computed_at } => format!(
                "What happened: The recommendation computed at {computed_at} has expired.\nLikely causes: Too much time passed between computing and acting.\nHow to fix: Run a new cycle."
            ),
            LoopError::EffectUnavailable(msg) => format!(
                "What happened: An effect could not be computed ({msg}).\nLikely causes: A history source failed or timed out.\nHow to fix: Check the history files, or raise timeouts.fetch_ms in the config."
            ),
        };
    }

    // String-based heuristics for errors coming from config or history loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("csv must have headers") {
        return format!(
            "What happened: A history CSV has unexpected headers.\nLikely causes: Wrong column names or a missing header row.\nHow to fix: Use the documented headers. Original: {msg}"
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config with a readable TOML file. Original: {msg}"
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid or incomplete.\nLikely causes: Out-of-range values or a malformed TOML table.\nHow to fix: Edit the TOML config and try again. Original: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; unknown errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    // Invalid settings caught while building are configuration errors too.
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<LoopError>() {
        Some(LoopError::Configuration(_)) => 3,
        Some(LoopError::MissingData(_)) => 4,
        Some(LoopError::StaleData { .. }) => 5,
        Some(LoopError::EffectUnavailable(_)) => 6,
        Some(LoopError::RecommendationExpired { .. }) => 7,
        None => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    err.downcast_ref::<LoopError>()
        .map_or("Error", LoopError::kind_name)
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let details = match err.downcast_ref::<LoopError>() {
        Some(LoopError::Configuration(kind)) => Some(json!({ "setting": format!("{kind:?}") })),
        Some(LoopError::MissingData(kind)) => Some(json!({ "data": format!("{kind:?}") })),
        Some(LoopError::StaleData { kind, age }) => {
            Some(json!({ "data": format!("{kind:?}"), "age_min": age.num_minutes() }))
        }
        _ => None,
    };

    let obj = if let Some(d) = details {
        json!({ "reason": reason_name(err), "details": d, "message": humanize(err) })
    } else {
        json!({ "reason": reason_name(err), "message": humanize(err) })
    };
    obj.to_string()
}
