#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `glucoloop`: run the glucose prediction and dose recommendation loop
//! against recorded history.
//!
//! Results go to stdout; logs and errors go to stderr.

mod assemble;
mod cli;
mod error_fmt;
mod logging;
mod recommend;
mod replay;
mod report;

use clap::Parser;
use glucoloop_core::conversions::insulin_model_from;
use glucoloop_core::{LoopError, SettingKind, TherapySettings};

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

/// Check every setting a cycle needs, so problems surface before the first cycle.
fn self_check(cfg: &glucoloop_config::Config) -> eyre::Result<TherapySettings> {
    let settings = TherapySettings::try_from(cfg)?;
    let model = insulin_model_from(cfg.insulin_model.as_ref())?;
    let required = [
        (settings.basal.is_some(), SettingKind::BasalSchedule),
        (settings.sensitivity.is_some(), SettingKind::SensitivitySchedule),
        (settings.carb_ratio.is_some(), SettingKind::CarbRatioSchedule),
        (settings.target.is_some(), SettingKind::TargetRangeSchedule),
        (model.is_some(), SettingKind::InsulinModel),
        (settings.max_basal_rate.is_some(), SettingKind::MaxBasalRate),
        (settings.max_bolus.is_some(), SettingKind::MaxBolus),
    ];
    if let Some((_, kind)) = required.iter().find(|(present, _)| !present) {
        return Err(eyre::Report::new(LoopError::Configuration(*kind)));
    }
    tracing::info!(overrides = settings.overrides.len(), "self-check passed");
    Ok(settings)
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = assemble::load_config(&cli.config)?;
    logging::init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Recommend {
            history,
            at,
            prediction,
        } => recommend::run_recommend(&cfg, &history, at, prediction, cli.json),
        Commands::Replay {
            history,
            from,
            to,
            every_min,
        } => {
            let step = chrono::TimeDelta::minutes(i64::from(every_min));
            replay::run_replay(&cfg, &history, (from, to), step, cli.json).map(|_| ())
        }
        Commands::SelfCheck => {
            let settings = self_check(&cfg)?;
            let model = cfg.insulin_model.as_ref().map(|m| format!("{:?}", m.kind));
            if cli.json {
                let summary = serde_json::json!({
                    "status": "ok",
                    "insulin_model": model,
                    "overrides": settings.overrides.len(),
                    "max_basal_rate": settings.max_basal_rate,
                    "max_bolus": settings.max_bolus,
                });
                println!("{summary}");
            } else {
                println!(
                    "ok: insulin model {}, {} override(s), max basal {:.2} U/h, max bolus {:.2} U",
                    model.unwrap_or_default(),
                    settings.overrides.len(),
                    settings.max_basal_rate.unwrap_or_default(),
                    settings.max_bolus.unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::error!(error = ?e, "command failed");
        std::process::exit(exit_code_for_error(&e));
    }
}
