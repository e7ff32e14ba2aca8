//! `recommend`: one loop cycle against recorded history.

use chrono::{DateTime, Utc};
use glucoloop_core::{DataKind, LoopError};
use glucoloop_traits::ManualClock;

use crate::assemble::{History, Stores, build_session};
use crate::cli::HistoryArgs;
use crate::report;

pub fn run_recommend(
    cfg: &glucoloop_config::Config,
    args: &HistoryArgs,
    at: Option<DateTime<Utc>>,
    with_prediction: bool,
    json: bool,
) -> eyre::Result<()> {
    let history = History::load(args)?;
    let now = at
        .or_else(|| history.last_glucose_time())
        .ok_or_else(|| eyre::Report::new(LoopError::MissingData(DataKind::Glucose)))?;

    let clock = ManualClock::new(now);
    let stores = Stores::filled(&history);
    let mut session = build_session(cfg, &stores, &clock, args.no_retrospection)?;
    let out = session.run_cycle()?;
    tracing::info!(
        at = %now,
        dosing_safe = out.dosing_safe,
        temp_basal = ?out.temp_basal.map(|t| t.units_per_hour),
        bolus = ?out.bolus.map(|b| b.units),
        "recommendation computed"
    );

    if json {
        println!("{}", report::render_json(&out, with_prediction));
    } else {
        println!("{}", report::render_text(&out, with_prediction));
    }
    Ok(())
}
