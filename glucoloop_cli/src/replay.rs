//! `replay`: step a manual clock through recorded history, revealing only the
//! data visible at each step to a live session.

use chrono::{DateTime, TimeDelta, Utc};
use glucoloop_core::{InvalidationTrigger, LoopError};
use glucoloop_traits::ManualClock;
use serde_json::json;

use crate::assemble::{History, Stores, build_session};
use crate::cli::HistoryArgs;
use crate::report;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub cycles: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// Configuration problems stop the replay; anything else is reported per cycle.
fn is_fatal(err: &eyre::Report) -> bool {
    matches!(
        err.downcast_ref::<LoopError>(),
        Some(LoopError::Configuration(_)) | None
    )
}

/// Push entries timed at or before `t`; true when anything was added.
fn feed<T: Clone>(
    src: &[T],
    next: &mut usize,
    t: DateTime<Utc>,
    time: impl Fn(&T) -> DateTime<Utc>,
    mut push: impl FnMut(T),
) -> bool {
    let before = *next;
    while let Some(item) = src.get(*next).filter(|i| time(i) <= t) {
        push(item.clone());
        *next += 1;
    }
    *next > before
}

pub fn run_replay(
    cfg: &glucoloop_config::Config,
    args: &HistoryArgs,
    (from, to): (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    step: TimeDelta,
    json: bool,
) -> eyre::Result<ReplaySummary> {
    let history = History::load(args)?;
    let (Some(first), Some(last)) = (history.glucose.first(), history.last_glucose_time()) else {
        eyre::bail!("glucose CSV has no readings to replay");
    };
    let end = to.map_or(last, |to| to.min(last));

    let clock = ManualClock::new(first.time);
    let stores = Stores::default();
    let mut session = build_session(cfg, &stores, &clock, args.no_retrospection)?;

    let (mut next_glucose, mut next_dose, mut next_carb) = (0, 0, 0);
    let mut summary = ReplaySummary::default();

    let mut t = first.time;
    while t <= end {
        if feed(&history.glucose, &mut next_glucose, t, |s| s.time, |s| {
            stores.glucose.push(s);
        }) {
            session.notify(InvalidationTrigger::GlucoseChanged);
        }
        if feed(&history.doses, &mut next_dose, t, |d| d.start, |d| stores.doses.push(d)) {
            session.notify(InvalidationTrigger::DosesChanged);
        }
        if feed(&history.carbs, &mut next_carb, t, |c| c.start, |c| stores.carbs.push(c)) {
            session.notify(InvalidationTrigger::CarbsChanged);
        }

        if from.is_some_and(|from| t < from) {
            t += step;
            continue;
        }

        clock.set(t);
        summary.cycles += 1;
        match session.run_cycle() {
            Ok(out) => {
                if !out.dosing_safe {
                    summary.blocked += 1;
                }
                if json {
                    println!("{}", report::render_json(&out, false));
                } else {
                    println!(
                        "{} {:>4.0} mg/dL  eventual {:>4.0}  {}  {}",
                        t.to_rfc3339(),
                        out.latest_glucose.quantity,
                        out.prediction.eventual().map_or(f64::NAN, |p| p.glucose),
                        report::temp_basal_text(&out),
                        report::bolus_text(&out),
                    );
                }
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(at = %t, error = %e, "replay cycle failed");
                if json {
                    let reason = e
                        .downcast_ref::<LoopError>()
                        .map_or("Error", LoopError::kind_name);
                    let line = json!({
                        "time": t.to_rfc3339(),
                        "error": reason,
                        "message": format!("{e:#}"),
                    });
                    println!("{line}");
                } else {
                    println!("{} error: {e:#}", t.to_rfc3339());
                }
            }
        }
        t += step;
    }

    if json {
        println!(
            "{}",
            json!({
                "summary": {
                    "cycles": summary.cycles,
                    "failed": summary.failed,
                    "blocked": summary.blocked,
                }
            })
        );
    } else {
        println!(
            "replayed {} cycles ({} failed, {} blocked)",
            summary.cycles, summary.failed, summary.blocked
        );
    }
    Ok(summary)
}
