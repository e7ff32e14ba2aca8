//! Rendering of cycle outputs as text lines or JSON objects.

use glucoloop_core::{CorrectionStatus, CycleOutput};
use serde_json::{Value, json};

pub fn temp_basal_text(out: &CycleOutput) -> String {
    match out.temp_basal {
        Some(t) if t.is_cancel() => "temp basal: cancel".to_string(),
        Some(t) => format!(
            "temp basal: {:.2} U/h for {} min",
            t.units_per_hour,
            t.duration.num_minutes()
        ),
        None => "temp basal: no change".to_string(),
    }
}

pub fn bolus_text(out: &CycleOutput) -> String {
    match out.bolus {
        Some(b) => {
            let mut line = format!("bolus: {:.2} U", b.units);
            if b.pending_insulin > 0.0 {
                line.push_str(&format!(" ({:.2} U pending)", b.pending_insulin));
            }
            if let Some(n) = b.notice {
                line.push_str(&format!(" [{}]", n.as_str()));
            }
            line
        }
        None => "bolus: unavailable".to_string(),
    }
}

/// Multi-line summary printed by `recommend`.
pub fn render_text(out: &CycleOutput, with_prediction: bool) -> String {
    let mut lines = vec![format!(
        "glucose: {:.0} mg/dL at {}",
        out.latest_glucose.quantity,
        out.latest_glucose.time.to_rfc3339()
    )];
    if let (Some(min), Some(eventual)) = (out.prediction.minimum(), out.prediction.eventual()) {
        lines.push(format!(
            "predicted: eventual {:.0} mg/dL, minimum {:.0} mg/dL at {}",
            eventual.glucose,
            min.glucose,
            min.time.to_rfc3339()
        ));
    }
    lines.push(format!(
        "on board: {:.2} U insulin, {:.0} g carbs",
        out.insulin_on_board, out.carbs_on_board
    ));
    lines.push(correction_text(out));
    if let Some(err) = &out.dosing_blocked_by {
        lines.push(format!("dosing blocked: {err}"));
    } else {
        lines.push(temp_basal_text(out));
        lines.push(bolus_text(out));
    }
    if with_prediction {
        lines.push("prediction:".to_string());
        for p in out.prediction.points() {
            lines.push(format!("  {} {:.1}", p.time.to_rfc3339(), p.glucose));
        }
    }
    lines.join("\n")
}

fn correction_text(out: &CycleOutput) -> String {
    let c = &out.correction;
    match c.status {
        CorrectionStatus::Unavailable(_) => format!("correction: {}", c.status.as_str()),
        _ => format!(
            "correction: {} {:+.1} mg/dL over {} min",
            c.status.as_str(),
            c.overall,
            c.effect_duration.num_minutes()
        ),
    }
}

pub fn render_json(out: &CycleOutput, with_prediction: bool) -> Value {
    let c = &out.correction;
    let mut obj = json!({
        "computed_at": out.computed_at.to_rfc3339(),
        "glucose": {
            "time": out.latest_glucose.time.to_rfc3339(),
            "mg_dl": out.latest_glucose.quantity,
        },
        "eventual_glucose": out.prediction.eventual().map(|p| p.glucose),
        "min_glucose": out.prediction.minimum().map(|p| p.glucose),
        "insulin_on_board": out.insulin_on_board,
        "carbs_on_board": out.carbs_on_board,
        "temp_basal": out.temp_basal.map(|t| json!({
            "units_per_hour": t.units_per_hour,
            "duration_min": t.duration.num_minutes(),
            "cancel": t.is_cancel(),
        })),
        "bolus": out.bolus.map(|b| json!({
            "units": b.units,
            "pending_insulin": b.pending_insulin,
            "notice": b.notice.map(|n| n.as_str()),
        })),
        "correction": {
            "status": c.status.as_str(),
            "discrepancy": c.discrepancy,
            "proportional": c.proportional,
            "integral": c.integral,
            "differential": c.differential,
            "overall": c.overall,
            "duration_min": c.effect_duration.num_minutes(),
        },
        "dosing_safe": out.dosing_safe,
        "dosing_blocked_by": out.dosing_blocked_by.as_ref().map(|e| json!({
            "reason": e.kind_name(),
            "message": e.to_string(),
        })),
        "phase_us": out
            .phase_timings
            .iter()
            .map(|(phase, d)| {
                let us = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
                (phase.as_str().to_string(), json!(us))
            })
            .collect::<serde_json::Map<_, _>>(),
    });
    if with_prediction {
        obj["prediction"] = out
            .prediction
            .points()
            .iter()
            .map(|p| json!({ "time": p.time.to_rfc3339(), "mg_dl": p.glucose }))
            .collect();
    }
    obj
}
