use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &Path) -> PathBuf {
    let toml = r#"
[therapy]
basal_schedule = [["00:00", 0.8]]
sensitivity_schedule = [["00:00", 45.0]]
carb_ratio_schedule = [["00:00", 12.0]]
target_schedule = [["00:00", 100.0, 115.0]]
suspend_threshold = 70.0
max_basal_rate = 2.5
max_bolus = 6.0

[insulin_model]
kind = "fiasp"

[retrospective]
# Exercise the derivative term as well
differential_gain = 2.0
"#;
    let path = dir.join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

// Rising 2 mg/dL per reading from 10:00 to 12:00 UTC
fn write_rising_glucose(dir: &Path) -> PathBuf {
    let mut csv = String::from("time,mg_dl,source\n");
    for i in 0..25 {
        let minutes = 10 * 60 + i * 5;
        csv.push_str(&format!(
            "2024-03-01T{:02}:{:02}:00Z,{},cgm\n",
            minutes / 60,
            minutes % 60,
            110 + 2 * i
        ));
    }
    let path = dir.join("glucose.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn number_or_null(v: &serde_json::Value, key: &str) -> bool {
    match v.get(key) {
        Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some(),
        _ => false,
    }
}

/// Validate the JSON object printed by `recommend --json`.
#[rstest]
fn recommend_json_schema(#[values(false, true)] with_prediction: bool) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(dir.path());
    let glucose = write_rising_glucose(dir.path());

    let mut cmd = Command::cargo_bin("glucoloop_cli").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("recommend")
        .arg("--glucose")
        .arg(&glucose);
    if with_prediction {
        cmd.arg("--prediction");
    }

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).expect("valid JSON");

    assert_eq!(v["glucose"]["mg_dl"].as_f64(), Some(158.0));
    assert!(v["computed_at"].as_str().is_some());
    for key in ["eventual_glucose", "min_glucose"] {
        assert!(number_or_null(&v, key), "{key} should be number or null");
    }
    assert!(v["insulin_on_board"].as_f64().is_some());
    assert!(v["carbs_on_board"].as_f64().is_some());
    assert_eq!(v["dosing_safe"], true);
    assert!(v["dosing_blocked_by"].is_null());

    let temp = &v["temp_basal"];
    assert!(temp.is_null() || temp["units_per_hour"].as_f64().is_some());
    let bolus = &v["bolus"];
    assert!(bolus["units"].as_f64().is_some_and(|u| (0.0..=6.0).contains(&u)));

    let correction = &v["correction"];
    assert!(correction["status"].as_str().is_some());
    assert!(correction["duration_min"].as_i64().is_some_and(|d| d >= 60));

    assert!(v["phase_us"].get("fetching_inputs").is_some());

    match v.get("prediction") {
        Some(serde_json::Value::Array(points)) => {
            assert!(with_prediction);
            assert!(!points.is_empty());
            assert!(points[0]["mg_dl"].as_f64().is_some());
        }
        None => assert!(!with_prediction),
        other => panic!("unexpected prediction: {other:?}"),
    }
}

/// Every replay line is a JSON object; the last one is the summary.
#[rstest]
fn replay_emits_json_lines() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(dir.path());
    let glucose = write_rising_glucose(dir.path());

    let mut cmd = Command::cargo_bin("glucoloop_cli").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("replay")
        .arg("--from")
        .arg("2024-03-01T11:30:00Z")
        .arg("--glucose")
        .arg(&glucose);

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid JSON line"))
        .collect();

    let summary = &lines.last().expect("summary line")["summary"];
    assert_eq!(summary["cycles"], 7);
    assert_eq!(lines.len(), 8);
    let ok = lines[..7]
        .iter()
        .filter(|l| l.get("computed_at").is_some())
        .count();
    assert_eq!(summary["failed"].as_u64(), Some(7 - ok as u64));
}
