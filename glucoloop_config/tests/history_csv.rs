use std::fs::File;
use std::io::Write;

use glucoloop_config::{DoseKindCsv, load_carbs_csv, load_doses_csv, load_glucose_csv};
use rstest::rstest;
use tempfile::tempdir;

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[rstest]
fn glucose_csv_with_and_without_source() {
    let dir = tempdir().unwrap();
    let p = write(
        &dir,
        "g.csv",
        "time,mg_dl\n2024-03-01T10:00:00Z,120\n2024-03-01T10:05:00Z,125.5\n",
    );
    let rows = load_glucose_csv(&p).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].mg_dl, 125.5);
    assert!(rows[0].source.is_none());

    let p = write(
        &dir,
        "g2.csv",
        "time,mg_dl,source\n2024-03-01T10:00:00Z,120,cgm-1\n",
    );
    let rows = load_glucose_csv(&p).unwrap();
    assert_eq!(rows[0].source.as_deref(), Some("cgm-1"));
}

#[rstest]
#[case("when,mg_dl\n2024-03-01T10:00:00Z,120\n", "must have headers")]
#[case(
    "time,mg_dl\n2024-03-01T10:05:00Z,120\n2024-03-01T10:00:00Z,121\n",
    "ordered by time"
)]
#[case("time,mg_dl\n2024-03-01T10:00:00Z,abc\n", "invalid glucose CSV row 2")]
#[case("time,mg_dl\n2024-03-01T10:00:00Z,0\n", "mg_dl > 0")]
fn glucose_csv_rejections(#[case] body: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let p = write(&dir, "g.csv", body);
    let err = load_glucose_csv(&p).unwrap_err();
    assert!(format!("{err}").contains(needle), "{err}");
}

#[test]
fn doses_csv_parses_kinds_and_optional_end() {
    let dir = tempdir().unwrap();
    let p = write(
        &dir,
        "d.csv",
        "kind,start,end,value\n\
         bolus,2024-03-01T09:00:00Z,,2.5\n\
         temp_basal,2024-03-01T09:10:00Z,2024-03-01T09:40:00Z,1.8\n\
         suspend,2024-03-01T09:45:00Z,2024-03-01T10:00:00Z,0\n",
    );
    let rows = load_doses_csv(&p).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].kind, DoseKindCsv::Bolus);
    assert!(rows[0].end.is_none());
    assert_eq!(rows[1].kind, DoseKindCsv::TempBasal);
    assert!(rows[1].end.is_some());
}

#[test]
fn doses_csv_requires_end_for_rates() {
    let dir = tempdir().unwrap();
    let p = write(
        &dir,
        "d.csv",
        "kind,start,end,value\ntemp_basal,2024-03-01T09:10:00Z,,1.8\n",
    );
    let err = load_doses_csv(&p).unwrap_err();
    assert!(format!("{err}").contains("needs an end time"));
}

#[test]
fn carbs_csv_optional_absorption() {
    let dir = tempdir().unwrap();
    let p = write(
        &dir,
        "c.csv",
        "time,grams,absorption_min\n2024-03-01T12:00:00Z,45,120\n2024-03-01T15:00:00Z,20,\n",
    );
    let rows = load_carbs_csv(&p).unwrap();
    assert_eq!(rows[0].absorption_min, Some(120.0));
    assert_eq!(rows[1].absorption_min, None);
}
