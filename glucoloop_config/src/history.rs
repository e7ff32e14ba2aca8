//! CSV history loaders used by the CLI to replay recorded data.
//!
//! Expected headers:
//! - glucose: `time,mg_dl` or `time,mg_dl,source`
//! - doses:   `kind,start,end,value` (`end` may be empty for boluses)
//! - carbs:   `time,grams` or `time,grams,absorption_min`
//!
//! Times are RFC 3339. Rows must be ordered by time.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GlucoseRow {
    pub time: DateTime<Utc>,
    pub mg_dl: f64,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseKindCsv {
    Basal,
    TempBasal,
    Bolus,
    Suspend,
    Resume,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct DoseRow {
    pub kind: DoseKindCsv,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CarbRow {
    pub time: DateTime<Utc>,
    pub grams: f64,
    #[serde(default)]
    pub absorption_min: Option<f64>,
}

fn load_csv<T: DeserializeOwned>(
    path: &Path,
    what: &str,
    accepted: &[&[&str]],
) -> eyre::Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open {what} CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if !accepted.iter().any(|exp| actual == *exp) {
        let expected: Vec<String> = accepted.iter().map(|h| h.join(",")).collect();
        eyre::bail!(
            "{what} CSV must have headers '{}', got: {}",
            expected.join("' or '"),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<T>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid {what} CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

fn ensure_ordered<T>(
    rows: &[T],
    what: &str,
    time: impl Fn(&T) -> DateTime<Utc>,
) -> eyre::Result<()> {
    for (i, w) in rows.windows(2).enumerate() {
        if time(&w[1]) < time(&w[0]) {
            eyre::bail!("{what} CSV rows must be ordered by time (row {})", i + 3);
        }
    }
    Ok(())
}

pub fn load_glucose_csv(path: &Path) -> eyre::Result<Vec<GlucoseRow>> {
    let rows: Vec<GlucoseRow> = load_csv(
        path,
        "glucose",
        &[&["time", "mg_dl"], &["time", "mg_dl", "source"]],
    )?;
    ensure_ordered(&rows, "glucose", |r| r.time)?;
    if let Some((idx, _)) = rows
        .iter()
        .enumerate()
        .find(|(_, r)| !(r.mg_dl > 0.0 && r.mg_dl.is_finite()))
    {
        eyre::bail!("glucose CSV row {} must have mg_dl > 0", idx + 2);
    }
    Ok(rows)
}

pub fn load_doses_csv(path: &Path) -> eyre::Result<Vec<DoseRow>> {
    let rows: Vec<DoseRow> = load_csv(path, "doses", &[&["kind", "start", "end", "value"]])?;
    ensure_ordered(&rows, "doses", |r| r.start)?;
    for (idx, r) in rows.iter().enumerate() {
        if r.value < 0.0 || !r.value.is_finite() {
            eyre::bail!("doses CSV row {} must have value >= 0", idx + 2);
        }
        match (r.kind, r.end) {
            (DoseKindCsv::TempBasal | DoseKindCsv::Suspend | DoseKindCsv::Basal, None) => {
                eyre::bail!("doses CSV row {} needs an end time", idx + 2);
            }
            (_, Some(end)) if end < r.start => {
                eyre::bail!("doses CSV row {} ends before it starts", idx + 2);
            }
            _ => {}
        }
    }
    Ok(rows)
}

pub fn load_carbs_csv(path: &Path) -> eyre::Result<Vec<CarbRow>> {
    let rows: Vec<CarbRow> = load_csv(
        path,
        "carbs",
        &[&["time", "grams"], &["time", "grams", "absorption_min"]],
    )?;
    ensure_ordered(&rows, "carbs", |r| r.time)?;
    for (idx, r) in rows.iter().enumerate() {
        if r.grams < 0.0 || !r.grams.is_finite() {
            eyre::bail!("carbs CSV row {} must have grams >= 0", idx + 2);
        }
        if let Some(m) = r.absorption_min
            && m <= 0.0
        {
            eyre::bail!("carbs CSV row {} must have absorption_min > 0", idx + 2);
        }
    }
    Ok(rows)
}
