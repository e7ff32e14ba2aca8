//! History fan-out with a shared deadline.
//!
//! Each query runs on its own thread and reports back over a bounded channel.
//! `fetch_all` waits for every reply (or the deadline) before returning, so
//! effect computation never starts on a partial set of inputs. A worker that
//! misses the deadline is left to finish on its own; its send fails once the
//! receiver is gone.

use chrono::{DateTime, Utc};
use crossbeam_channel as xch;
use glucoloop_traits::{
    CarbEntry, CarbHistory, DoseEntry, DoseHistory, GlucoseHistory, GlucoseSample, TimeRange,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::LoopError;

/// Shared handles to the history collaborators.
#[derive(Clone)]
pub struct Providers {
    pub glucose: Arc<dyn GlucoseHistory + Send + Sync>,
    pub doses: Arc<dyn DoseHistory + Send + Sync>,
    pub carbs: Arc<dyn CarbHistory + Send + Sync>,
}

/// Ranges for one cycle's queries. `carbs` is `None` when the carb effect is cached.
#[derive(Debug, Clone, Copy)]
pub struct FetchPlan {
    pub glucose: TimeRange,
    pub doses: TimeRange,
    pub carbs: Option<TimeRange>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedInputs {
    pub glucose: Vec<GlucoseSample>,
    pub doses: Vec<DoseEntry>,
    pub carbs: Option<Vec<CarbEntry>>,
    pub pump_status_date: Option<DateTime<Utc>>,
}

type Reply<T> = Result<T, String>;

fn spawn_query<T, F>(what: &'static str, query: F) -> xch::Receiver<Reply<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Reply<T> + Send + 'static,
{
    let (tx, rx) = xch::bounded(1);
    std::thread::spawn(move || {
        let reply = query();
        if tx.send(reply).is_err() {
            tracing::debug!(what, "fetch consumer gone, dropping late reply");
        }
    });
    rx
}

fn wait<T>(what: &'static str, rx: &xch::Receiver<Reply<T>>, deadline: Instant) -> Result<T, LoopError> {
    match rx.recv_deadline(deadline) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(cause)) => Err(LoopError::EffectUnavailable(format!("{what} history: {cause}"))),
        Err(xch::RecvTimeoutError::Timeout) => {
            Err(LoopError::EffectUnavailable(format!("{what} fetch timed out")))
        }
        Err(xch::RecvTimeoutError::Disconnected) => Err(LoopError::EffectUnavailable(format!(
            "{what} fetch worker exited without replying"
        ))),
    }
}

/// Run the planned queries concurrently and join on all of them.
pub fn fetch_all(
    providers: &Providers,
    plan: FetchPlan,
    timeout: Duration,
) -> Result<FetchedInputs, LoopError> {
    let deadline = Instant::now() + timeout;

    let glucose_rx = {
        let p = Arc::clone(&providers.glucose);
        spawn_query("glucose", move || {
            p.glucose_samples(plan.glucose).map_err(|e| e.to_string())
        })
    };
    let doses_rx = {
        let p = Arc::clone(&providers.doses);
        spawn_query("dose", move || {
            let doses = p.dose_history(plan.doses).map_err(|e| e.to_string())?;
            let status = p.pump_status_date().map_err(|e| e.to_string())?;
            Ok((doses, status))
        })
    };
    let carbs_rx = plan.carbs.map(|range| {
        let p = Arc::clone(&providers.carbs);
        spawn_query("carb", move || p.carb_history(range).map_err(|e| e.to_string()))
    });

    // Barrier: collect every reply before looking at any error.
    let glucose = wait("glucose", &glucose_rx, deadline);
    let doses = wait("dose", &doses_rx, deadline);
    let carbs = carbs_rx.map(|rx| wait("carb", &rx, deadline)).transpose();

    let glucose = glucose?;
    let (doses, pump_status_date) = doses?;
    let carbs = carbs?;
    tracing::debug!(
        glucose = glucose.len(),
        doses = doses.len(),
        carbs = carbs.as_ref().map(Vec::len),
        "history fetched"
    );
    Ok(FetchedInputs {
        glucose,
        doses,
        carbs,
        pump_status_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FailingStore, InMemoryCarbStore, InMemoryDoseStore, InMemoryGlucoseStore, SlowStore};
    use chrono::TimeDelta;

    fn plan() -> FetchPlan {
        let t0 = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::hours(1000);
        let range = TimeRange::new(t0 - TimeDelta::hours(1), t0);
        FetchPlan {
            glucose: range,
            doses: range,
            carbs: Some(range),
        }
    }

    #[test]
    fn joins_all_queries() {
        let providers = Providers {
            glucose: Arc::new(InMemoryGlucoseStore::default()),
            doses: Arc::new(InMemoryDoseStore::default()),
            carbs: Arc::new(InMemoryCarbStore::default()),
        };
        let got = fetch_all(&providers, plan(), Duration::from_secs(1)).unwrap();
        assert!(got.glucose.is_empty());
        assert_eq!(got.carbs, Some(vec![]));
    }

    #[test]
    fn provider_error_maps_to_effect_unavailable() {
        let providers = Providers {
            glucose: Arc::new(InMemoryGlucoseStore::default()),
            doses: Arc::new(FailingStore::new("pump offline")),
            carbs: Arc::new(InMemoryCarbStore::default()),
        };
        let err = fetch_all(&providers, plan(), Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err,
            LoopError::EffectUnavailable("dose history: pump offline".into())
        );
    }

    #[test]
    fn slow_provider_times_out() {
        let providers = Providers {
            glucose: Arc::new(SlowStore::new(
                InMemoryGlucoseStore::default(),
                Duration::from_millis(500),
            )),
            doses: Arc::new(InMemoryDoseStore::default()),
            carbs: Arc::new(InMemoryCarbStore::default()),
        };
        let start = Instant::now();
        let err = fetch_all(&providers, plan(), Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, LoopError::EffectUnavailable("glucose fetch timed out".into()));
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
