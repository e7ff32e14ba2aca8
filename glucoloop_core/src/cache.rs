//! Cached effect timelines with explicit invalidation.
//!
//! Each slot remembers the key it was computed for (the effect window or the
//! latest glucose time). A slot is reused only when the key matches and no
//! trigger has invalidated it since.
//!
//! The correction slot also keeps the controller state it started from, so an
//! invalidated correction is recomputed from that state instead of advancing
//! the integrator a second time for the same glucose sample.

use chrono::{DateTime, Utc};
use glucoloop_traits::{CarbEntry, GlucoseEffect};

use crate::effects::InsulinPulse;
use crate::retrospective::{Correction, RetrospectiveCorrectionState};

/// Upstream change that makes cached effects stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationTrigger {
    GlucoseChanged,
    CarbsChanged,
    DosesChanged,
    SettingsChanged,
    /// Run a cycle without invalidating anything.
    RunNow,
}

impl InvalidationTrigger {
    /// Slots dropped by this trigger.
    pub fn invalidates(&self) -> &'static [EffectSlot] {
        match self {
            Self::GlucoseChanged => &[
                EffectSlot::Momentum,
                EffectSlot::Carbs,
                EffectSlot::Retrospection,
            ],
            Self::CarbsChanged => &[EffectSlot::Carbs, EffectSlot::Retrospection],
            Self::DosesChanged | Self::SettingsChanged => &[
                EffectSlot::Insulin,
                EffectSlot::Carbs,
                EffectSlot::Counteraction,
                EffectSlot::Retrospection,
            ],
            Self::RunNow => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectSlot {
    Insulin,
    Carbs,
    Momentum,
    Counteraction,
    Retrospection,
}

/// Effect window start and the grid slot holding `now`.
pub type WindowKey = (DateTime<Utc>, DateTime<Utc>);

#[derive(Debug, Clone, PartialEq)]
pub struct CachedInsulin {
    pub key: WindowKey,
    pub pulses: Vec<InsulinPulse>,
    pub effect: Vec<GlucoseEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedCarbs {
    pub key: WindowKey,
    pub entries: Vec<CarbEntry>,
    pub effect: Vec<GlucoseEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMomentum {
    pub latest_glucose: DateTime<Utc>,
    pub effect: Vec<GlucoseEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedCorrection {
    pub latest_glucose: DateTime<Utc>,
    /// Controller state before the update for `latest_glucose`.
    pub state_before: RetrospectiveCorrectionState,
    /// `None` once invalidated.
    pub correction: Option<Correction>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectCache {
    pub(crate) insulin: Option<CachedInsulin>,
    pub(crate) carbs: Option<CachedCarbs>,
    pub(crate) momentum: Option<CachedMomentum>,
    pub(crate) retrospection: Option<CachedCorrection>,
    /// Set when the counteraction history must be rebuilt from scratch.
    pub(crate) counteraction_stale: bool,
}

impl EffectCache {
    pub fn invalidate(&mut self, slot: EffectSlot) {
        match slot {
            EffectSlot::Insulin => self.insulin = None,
            EffectSlot::Carbs => self.carbs = None,
            EffectSlot::Momentum => self.momentum = None,
            EffectSlot::Counteraction => self.counteraction_stale = true,
            EffectSlot::Retrospection => {
                if let Some(cached) = &mut self.retrospection {
                    cached.correction = None;
                }
            }
        }
    }

    pub fn apply(&mut self, trigger: InvalidationTrigger) {
        for slot in trigger.invalidates() {
            self.invalidate(*slot);
        }
    }

    pub fn insulin_for(&self, key: WindowKey) -> Option<&CachedInsulin> {
        self.insulin.as_ref().filter(|c| c.key == key)
    }

    pub fn carbs_for(&self, key: WindowKey) -> Option<&CachedCarbs> {
        self.carbs.as_ref().filter(|c| c.key == key)
    }

    pub fn momentum_for(&self, latest_glucose: DateTime<Utc>) -> Option<&CachedMomentum> {
        self.momentum
            .as_ref()
            .filter(|c| c.latest_glucose == latest_glucose)
    }

    pub fn correction_for(&self, latest_glucose: DateTime<Utc>) -> Option<&Correction> {
        self.retrospection
            .as_ref()
            .filter(|c| c.latest_glucose == latest_glucose)
            .and_then(|c| c.correction.as_ref())
    }

    /// State to recompute from when `latest_glucose` was already corrected once.
    pub fn correction_base(
        &self,
        latest_glucose: DateTime<Utc>,
    ) -> Option<&RetrospectiveCorrectionState> {
        self.retrospection
            .as_ref()
            .filter(|c| c.latest_glucose == latest_glucose)
            .map(|c| &c.state_before)
    }

    pub fn insulin_key(&self) -> Option<WindowKey> {
        self.insulin.as_ref().map(|c| c.key)
    }

    pub fn is_cached(&self, slot: EffectSlot) -> bool {
        match slot {
            EffectSlot::Insulin => self.insulin.is_some(),
            EffectSlot::Carbs => self.carbs.is_some(),
            EffectSlot::Momentum => self.momentum.is_some(),
            EffectSlot::Counteraction => !self.counteraction_stale,
            EffectSlot::Retrospection => self
                .retrospection
                .as_ref()
                .is_some_and(|c| c.correction.is_some()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrospectiveCfg;
    use crate::retrospective::UnavailableReason;
    use chrono::TimeDelta;

    fn filled() -> EffectCache {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let key = (t0, t0 + TimeDelta::hours(1));
        let state = RetrospectiveCorrectionState::new(&RetrospectiveCfg::default());
        EffectCache {
            insulin: Some(CachedInsulin {
                key,
                pulses: vec![],
                effect: vec![],
            }),
            carbs: Some(CachedCarbs {
                key,
                entries: vec![],
                effect: vec![],
            }),
            momentum: Some(CachedMomentum {
                latest_glucose: t0,
                effect: vec![],
            }),
            retrospection: Some(CachedCorrection {
                latest_glucose: t0,
                correction: Some(Correction::unavailable(UnavailableReason::TooFewSamples, &state)),
                state_before: state,
            }),
            counteraction_stale: false,
        }
    }

    #[test]
    fn glucose_keeps_insulin() {
        let mut c = filled();
        c.apply(InvalidationTrigger::GlucoseChanged);
        assert!(c.is_cached(EffectSlot::Insulin));
        assert!(!c.is_cached(EffectSlot::Carbs));
        assert!(!c.is_cached(EffectSlot::Momentum));
        assert!(c.is_cached(EffectSlot::Counteraction));
    }

    #[test]
    fn doses_drop_insulin_and_carbs_but_not_momentum() {
        let mut c = filled();
        c.apply(InvalidationTrigger::DosesChanged);
        assert!(!c.is_cached(EffectSlot::Insulin));
        assert!(!c.is_cached(EffectSlot::Carbs));
        assert!(c.is_cached(EffectSlot::Momentum));
        assert!(!c.is_cached(EffectSlot::Counteraction));
        assert!(!c.is_cached(EffectSlot::Retrospection));
    }

    #[test]
    fn invalidated_correction_keeps_its_starting_state() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let mut c = filled();
        assert!(c.correction_for(t0).is_some());
        c.apply(InvalidationTrigger::CarbsChanged);
        assert!(c.correction_for(t0).is_none());
        assert!(c.correction_base(t0).is_some());
        assert!(c.correction_base(t0 + TimeDelta::minutes(5)).is_none());
    }

    #[test]
    fn run_now_invalidates_nothing() {
        let mut c = filled();
        let before = c.clone();
        c.apply(InvalidationTrigger::RunNow);
        assert_eq!(c, before);
    }
}
