//! Loop cycle phases.

use std::fmt;

/// Where a cycle is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    FetchingInputs,
    ComputingEffects,
    Correcting,
    Predicting,
    Recommending,
    Done,
    Failed,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingInputs => "fetching_inputs",
            Self::ComputingEffects => "computing_effects",
            Self::Correcting => "correcting",
            Self::Predicting => "predicting",
            Self::Recommending => "recommending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `Done` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
