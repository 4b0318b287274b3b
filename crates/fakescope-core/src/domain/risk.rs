//! Static risk table for the four authenticity classes.

use serde::{Deserialize, Serialize};

/// Number of authenticity classes produced by the classification head.
pub const NUM_CLASSES: usize = 4;

/// Authenticity class, ordered by increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Zone A: untouched original.
    Real,
    /// Zone B: visually natural synthesis with structural drift.
    SleekFake,
    /// Zone C: visible noise and texture artifacts.
    NoisyFake,
    /// Zone D: collapsed structure, maximal perceptual distance.
    FailureFake,
}

impl RiskClass {
    /// All classes in index order.
    pub const ALL: [Self; NUM_CLASSES] = [
        Self::Real,
        Self::SleekFake,
        Self::NoisyFake,
        Self::FailureFake,
    ];

    /// Looks up the class for a head output index.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Index of this class in the classification head output.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable label.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Real => "Real",
            Self::SleekFake => "Sleek Fake",
            Self::NoisyFake => "Noisy Fake",
            Self::FailureFake => "Failure Fake",
        }
    }

    /// Severity tier label.
    #[must_use]
    pub const fn risk_level(self) -> &'static str {
        match self {
            Self::Real => "Safe",
            Self::SleekFake => "Low Risk",
            Self::NoisyFake => "Mid Risk",
            Self::FailureFake => "High Risk",
        }
    }
}
