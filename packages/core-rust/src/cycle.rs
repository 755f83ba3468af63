//! Consecutive-rejection cycle tracking.
//!
//! The structured [`CycleState`] is the source of truth and is stored on the
//! item as-is. Display labels are rendered from it one way; the only parser,
//! [`extract_cycle`], exists to import labels written by older writers.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Rejections allowed before an item is blocked for manual intervention.
pub const MAX_CYCLES: u8 = 3;

/// Baseline label after an approval.
pub const APPROVED_LABEL: &str = "APPROVED";

/// Terminal label once the rejection limit is reached.
pub const BLOCKED_LABEL: &str = "BLOCKED - contact supervisor";

static CYCLE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cycle\s*(\d+)\s*/\s*\d+").expect("Invalid regex pattern for cycle label")
});

/// Rejection streak of an item since its last approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "cycle", rename_all = "snake_case")]
pub enum CycleState {
    /// No rejection since the last approval (or ever).
    #[default]
    Clean,
    /// Rejected `n` times in a row, `0 < n < MAX_CYCLES`.
    Rejected(u8),
    /// Limit reached. There is no increment path out of this state.
    Blocked,
}

impl CycleState {
    /// Builds the state for a raw cycle count.
    #[must_use]
    pub fn from_cycle(cycle: u8) -> Self {
        match cycle {
            0 => Self::Clean,
            n if n < MAX_CYCLES => Self::Rejected(n),
            _ => Self::Blocked,
        }
    }

    /// Number of consecutive rejections.
    #[must_use]
    pub fn cycle(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Rejected(n) => n,
            Self::Blocked => MAX_CYCLES,
        }
    }

    #[must_use]
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked)
    }

    /// State after one more rejection, or `None` when already blocked.
    #[must_use]
    pub fn after_rejection(self) -> Option<Self> {
        if self.is_blocked() {
            return None;
        }
        Some(Self::from_cycle(increment(self.cycle())))
    }

    /// Approval ends the streak.
    #[must_use]
    pub fn after_approval(self) -> Self {
        Self::Clean
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::Rejected(n) => write!(f, "rejected {n}/{MAX_CYCLES}"),
            Self::Blocked => f.write_str("blocked"),
        }
    }
}

/// Reads the cycle count out of a legacy status label, 0 when absent.
///
/// A legacy blocked label counts as the full limit.
#[must_use]
pub fn extract_cycle(label: &str) -> u8 {
    if label.to_ascii_uppercase().starts_with("BLOCKED") {
        return MAX_CYCLES;
    }
    CYCLE_LABEL_RE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .map_or(0, |n| n.min(MAX_CYCLES))
}

#[must_use]
pub fn increment(cycle: u8) -> u8 {
    cycle.saturating_add(1)
}

/// Label for an item whose rejection count just became `cycle`.
#[must_use]
pub fn build_rejected_label(cycle: u8) -> String {
    if cycle < MAX_CYCLES {
        format!("REJECTED (cycle {cycle}/{MAX_CYCLES})")
    } else {
        BLOCKED_LABEL.to_string()
    }
}

/// Label after an approval resets the streak.
#[must_use]
pub fn reset() -> &'static str {
    APPROVED_LABEL
}
