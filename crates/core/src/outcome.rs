//! Terminal outcome of driving a plan.

use serde::{Deserialize, Serialize};

use crate::plan::PlanStatus;
use crate::snapshot::PlanSnapshot;

/// How a plan ended. Always carries the full task snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Every required task completed
    Completed {
        /// Final task states
        snapshot: PlanSnapshot,
    },

    /// Failure or deadlock left required work undone
    Blocked {
        /// What is failed or stuck
        diagnostic: String,
        /// Final task states
        snapshot: PlanSnapshot,
    },

    /// A phase gate ran out of retries
    Escalated {
        /// Phase whose gate gave up
        phase: String,
        /// Last gate diagnostic
        diagnostic: String,
        /// Final task states
        snapshot: PlanSnapshot,
    },
}

impl PlanOutcome {
    /// Task states at the end of the run.
    pub fn snapshot(&self) -> &PlanSnapshot {
        match self {
            Self::Completed { snapshot }
            | Self::Blocked { snapshot, .. }
            | Self::Escalated { snapshot, .. } => snapshot,
        }
    }

    /// Why the run did not succeed.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Completed { .. } => None,
            Self::Blocked { diagnostic, .. } | Self::Escalated { diagnostic, .. } => {
                Some(diagnostic)
            }
        }
    }

    /// Whether the run completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Matching plan status.
    pub fn status(&self) -> PlanStatus {
        match self {
            Self::Completed { .. } => PlanStatus::Done,
            Self::Blocked { .. } => PlanStatus::Blocked,
            Self::Escalated { .. } => PlanStatus::Escalated,
        }
    }
}
