//! Event model - the plan's audit trail.

use serde::{Deserialize, Serialize};

use crate::plan::PlanStatus;
use crate::Time;

/// Something that happened to a plan, in the order it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEvent {
    /// Position in the log, starting at 0
    pub seq: u64,

    /// When it happened
    pub at: Time,

    /// What happened
    pub kind: EventKind,
}

/// Kinds of plan events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// Task appended to the plan
    TaskAdded {
        /// Task name
        task: String,
        /// Phase that added it
        phase: Option<String>,
    },

    /// Dependencies satisfied
    TaskReady {
        /// Task name
        task: String,
    },

    /// Dispatched to the runner
    TaskStarted {
        /// Task name
        task: String,
        /// Attempt number, from 1
        attempt: u32,
    },

    /// Result accepted
    TaskCompleted {
        /// Task name
        task: String,
        /// Attempt that succeeded
        attempt: u32,
    },

    /// Attempt rejected, task re-queued
    TaskRetrying {
        /// Task name
        task: String,
        /// Attempt that was rejected
        attempt: u32,
        /// Diagnostic fed back to the next attempt
        reason: String,
    },

    /// Attempt rejected, no retry
    TaskFailed {
        /// Task name
        task: String,
        /// Last attempt
        attempt: u32,
        /// Final diagnostic
        reason: String,
    },

    /// Never attempted
    TaskSkipped {
        /// Task name
        task: String,
        /// Names the failed dependency
        reason: String,
    },

    /// Put back to pending by a phase retry
    TaskReset {
        /// Task name
        task: String,
    },

    /// Phase controller entered a phase
    PhaseEntered {
        /// Phase name
        phase: String,
        /// 0 on entry, then the retry number
        iteration: u32,
    },

    /// Gate verdict
    GateEvaluated {
        /// Phase name
        phase: String,
        /// Whether the gate passed
        passed: bool,
        /// Gate diagnostic
        diagnostic: String,
    },

    /// Phase sent back for revision
    PhaseRetried {
        /// Phase name
        phase: String,
        /// Retry number, from 1
        retry: u32,
        /// Tasks reset to pending
        tasks: Vec<String>,
    },

    /// Phase gate exhausted its retries
    PhaseEscalated {
        /// Phase name
        phase: String,
        /// Escalation diagnostic
        diagnostic: String,
    },

    /// Plan reached a terminal status
    PlanFinished {
        /// Final status
        status: PlanStatus,
    },
}

impl EventKind {
    /// Task the event is about, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::TaskAdded { task, .. }
            | Self::TaskReady { task }
            | Self::TaskStarted { task, .. }
            | Self::TaskCompleted { task, .. }
            | Self::TaskRetrying { task, .. }
            | Self::TaskFailed { task, .. }
            | Self::TaskSkipped { task, .. }
            | Self::TaskReset { task } => Some(task),
            _ => None,
        }
    }
}
