//! plotloom core data models.
//!
//! This crate defines the tasks, plans and phases that the execution layer
//! drives, plus the contracts (capability, validator, task factory, phase
//! gate) through which external collaborators plug in.

#![warn(missing_docs)]

// Identity
mod id;

// Tasks and what they run
pub mod capability;
mod task;

// Plan aggregate
mod plan;
mod snapshot;
mod event;
mod outcome;

// Phases
mod phase;

// Re-exports
pub use id::PlanId;

pub use capability::{BlockingCapability, Capability, CapabilityError, FnCapability};
pub use task::{Context, Dependency, Task, TaskStatus, Validation, Validator, REVISION_FEEDBACK_KEY};

pub use plan::{Plan, PlanError, PlanStatus};
pub use snapshot::{PlanProgress, PlanSnapshot, TaskSnapshot};
pub use event::{EventKind, PlanEvent};
pub use outcome::PlanOutcome;

pub use phase::{GateContext, GateVerdict, Phase, PhaseGate, StaticTasks, TaskFactory};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
