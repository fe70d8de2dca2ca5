//! Progress reporting.
//!
//! Per-phase progress, blocker detection and health alerts, all derived
//! from [`PlanSnapshot`](plotloom_core::PlanSnapshot)s.

#![warn(missing_docs)]

pub mod tracker;
pub mod blocker;
pub mod health;

pub use tracker::{PhaseProgress, ProgressReport};
pub use blocker::{
    Blocker, BlockerAnalysis, BlockerDetector, BlockerKind, BlockerStats, ResolutionAction,
    ResolutionSuggestion,
};
pub use health::{Alert, HealthReport, Severity};
