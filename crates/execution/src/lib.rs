//! Execution layer - dependency resolution, selection, scheduling and the
//! phase loop.

#![warn(missing_docs)]

pub mod config;
pub mod selector;
pub mod dependency;
pub mod runner;
pub mod scheduler;
pub mod registry;
pub mod controller;

pub use config::{BackoffStrategy, EngineConfig, RetryBackoff};
pub use selector::{PrioritySelector, SelectorStrategy, TaskSelector};
pub use dependency::{DependencyMatcher, OrderError, Resolution};
pub use runner::{AttemptResult, ExecutionRunner, Invocation, TaskOutcome};
pub use scheduler::{DrainReport, Scheduler};
pub use registry::{CapabilityRegistry, RegistryError, TaskSpec};
pub use controller::{ControllerError, ControllerState, PhaseController};
