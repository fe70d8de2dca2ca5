//! Phase model - ordered stages of a plan, each closed by a quality gate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::snapshot::PlanSnapshot;
use crate::task::{Context, Task};

/// Verdict of a phase gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the phase may advance
    pub pass: bool,

    /// Human-readable explanation
    pub diagnostic: String,

    /// Tasks to send back for revision when the gate fails
    pub tasks_to_retry: Vec<String>,
}

impl GateVerdict {
    /// Passing verdict.
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            pass: true,
            diagnostic: diagnostic.into(),
            tasks_to_retry: Vec::new(),
        }
    }

    /// Failing verdict naming the tasks to revise.
    pub fn fail(diagnostic: impl Into<String>, tasks_to_retry: Vec<String>) -> Self {
        Self {
            pass: false,
            diagnostic: diagnostic.into(),
            tasks_to_retry,
        }
    }
}

/// What a gate gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    /// Phase being judged
    pub phase: &'a str,

    /// Plan state after the phase's tasks settled
    pub snapshot: &'a PlanSnapshot,

    /// Tasks added by this phase, in insertion order
    pub phase_tasks: &'a [String],

    /// Retry cycles already spent on this phase
    pub iteration: u32,
}

impl<'a> GateContext<'a> {
    /// Snapshots of this phase's tasks.
    pub fn tasks(&self) -> impl Iterator<Item = &'a crate::TaskSnapshot> + 'a {
        let snapshot = self.snapshot;
        let names = self.phase_tasks;
        names.iter().filter_map(move |n| snapshot.task(n))
    }
}

/// Pass/fail check over completed results.
pub trait PhaseGate: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "gate"
    }

    /// Judge the phase.
    fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict;
}

/// Produces the tasks of a phase.
///
/// Must be deterministic for a given snapshot so retries are reproducible.
pub trait TaskFactory: Send + Sync {
    /// Tasks to add when the phase is entered.
    fn build(&self, snapshot: &PlanSnapshot) -> Vec<Task>;

    /// Context patches for tasks being sent back after a failed gate.
    fn revise(&self, _snapshot: &PlanSnapshot, _verdict: &GateVerdict) -> Vec<(String, Context)> {
        Vec::new()
    }
}

impl<F> TaskFactory for F
where
    F: Fn(&PlanSnapshot) -> Vec<Task> + Send + Sync,
{
    fn build(&self, snapshot: &PlanSnapshot) -> Vec<Task> {
        self(snapshot)
    }
}

/// Factory returning a fixed task list.
pub struct StaticTasks(Vec<Task>);

impl StaticTasks {
    /// Wrap a task list.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self(tasks)
    }

    /// The wrapped tasks.
    pub fn tasks(&self) -> &[Task] {
        &self.0
    }
}

impl TaskFactory for StaticTasks {
    fn build(&self, _snapshot: &PlanSnapshot) -> Vec<Task> {
        self.0.clone()
    }
}

/// An ordered stage of a plan.
#[derive(Clone)]
pub struct Phase {
    /// Phase name
    pub name: String,

    /// Source of the phase's tasks
    pub factory: Arc<dyn TaskFactory>,

    /// Exit check; absent means the phase always advances
    pub gate: Option<Arc<dyn PhaseGate>>,

    /// Retry cycles allowed after a failed gate
    pub max_phase_iterations: u32,
}

impl Phase {
    /// Create a phase without a gate.
    pub fn new(name: impl Into<String>, factory: Arc<dyn TaskFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
            gate: None,
            max_phase_iterations: 1,
        }
    }

    /// Phase over a fixed task list.
    pub fn with_tasks(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self::new(name, Arc::new(StaticTasks::new(tasks)))
    }

    /// Set the gate.
    pub fn with_gate(mut self, gate: Arc<dyn PhaseGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_iterations(mut self, max_phase_iterations: u32) -> Self {
        self.max_phase_iterations = max_phase_iterations;
        self
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("gate", &self.gate.as_ref().map(|g| g.name().to_string()))
            .field("max_phase_iterations", &self.max_phase_iterations)
            .finish()
    }
}
