//! Plan model - every task of one generation run plus its execution state.
//!
//! The plan is the only mutable shared state in the engine. All status
//! transitions go through the methods below so that each one is recorded in
//! the event log and checked against the task lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::event::{EventKind, PlanEvent};
use crate::id::PlanId;
use crate::snapshot::{PlanProgress, PlanSnapshot, TaskSnapshot};
use crate::task::{Task, TaskStatus};
use crate::Time;

/// Errors raised by plan operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Name already taken
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    /// No task with that name
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Transition not allowed from the current status
    #[error("task {task} cannot go from {from} to {to}")]
    InvalidTransition {
        /// Task name
        task: String,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// Plan already finished
    #[error("plan {0} is closed")]
    PlanClosed(PlanId),

    /// Results requested before the plan finished
    #[error("plan {0} is not terminal yet")]
    NotTerminal(PlanId),
}

/// Global plan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Accepting tasks, being drained
    Open,
    /// Every required task completed
    Done,
    /// Failure or deadlock left required work undone
    Blocked,
    /// A phase gate exhausted its retries
    Escalated,
}

impl PlanStatus {
    /// Anything but `Open`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Escalated => "escalated",
        })
    }
}

/// The aggregate of all tasks for one run.
#[derive(Debug)]
pub struct Plan {
    id: PlanId,
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    status: PlanStatus,
    events: Vec<PlanEvent>,
    created_at: Time,
}

impl Plan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::with_id(PlanId::new())
    }

    /// Create an empty plan with a caller-chosen id.
    pub fn with_id(id: PlanId) -> Self {
        Self {
            id,
            tasks: Vec::new(),
            index: HashMap::new(),
            status: PlanStatus::Open,
            events: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Plan id.
    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Global status.
    pub fn status(&self) -> PlanStatus {
        self.status
    }

    /// Creation time.
    pub fn created_at(&self) -> Time {
        self.created_at
    }

    /// Whether the plan has been declared finished.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append one task.
    pub fn add_task(&mut self, task: Task) -> Result<(), PlanError> {
        self.add_tasks(std::iter::once(task)).map(|_| ())
    }

    /// Append tasks in order. Either all are added or none is.
    pub fn add_tasks(
        &mut self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Vec<String>, PlanError> {
        if self.is_terminal() {
            return Err(PlanError::PlanClosed(self.id));
        }

        let tasks: Vec<Task> = tasks.into_iter().collect();
        let mut incoming = std::collections::HashSet::new();
        for task in &tasks {
            if self.index.contains_key(&task.name) || !incoming.insert(task.name.as_str()) {
                return Err(PlanError::DuplicateTask(task.name.clone()));
            }
        }

        let mut names = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            task.status = TaskStatus::Pending;
            task.attempt = 0;
            task.result = None;
            task.error = None;
            task.blocked_by = None;
            task.max_iterations = task.max_iterations.max(1);

            self.record(EventKind::TaskAdded {
                task: task.name.clone(),
                phase: task.phase.clone(),
            });
            self.index.insert(task.name.clone(), self.tasks.len());
            names.push(task.name.clone());
            self.tasks.push(task);
        }
        Ok(names)
    }

    /// Look up a task.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// Insertion position of a task.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Status of a task.
    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.task(name).map(Task::status)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Task names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    /// Number of tasks with a status.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Status counts.
    pub fn progress(&self) -> PlanProgress {
        PlanProgress::from_statuses(self.tasks.iter().map(|t| t.status))
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            plan_id: self.id,
            status: self.status,
            taken_at: chrono::Utc::now(),
            tasks: self.tasks.iter().map(TaskSnapshot::from).collect(),
        }
    }

    /// Results of every completed task, keyed by name.
    ///
    /// Failed and skipped tasks are omitted; consult [`Plan::snapshot`] for them.
    pub fn collect_results(&self) -> Result<BTreeMap<String, Value>, PlanError> {
        if !self.is_terminal() {
            return Err(PlanError::NotTerminal(self.id));
        }
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.result.clone().map(|r| (t.name.clone(), r)))
            .collect())
    }

    /// Event log.
    pub fn events(&self) -> &[PlanEvent] {
        &self.events
    }

    /// Append an event.
    pub fn record(&mut self, kind: EventKind) {
        let seq = self.events.len() as u64;
        self.events.push(PlanEvent {
            seq,
            at: chrono::Utc::now(),
            kind,
        });
    }

    // === Transitions ===

    /// `pending → ready`. No-op when already ready.
    pub fn mark_ready(&mut self, name: &str) -> Result<(), PlanError> {
        let task = self.task_mut(name)?;
        match task.status {
            TaskStatus::Ready => Ok(()),
            TaskStatus::Pending => {
                task.status = TaskStatus::Ready;
                self.record(EventKind::TaskReady {
                    task: name.to_string(),
                });
                Ok(())
            }
            from => Err(invalid(name, from, TaskStatus::Ready)),
        }
    }

    /// `pending|ready → running`, consuming one attempt. Returns the attempt number.
    pub fn begin_attempt(&mut self, name: &str) -> Result<u32, PlanError> {
        let task = self.task_mut(name)?;
        if !task.status.is_schedulable() || !task.has_budget() {
            return Err(invalid(name, task.status, TaskStatus::Running));
        }
        task.status = TaskStatus::Running;
        task.attempt += 1;
        let attempt = task.attempt;
        self.record(EventKind::TaskStarted {
            task: name.to_string(),
            attempt,
        });
        Ok(attempt)
    }

    /// `running → completed` with the accepted result.
    pub fn complete(&mut self, name: &str, result: Value) -> Result<(), PlanError> {
        let task = self.running_mut(name, TaskStatus::Completed)?;
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.error = None;
        let attempt = task.attempt;
        self.record(EventKind::TaskCompleted {
            task: name.to_string(),
            attempt,
        });
        Ok(())
    }

    /// `running → pending` for another attempt, recording the diagnostic as
    /// revision feedback.
    pub fn requeue(&mut self, name: &str, reason: &str) -> Result<(), PlanError> {
        let task = self.running_mut(name, TaskStatus::Pending)?;
        if !task.has_budget() {
            return Err(invalid(name, TaskStatus::Running, TaskStatus::Pending));
        }
        task.status = TaskStatus::Pending;
        task.error = Some(reason.to_string());
        task.push_feedback(reason);
        let attempt = task.attempt;
        self.record(EventKind::TaskRetrying {
            task: name.to_string(),
            attempt,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// `running → failed`.
    pub fn fail(&mut self, name: &str, reason: &str) -> Result<(), PlanError> {
        let task = self.running_mut(name, TaskStatus::Failed)?;
        task.status = TaskStatus::Failed;
        task.error = Some(reason.to_string());
        let attempt = task.attempt;
        self.record(EventKind::TaskFailed {
            task: name.to_string(),
            attempt,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// `pending|ready → skipped` because `root` failed.
    pub fn skip(&mut self, name: &str, root: &str) -> Result<(), PlanError> {
        let task = self.task_mut(name)?;
        if !task.status.is_schedulable() {
            return Err(invalid(name, task.status, TaskStatus::Skipped));
        }
        let reason = format!("blocked by failed dependency `{root}`");
        task.status = TaskStatus::Skipped;
        task.blocked_by = Some(root.to_string());
        task.error = Some(reason.clone());
        self.record(EventKind::TaskSkipped {
            task: name.to_string(),
            reason,
        });
        Ok(())
    }

    /// Put a finished task back to `pending` for a phase revision.
    ///
    /// The attempt count is kept. If the budget is already spent, the ceiling
    /// is raised by one so the next dispatch stays within it. Running tasks
    /// are left alone and reported as not reset.
    pub fn reset_for_revision(
        &mut self,
        name: &str,
        feedback: Option<&str>,
    ) -> Result<bool, PlanError> {
        let task = self.task_mut(name)?;
        if task.status == TaskStatus::Running {
            return Ok(false);
        }
        task.status = TaskStatus::Pending;
        task.result = None;
        task.blocked_by = None;
        if !task.has_budget() {
            task.max_iterations = task.attempt + 1;
        }
        if let Some(message) = feedback {
            task.push_feedback(message);
        }
        self.record(EventKind::TaskReset {
            task: name.to_string(),
        });
        Ok(true)
    }

    /// Insert a context entry on a task, in any status. Overwrites an
    /// existing key.
    pub fn merge_context(&mut self, name: &str, key: &str, value: Value) -> Result<(), PlanError> {
        let task = self.task_mut(name)?;
        task.context.insert(key.to_string(), value);
        Ok(())
    }

    /// Declare the plan finished. Later calls keep the first verdict.
    pub fn finish(&mut self, status: PlanStatus) {
        if self.is_terminal() || status == PlanStatus::Open {
            return;
        }
        self.status = status;
        self.record(EventKind::PlanFinished { status });
    }

    fn task_mut(&mut self, name: &str) -> Result<&mut Task, PlanError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(PlanError::UnknownTask(name.to_string())),
        }
    }

    fn running_mut(&mut self, name: &str, to: TaskStatus) -> Result<&mut Task, PlanError> {
        let task = self.task_mut(name)?;
        if task.status != TaskStatus::Running {
            return Err(invalid(name, task.status, to));
        }
        Ok(task)
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(name: &str, from: TaskStatus, to: TaskStatus) -> PlanError {
    PlanError::InvalidTransition {
        task: name.to_string(),
        from,
        to,
    }
}
