//! Immutable views of a plan, for gates, factories and observers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::id::PlanId;
use crate::plan::PlanStatus;
use crate::task::{Dependency, Task, TaskStatus};
use crate::Time;

/// Point-in-time copy of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task name
    pub name: String,
    /// Capability id
    pub capability: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Attempts dispatched so far
    pub attempt: u32,
    /// Attempt ceiling
    pub max_iterations: u32,
    /// Scheduling priority
    pub priority: i32,
    /// Dependency expressions
    pub dependencies: Vec<Dependency>,
    /// Whether the plan needs this task
    pub required: bool,
    /// Phase that added the task
    pub phase: Option<String>,
    /// Accepted result
    pub result: Option<Value>,
    /// Last diagnostic
    pub error: Option<String>,
    /// Failed task that caused a skip
    pub blocked_by: Option<String>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            capability: task.capability.id().to_string(),
            status: task.status,
            attempt: task.attempt,
            max_iterations: task.max_iterations,
            priority: task.priority,
            dependencies: task.dependencies.clone(),
            required: task.required,
            phase: task.phase.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            blocked_by: task.blocked_by.clone(),
        }
    }
}

/// Point-in-time copy of a whole plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    /// Plan the snapshot was taken from
    pub plan_id: PlanId,
    /// Plan status at the time
    pub status: PlanStatus,
    /// When the snapshot was taken
    pub taken_at: Time,
    /// Tasks in insertion order
    pub tasks: Vec<TaskSnapshot>,
}

impl PlanSnapshot {
    /// Look up a task.
    pub fn task(&self, name: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks with the given status.
    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskSnapshot> {
        self.tasks.iter().filter(move |t| t.status == status)
    }

    /// Tasks covered by a dependency expression.
    pub fn matching<'a>(&'a self, dependency: &'a Dependency) -> impl Iterator<Item = &'a TaskSnapshot> {
        self.tasks.iter().filter(move |t| dependency.matches(&t.name))
    }

    /// Result of a completed task.
    pub fn result(&self, name: &str) -> Option<&Value> {
        self.task(name)
            .filter(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.result.as_ref())
    }

    /// Results of every completed task, keyed by name.
    pub fn results(&self) -> BTreeMap<String, Value> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.result.clone().map(|r| (t.name.clone(), r)))
            .collect()
    }

    /// Status counts.
    pub fn progress(&self) -> PlanProgress {
        PlanProgress::from_statuses(self.tasks.iter().map(|t| t.status))
    }
}

/// Status counts for a set of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    /// All tasks
    pub total: usize,
    /// Pending tasks
    pub pending: usize,
    /// Ready tasks
    pub ready: usize,
    /// Running tasks
    pub running: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub failed: usize,
    /// Skipped tasks
    pub skipped: usize,

    /// Share of tasks in a terminal status (0-100)
    pub percentage: f32,
}

impl PlanProgress {
    /// Count a sequence of statuses.
    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut progress = Self::default();
        for status in statuses {
            progress.total += 1;
            match status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::Ready => progress.ready += 1,
                TaskStatus::Running => progress.running += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
                TaskStatus::Skipped => progress.skipped += 1,
            }
        }
        if progress.total > 0 {
            let terminal = progress.completed + progress.failed + progress.skipped;
            progress.percentage = terminal as f32 / progress.total as f32 * 100.0;
        }
        progress
    }

    /// Count for one status.
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Ready => self.ready,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Skipped => self.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let progress = PlanProgress::from_statuses([
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Pending,
        ]);
        assert_eq!(progress.total, 4);
        assert_eq!(progress.count(TaskStatus::Completed), 2);
        assert_eq!(progress.failed, 1);
        assert!((progress.percentage - 75.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_empty_progress() {
        let progress = PlanProgress::from_statuses(Vec::new());
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percentage, 0.0);
    }
}
