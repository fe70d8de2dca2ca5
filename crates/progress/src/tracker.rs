//! Progress tracking over plan snapshots.

use chrono::{DateTime, Utc};
use plotloom_core::{PlanId, PlanProgress, PlanSnapshot, PlanStatus, TaskSnapshot};
use serde::{Deserialize, Serialize};

/// Progress of the tasks one phase added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Phase name
    pub phase: String,

    /// Status counts
    pub progress: PlanProgress,

    /// Attempts spent by the phase's tasks
    pub attempts: u32,
}

/// A snapshot of progress at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Plan reported on
    pub plan_id: PlanId,

    /// Plan status when the snapshot was taken
    pub status: PlanStatus,

    /// When snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Counts across every task
    pub overall: PlanProgress,

    /// Per-phase counts, in the order phases first added tasks
    pub phases: Vec<PhaseProgress>,

    /// Total attempts spent
    pub attempts: u32,
}

impl ProgressReport {
    /// Build a report from a snapshot.
    pub fn from_snapshot(snapshot: &PlanSnapshot) -> Self {
        let mut order: Vec<&str> = Vec::new();
        for task in &snapshot.tasks {
            if let Some(phase) = task.phase.as_deref() {
                if !order.contains(&phase) {
                    order.push(phase);
                }
            }
        }

        let phases = order
            .into_iter()
            .map(|phase| {
                let tasks: Vec<&TaskSnapshot> = snapshot
                    .tasks
                    .iter()
                    .filter(|t| t.phase.as_deref() == Some(phase))
                    .collect();
                PhaseProgress {
                    phase: phase.to_string(),
                    progress: PlanProgress::from_statuses(tasks.iter().map(|t| t.status)),
                    attempts: tasks.iter().map(|t| t.attempt).sum(),
                }
            })
            .collect();

        Self {
            plan_id: snapshot.plan_id,
            status: snapshot.status,
            timestamp: snapshot.taken_at,
            overall: snapshot.progress(),
            phases,
            attempts: snapshot.tasks.iter().map(|t| t.attempt).sum(),
        }
    }

    /// Progress of one phase.
    pub fn phase(&self, name: &str) -> Option<&PhaseProgress> {
        self.phases.iter().find(|p| p.phase == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Context, Plan, Task, TaskStatus};
    use serde_json::Value;

    fn task(name: &str, phase: &str) -> Task {
        let mut task = Task::new(name, from_fn("noop", |_ctx: Context| async { Ok(Value::Null) }))
            .with_max_iterations(2);
        task.phase = Some(phase.to_string());
        task
    }

    #[test]
    fn test_report_groups_by_phase() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![
            task("synthesis", "planning"),
            task("scene_1", "drafting"),
            task("scene_2", "drafting"),
        ])
        .unwrap();

        plan.begin_attempt("synthesis").unwrap();
        plan.complete("synthesis", Value::Null).unwrap();
        plan.begin_attempt("scene_1").unwrap();
        plan.requeue("scene_1", "too short").unwrap();
        plan.begin_attempt("scene_1").unwrap();

        let report = ProgressReport::from_snapshot(&plan.snapshot());
        assert_eq!(report.overall.total, 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(
            report.phases.iter().map(|p| p.phase.as_str()).collect::<Vec<_>>(),
            vec!["planning", "drafting"]
        );

        let drafting = report.phase("drafting").unwrap();
        assert_eq!(drafting.progress.count(TaskStatus::Running), 1);
        assert_eq!(drafting.progress.count(TaskStatus::Pending), 1);
        assert_eq!(drafting.attempts, 2);
        assert_eq!(report.phase("planning").unwrap().progress.percentage, 100.0);
    }
}
