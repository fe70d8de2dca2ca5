//! Plan health alerts.

use plotloom_core::{PlanId, PlanSnapshot, PlanStatus, TaskStatus};
use serde::{Deserialize, Serialize};

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Low,
    /// Worth a look
    Medium,
    /// Plan cannot finish as is
    High,
    /// Needs a human
    Critical,
}

/// One health finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Urgency
    pub severity: Severity,
    /// Stable identifier, e.g. `failed_tasks`
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Tasks involved
    pub tasks: Vec<String>,
}

/// Health of a plan derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Plan reported on
    pub plan_id: PlanId,
    /// No alert above low severity
    pub healthy: bool,
    /// Findings, most severe first
    pub alerts: Vec<Alert>,
    /// Whether any alert is critical
    pub escalation_required: bool,
}

impl HealthReport {
    /// Inspect a snapshot.
    pub fn from_snapshot(snapshot: &PlanSnapshot) -> Self {
        let mut alerts = Vec::new();

        let failed: Vec<_> = snapshot.with_status(TaskStatus::Failed).collect();
        if !failed.is_empty() {
            let severity = if failed.iter().any(|t| t.required) {
                Severity::High
            } else {
                Severity::Medium
            };
            alerts.push(Alert {
                severity,
                code: "failed_tasks".to_string(),
                message: format!("{} task(s) failed", failed.len()),
                tasks: failed.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let skipped: Vec<String> = snapshot
            .with_status(TaskStatus::Skipped)
            .map(|t| t.name.clone())
            .collect();
        if !skipped.is_empty() {
            alerts.push(Alert {
                severity: if skipped.len() > 2 {
                    Severity::High
                } else {
                    Severity::Medium
                },
                code: "skipped_tasks".to_string(),
                message: format!("{} task(s) skipped behind failures", skipped.len()),
                tasks: skipped,
            });
        }

        let retried: Vec<String> = snapshot
            .tasks
            .iter()
            .filter(|t| t.attempt > 1)
            .map(|t| t.name.clone())
            .collect();
        if !retried.is_empty() {
            alerts.push(Alert {
                severity: Severity::Low,
                code: "retries".to_string(),
                message: format!("{} task(s) needed more than one attempt", retried.len()),
                tasks: retried,
            });
        }

        match snapshot.status {
            PlanStatus::Blocked => alerts.push(Alert {
                severity: Severity::High,
                code: "plan_blocked".to_string(),
                message: "plan is blocked".to_string(),
                tasks: Vec::new(),
            }),
            PlanStatus::Escalated => alerts.push(Alert {
                severity: Severity::Critical,
                code: "phase_escalated".to_string(),
                message: "a phase gate exhausted its retries".to_string(),
                tasks: Vec::new(),
            }),
            PlanStatus::Open | PlanStatus::Done => {}
        }

        alerts.sort_by(|a, b| b.severity.cmp(&a.severity));

        Self {
            plan_id: snapshot.plan_id,
            healthy: alerts.iter().all(|a| a.severity == Severity::Low),
            escalation_required: alerts.iter().any(|a| a.severity == Severity::Critical),
            alerts,
        }
    }

    /// Critical alerts.
    pub fn escalations(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(|a| a.severity == Severity::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Context, Plan, Task};
    use serde_json::Value;

    fn task(name: &str) -> Task {
        Task::new(name, from_fn("noop", |_ctx: Context| async { Ok(Value::Null) }))
            .with_max_iterations(3)
    }

    #[test]
    fn test_retries_alone_are_healthy() {
        let mut plan = Plan::new();
        plan.add_task(task("outline")).unwrap();
        plan.begin_attempt("outline").unwrap();
        plan.requeue("outline", "too vague").unwrap();
        plan.begin_attempt("outline").unwrap();
        plan.complete("outline", Value::Null).unwrap();
        plan.finish(PlanStatus::Done);

        let report = HealthReport::from_snapshot(&plan.snapshot());
        assert!(report.healthy);
        assert!(!report.escalation_required);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].code, "retries");
    }

    #[test]
    fn test_blocked_plan_alerts() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![task("arc"), task("scene_1").depends_on("arc")])
            .unwrap();
        plan.begin_attempt("arc").unwrap();
        plan.fail("arc", "fatal failure: boom").unwrap();
        plan.skip("scene_1", "arc").unwrap();
        plan.finish(PlanStatus::Blocked);

        let report = HealthReport::from_snapshot(&plan.snapshot());
        assert!(!report.healthy);
        let codes: Vec<&str> = report.alerts.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["failed_tasks", "plan_blocked", "skipped_tasks"]);
        assert_eq!(report.alerts[0].tasks, vec!["arc"]);
    }

    #[test]
    fn test_escalation_is_critical() {
        let mut plan = Plan::new();
        plan.add_task(task("draft")).unwrap();
        plan.finish(PlanStatus::Escalated);

        let report = HealthReport::from_snapshot(&plan.snapshot());
        assert!(report.escalation_required);
        assert_eq!(report.escalations().count(), 1);
        assert_eq!(report.alerts[0].code, "phase_escalated");
    }
}
