//! Phase controller - runs phases in order and enforces their gates.
//!
//! ```text
//! Enter phase → Add tasks → Drain → Gate ─ pass ─→ next phase
//!                              ↑          │
//!                              └─ retry ──┘ fail (budget left)
//!                                          fail (no budget) → escalate
//! ```

use plotloom_core::{
    EventKind, GateContext, GateVerdict, Phase, Plan, PlanError, PlanOutcome, PlanStatus,
    TaskStatus,
};
use std::collections::HashSet;
use tracing::{info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::dependency::Resolution;
use crate::scheduler::{outcome, Scheduler};

/// Errors raised by the phase controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Plan rejected an operation
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The controller already ran
    #[error("phase controller already ran")]
    AlreadyRun,
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    /// `run` not called yet
    NotStarted,
    /// Draining the tasks of a phase
    Running(String),
    /// Evaluating a phase gate
    GateEvaluating(String),
    /// Gate passed, moving on
    Advancing(String),
    /// Gate failed, phase sent back
    Retrying(String),
    /// Gate failed with no retries left
    Escalated(String),
    /// Every phase passed its gate
    AllPhasesComplete,
}

/// Runs an ordered list of phases against one plan.
pub struct PhaseController {
    phases: Vec<Phase>,
    scheduler: Scheduler,
    state: ControllerState,
    global_retries: u32,
}

impl PhaseController {
    /// Create a controller over `phases`.
    pub fn new(phases: Vec<Phase>, config: EngineConfig) -> Self {
        Self::with_scheduler(phases, Scheduler::new(config))
    }

    /// Create a controller using a preconfigured scheduler.
    pub fn with_scheduler(phases: Vec<Phase>, scheduler: Scheduler) -> Self {
        Self {
            phases,
            scheduler,
            state: ControllerState::NotStarted,
            global_retries: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Phase retries spent across the plan.
    pub fn global_retries(&self) -> u32 {
        self.global_retries
    }

    /// Phases being run.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Run every phase, then finish the plan.
    pub async fn run(&mut self, plan: &mut Plan) -> Result<PlanOutcome, ControllerError> {
        if self.state != ControllerState::NotStarted {
            return Err(ControllerError::AlreadyRun);
        }

        let span = info_span!("plan", plan_id = %plan.id(), phases = self.phases.len());
        self.run_phases(plan).instrument(span).await
    }

    async fn run_phases(&mut self, plan: &mut Plan) -> Result<PlanOutcome, ControllerError> {
        let phases = self.phases.clone();
        for phase in &phases {
            if let Some(outcome) = self
                .run_phase(plan, phase)
                .instrument(info_span!("phase", phase = %phase.name))
                .await?
            {
                return Ok(outcome);
            }
        }

        self.state = ControllerState::AllPhasesComplete;
        let (status, diagnostic) = self.scheduler.classify(plan, None);
        plan.finish(status);
        info!(%status, retries = self.global_retries, "All phases processed");
        Ok(outcome(plan, status, diagnostic, None))
    }

    /// Run one phase to a passing gate. Returns an outcome when the plan
    /// ends inside this phase.
    async fn run_phase(
        &mut self,
        plan: &mut Plan,
        phase: &Phase,
    ) -> Result<Option<PlanOutcome>, ControllerError> {
        self.state = ControllerState::Running(phase.name.clone());
        plan.record(EventKind::PhaseEntered {
            phase: phase.name.clone(),
            iteration: 0,
        });

        let tasks = phase
            .factory
            .build(&plan.snapshot())
            .into_iter()
            .map(|mut task| {
                task.phase = Some(phase.name.clone());
                task
            });
        let phase_tasks = plan.add_tasks(tasks)?;
        info!(tasks = phase_tasks.len(), "Entered phase");

        let mut retries = 0;
        loop {
            let report = self.scheduler.drain(plan).await;
            if let Some(halted) = report.halted_by.as_deref() {
                let (status, diagnostic) = self.scheduler.classify(plan, Some(halted));
                plan.finish(status);
                return Ok(Some(outcome(plan, status, diagnostic, None)));
            }

            if let Some(diagnostic) = self.stalled(plan, &phase_tasks) {
                warn!(%diagnostic, "Phase cannot make progress");
                plan.finish(PlanStatus::Blocked);
                return Ok(Some(outcome(plan, PlanStatus::Blocked, Some(diagnostic), None)));
            }

            self.state = ControllerState::GateEvaluating(phase.name.clone());
            let snapshot = plan.snapshot();
            let verdict = match &phase.gate {
                Some(gate) => gate.evaluate(&GateContext {
                    phase: &phase.name,
                    snapshot: &snapshot,
                    phase_tasks: &phase_tasks,
                    iteration: retries,
                }),
                None => GateVerdict::pass("no gate"),
            };
            plan.record(EventKind::GateEvaluated {
                phase: phase.name.clone(),
                passed: verdict.pass,
                diagnostic: verdict.diagnostic.clone(),
            });

            if verdict.pass {
                info!(diagnostic = %verdict.diagnostic, "Gate passed");
                self.state = ControllerState::Advancing(phase.name.clone());
                return Ok(None);
            }

            let global_max = self.scheduler.config().max_global_iterations;
            if retries >= phase.max_phase_iterations || self.global_retries >= global_max {
                warn!(
                    diagnostic = %verdict.diagnostic,
                    retries,
                    global_retries = self.global_retries,
                    "Gate failed with no retries left, escalating"
                );
                self.state = ControllerState::Escalated(phase.name.clone());
                let diagnostic = format!(
                    "phase `{}` failed its gate after {} retr{}: {}",
                    phase.name,
                    retries,
                    if retries == 1 { "y" } else { "ies" },
                    verdict.diagnostic
                );
                plan.record(EventKind::PhaseEscalated {
                    phase: phase.name.clone(),
                    diagnostic: diagnostic.clone(),
                });
                plan.finish(PlanStatus::Escalated);
                return Ok(Some(outcome(
                    plan,
                    PlanStatus::Escalated,
                    Some(diagnostic),
                    Some(phase.name.clone()),
                )));
            }

            retries += 1;
            self.global_retries += 1;
            self.state = ControllerState::Retrying(phase.name.clone());
            let reset = self.send_back(plan, phase, &phase_tasks, &snapshot, &verdict)?;
            info!(
                retry = retries,
                diagnostic = %verdict.diagnostic,
                tasks = ?reset,
                "Gate failed, retrying phase"
            );
            plan.record(EventKind::PhaseRetried {
                phase: phase.name.clone(),
                retry: retries,
                tasks: reset,
            });
            plan.record(EventKind::PhaseEntered {
                phase: phase.name.clone(),
                iteration: retries,
            });
            self.state = ControllerState::Running(phase.name.clone());
        }
    }

    /// Reset the tasks a failed gate names, plus anything skipped because of
    /// them, and apply the factory's context patches.
    fn send_back(
        &self,
        plan: &mut Plan,
        phase: &Phase,
        phase_tasks: &[String],
        snapshot: &plotloom_core::PlanSnapshot,
        verdict: &GateVerdict,
    ) -> Result<Vec<String>, ControllerError> {
        let targets: Vec<String> = if verdict.tasks_to_retry.is_empty() {
            phase_tasks
                .iter()
                .filter(|n| {
                    matches!(
                        plan.status_of(n),
                        Some(TaskStatus::Failed | TaskStatus::Skipped)
                    )
                })
                .cloned()
                .collect()
        } else {
            verdict.tasks_to_retry.clone()
        };

        let mut reset = Vec::new();
        let mut roots = HashSet::new();
        for name in &targets {
            if plan.task(name).is_none() {
                warn!(task = %name, "Gate named an unknown task");
                continue;
            }
            if plan.reset_for_revision(name, Some(&verdict.diagnostic))? {
                roots.insert(name.clone());
                reset.push(name.clone());
            }
        }

        let dependents: Vec<String> = plan
            .tasks()
            .filter(|t| t.status() == TaskStatus::Skipped)
            .filter(|t| t.blocked_by().is_some_and(|root| roots.contains(root)))
            .map(|t| t.name.clone())
            .collect();
        for name in dependents {
            if plan.reset_for_revision(&name, None)? {
                reset.push(name);
            }
        }

        for (name, patch) in phase.factory.revise(snapshot, verdict) {
            if plan.task(&name).is_none() {
                warn!(task = %name, "Revision patch for unknown task");
                continue;
            }
            for (key, value) in patch {
                plan.merge_context(&name, &key, value)?;
            }
        }

        Ok(reset)
    }

    /// Diagnostic when a phase's tasks are stuck for a reason other than
    /// waiting on tasks a later phase may still add.
    fn stalled(&self, plan: &Plan, phase_tasks: &[String]) -> Option<String> {
        let deferred = self.deferred(plan);
        let stuck: Vec<String> = phase_tasks
            .iter()
            .filter_map(|name| plan.task(name))
            .filter(|t| t.status().is_schedulable())
            .filter(|t| !deferred.contains(t.name.as_str()))
            .map(|t| t.name.clone())
            .collect();

        if stuck.is_empty() {
            return None;
        }
        let (_, diagnostic) = self.scheduler.classify(plan, None);
        Some(diagnostic.unwrap_or_else(|| format!("tasks never started: {}", stuck.join(", "))))
    }

    /// Schedulable tasks that could still run once a later phase adds
    /// matches: those waiting only on expressions with no match, and,
    /// transitively, those waiting only on deferred tasks.
    fn deferred<'p>(&self, plan: &'p Plan) -> HashSet<&'p str> {
        let matcher = self.scheduler.matcher();
        let waiting: Vec<(&str, Vec<String>)> = plan
            .tasks()
            .filter(|t| t.status().is_schedulable())
            .filter_map(|t| match matcher.check(plan, t) {
                Resolution::Waiting { absent, unfinished } => {
                    Some((t.name.as_str(), absent, unfinished))
                }
                _ => None,
            })
            .filter(|(_, absent, unfinished)| !absent.is_empty() || !unfinished.is_empty())
            .map(|(name, _, unfinished)| (name, unfinished))
            .collect();

        let mut deferred: HashSet<&str> = waiting
            .iter()
            .filter(|(_, unfinished)| unfinished.is_empty())
            .map(|(name, _)| *name)
            .collect();

        loop {
            let grown: Vec<&str> = waiting
                .iter()
                .filter(|(name, _)| !deferred.contains(name))
                .filter(|(_, unfinished)| unfinished.iter().all(|n| deferred.contains(n.as_str())))
                .map(|(name, _)| *name)
                .collect();
            if grown.is_empty() {
                return deferred;
            }
            deferred.extend(grown);
        }
    }
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("phases", &self.phases)
            .field("state", &self.state)
            .field("global_retries", &self.global_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Context, PhaseGate, Task};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ok(name: &str) -> Task {
        Task::new(name, from_fn("ok", |_ctx: Context| async { Ok(json!("done")) }))
    }

    struct AlwaysFail;

    impl PhaseGate for AlwaysFail {
        fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
            GateVerdict::fail("never good enough", ctx.phase_tasks.to_vec())
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let phases = vec![
            Phase::with_tasks("planning", vec![ok("synthesis")]),
            Phase::with_tasks("drafting", vec![ok("arc").depends_on("synthesis")]),
        ];
        let mut controller = PhaseController::new(phases, EngineConfig::default());
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(controller.state(), &ControllerState::AllPhasesComplete);
        assert_eq!(
            plan.task("arc").unwrap().phase.as_deref(),
            Some("drafting")
        );
    }

    #[tokio::test]
    async fn test_escalates_after_phase_retries() {
        let phases = vec![Phase::with_tasks("drafting", vec![ok("arc")])
            .with_gate(Arc::new(AlwaysFail))
            .with_max_iterations(2)];
        let mut controller = PhaseController::new(phases, EngineConfig::default());
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert_eq!(outcome.status(), PlanStatus::Escalated);
        assert!(matches!(&outcome, PlanOutcome::Escalated { phase, .. } if phase == "drafting"));
        assert_eq!(controller.global_retries(), 2);
        assert_eq!(plan.task("arc").unwrap().attempt(), 3);
        assert_eq!(
            plan.task("arc").unwrap().revision_feedback(),
            vec!["never good enough", "never good enough"]
        );
    }

    #[tokio::test]
    async fn test_global_ceiling_wins() {
        let phases = vec![Phase::with_tasks("drafting", vec![ok("arc")])
            .with_gate(Arc::new(AlwaysFail))
            .with_max_iterations(10)];
        let config = EngineConfig::new().with_max_global_iterations(1);
        let mut controller = PhaseController::new(phases, config);
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert_eq!(outcome.status(), PlanStatus::Escalated);
        assert_eq!(controller.global_retries(), 1);
        assert_eq!(controller.state(), &ControllerState::Escalated("drafting".to_string()));
    }

    #[tokio::test]
    async fn test_wildcard_waits_for_later_phase() {
        let phases = vec![
            Phase::with_tasks("review", vec![ok("summary").depends_on("scene_*")]),
            Phase::with_tasks("scenes", vec![ok("scene_1"), ok("scene_2")]),
        ];
        let mut controller = PhaseController::new(phases, EngineConfig::default());
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert!(outcome.is_completed());
        let summary = plan.task("summary").unwrap();
        assert!(summary.result().is_some());
    }

    #[tokio::test]
    async fn test_wildcard_never_matched_blocks() {
        let phases = vec![Phase::with_tasks(
            "review",
            vec![ok("summary").depends_on("scene_*")],
        )];
        let mut controller = PhaseController::new(phases, EngineConfig::default());
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert_eq!(outcome.status(), PlanStatus::Blocked);
        assert!(outcome
            .diagnostic()
            .unwrap()
            .contains("`scene_*` (no matching task)"));
    }

    #[tokio::test]
    async fn test_reset_cascades_to_skipped_dependents() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let flaky = from_fn("flaky", move |_ctx: Context| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(plotloom_core::CapabilityError::fatal("first draft lost"))
                } else {
                    Ok(Value::from("draft"))
                }
            }
        });

        struct RequireAll;
        impl PhaseGate for RequireAll {
            fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
                if ctx.tasks().all(|t| t.status == TaskStatus::Completed) {
                    GateVerdict::pass("all completed")
                } else {
                    GateVerdict::fail("incomplete", Vec::new())
                }
            }
        }

        let phases = vec![Phase::with_tasks(
            "drafting",
            vec![Task::new("arc", flaky), ok("scene_1").depends_on("arc")],
        )
        .with_gate(Arc::new(RequireAll))];
        let mut controller = PhaseController::new(phases, EngineConfig::default());
        let mut plan = Plan::new();

        let outcome = controller.run(&mut plan).await.unwrap();
        assert!(outcome.is_completed(), "{:?}", outcome.diagnostic());
        assert_eq!(plan.status_of("scene_1"), Some(TaskStatus::Completed));
        assert_eq!(plan.task("arc").unwrap().attempt(), 2);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let mut controller = PhaseController::new(Vec::new(), EngineConfig::default());
        let mut plan = Plan::new();
        assert!(controller.run(&mut plan).await.unwrap().is_completed());
        assert_eq!(
            controller.run(&mut Plan::new()).await.unwrap_err(),
            ControllerError::AlreadyRun
        );
    }
}
