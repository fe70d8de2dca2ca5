//! Scheduler - drains a plan under a concurrency limit.
//!
//! The scheduler loop is the single writer of the plan. Attempts run as
//! spawned tokio tasks that never see the plan; their results come back
//! through a `FuturesUnordered` and are applied one at a time.

use futures::stream::{FuturesUnordered, StreamExt};
use plotloom_core::{Plan, PlanOutcome, PlanStatus, TaskStatus};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::dependency::{DependencyMatcher, Resolution};
use crate::runner::{AttemptResult, ExecutionRunner, TaskOutcome};
use crate::selector::{SelectorStrategy, TaskSelector};

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Attempts dispatched
    pub dispatched: usize,
    /// Required task whose failure stopped dispatch
    pub halted_by: Option<String>,
}

/// Drives tasks from pending to a terminal status.
pub struct Scheduler {
    config: EngineConfig,
    matcher: DependencyMatcher,
    selector: Box<dyn TaskSelector>,
    runner: ExecutionRunner,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(config: EngineConfig) -> Self {
        let runner = ExecutionRunner::new(&config);
        Self {
            config,
            matcher: DependencyMatcher::new(),
            selector: Box::new(SelectorStrategy::default()),
            runner,
        }
    }

    /// Set the task selector strategy.
    pub fn with_selector(mut self, selector: Box<dyn TaskSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The runner used for attempts.
    pub fn runner(&self) -> &ExecutionRunner {
        &self.runner
    }

    /// Dependency matcher.
    pub fn matcher(&self) -> &DependencyMatcher {
        &self.matcher
    }

    /// Skip tasks behind failed dependencies until nothing changes, then mark
    /// and return the ready set in insertion order.
    pub fn settle(&self, plan: &mut Plan) -> Vec<String> {
        loop {
            let mut skipped = Vec::new();
            let mut ready = Vec::new();

            for task in plan.tasks().filter(|t| t.status().is_schedulable()) {
                match self.matcher.check(plan, task) {
                    Resolution::Ready => ready.push(task.name.clone()),
                    Resolution::Blocked { dependency, root } => {
                        skipped.push((task.name.clone(), dependency, root))
                    }
                    Resolution::Waiting { .. } => {}
                }
            }

            if skipped.is_empty() {
                for name in &ready {
                    if let Err(e) = plan.mark_ready(name) {
                        error!(task = %name, error = %e, "Could not mark task ready");
                    }
                }
                return ready;
            }

            for (name, dependency, root) in skipped {
                match plan.skip(&name, &root) {
                    Ok(()) => warn!(task = %name, %dependency, %root, "Task skipped"),
                    Err(e) => error!(task = %name, error = %e, "Could not skip task"),
                }
            }
        }
    }

    /// One scheduling tick: settle, then move the best ready tasks into
    /// `running` up to the free concurrency slots. Returns the dispatched
    /// names in dispatch order.
    pub fn step(&self, plan: &mut Plan) -> Vec<String> {
        let mut ready = self.settle(plan);
        self.selector.order(plan, &mut ready);

        let running = plan.count(TaskStatus::Running);
        let slots = self.config.concurrency_limit().saturating_sub(running);
        debug!(ready = ready.len(), running, slots, "Scheduling tick");

        let mut dispatched = Vec::new();
        for name in ready.into_iter().take(slots) {
            match plan.begin_attempt(&name) {
                Ok(attempt) => {
                    debug!(task = %name, attempt, "Dispatching");
                    dispatched.push(name);
                }
                Err(e) => error!(task = %name, error = %e, "Could not dispatch task"),
            }
        }
        dispatched
    }

    /// Run ticks until nothing is running and nothing else can start.
    ///
    /// Does not decide the plan's verdict; see [`Scheduler::classify`].
    pub async fn drain(&self, plan: &mut Plan) -> DrainReport {
        let mut report = DrainReport::default();
        let mut in_flight = FuturesUnordered::new();

        loop {
            if report.halted_by.is_none() {
                for name in self.step(plan) {
                    let invocation = match self.runner.prepare(plan, &name) {
                        Ok(invocation) => invocation,
                        Err(e) => {
                            error!(task = %name, error = %e, "Could not prepare task");
                            abandon(plan, &name, &e.to_string());
                            continue;
                        }
                    };
                    report.dispatched += 1;

                    let span = info_span!("task", task = %name, attempt = invocation.attempt);
                    let handle = tokio::spawn(invocation.run().instrument(span));
                    in_flight.push(async move { (name, handle.await) });
                }
            }

            let Some((name, joined)) = in_flight.next().await else {
                break;
            };

            let attempt = match joined {
                Ok(attempt) => attempt,
                Err(e) => AttemptResult::Panicked(e.to_string()),
            };

            match self.runner.apply(plan, &name, attempt) {
                Ok(TaskOutcome::Failed { .. }) => {
                    let required = plan.task(&name).map(|t| t.required).unwrap_or(false);
                    if required && self.config.halt_on_failure && report.halted_by.is_none() {
                        warn!(task = %name, "Required task failed, halting dispatch");
                        report.halted_by = Some(name);
                    }
                }
                Ok(_) => {}
                Err(e) => error!(task = %name, error = %e, "Could not record attempt"),
            }
        }

        if report.halted_by.is_none() {
            self.settle(plan);
        }
        report
    }

    /// Verdict for a plan with nothing running.
    ///
    /// `Done` when nothing is left to schedule and every required task
    /// completed; otherwise `Blocked` with a diagnostic naming the failures
    /// and any deadlocked tasks.
    pub fn classify(&self, plan: &Plan, halted_by: Option<&str>) -> (PlanStatus, Option<String>) {
        let mut problems = Vec::new();

        if let Some(name) = halted_by {
            let reason = plan.task(name).and_then(|t| t.error()).unwrap_or("failed");
            problems.push(format!("halted after required task `{name}` failed: {reason}"));
        }

        for task in plan.tasks() {
            match task.status() {
                TaskStatus::Failed if task.required => problems.push(format!(
                    "task `{}` failed after {} attempt(s): {}",
                    task.name,
                    task.attempt(),
                    task.error().unwrap_or("unknown error")
                )),
                TaskStatus::Skipped if task.required => problems.push(format!(
                    "task `{}` skipped: {}",
                    task.name,
                    task.error().unwrap_or("dependency failed")
                )),
                _ => {}
            }
        }

        let stuck: Vec<_> = plan
            .tasks()
            .filter(|t| t.status().is_schedulable())
            .collect();
        if !stuck.is_empty() && halted_by.is_none() {
            for task in &stuck {
                if let Resolution::Waiting { absent, unfinished } = self.matcher.check(plan, task) {
                    let mut waits: Vec<String> = absent
                        .iter()
                        .map(|d| format!("`{d}` (no matching task)"))
                        .collect();
                    waits.extend(unfinished.iter().map(|n| format!("`{n}`")));
                    problems.push(format!(
                        "deadlock: task `{}` waiting on {}",
                        task.name,
                        waits.join(", ")
                    ));
                }
            }
            if let Some(cycle) = self.matcher.find_cycle(plan) {
                problems.push(format!("dependency cycle: {}", cycle.join(" -> ")));
            }
        }

        if problems.is_empty() && stuck.is_empty() {
            (PlanStatus::Done, None)
        } else if problems.is_empty() {
            let names: Vec<_> = stuck.iter().map(|t| t.name.as_str()).collect();
            (
                PlanStatus::Blocked,
                Some(format!("tasks never started: {}", names.join(", "))),
            )
        } else {
            (PlanStatus::Blocked, Some(problems.join("; ")))
        }
    }

    /// Drain the plan and finish it with a verdict.
    pub async fn run(&self, plan: &mut Plan) -> PlanOutcome {
        let span = info_span!("plan", plan_id = %plan.id(), tasks = plan.len());
        async {
            info!("Draining plan");
            let report = self.drain(plan).await;
            let (status, diagnostic) = self.classify(plan, report.halted_by.as_deref());
            plan.finish(status);
            info!(%status, dispatched = report.dispatched, "Plan finished");
            outcome(plan, status, diagnostic, None)
        }
        .instrument(span)
        .await
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Fail a dispatched task that never reached its capability.
fn abandon(plan: &mut Plan, name: &str, reason: &str) {
    if let Err(e) = plan.fail(name, reason) {
        error!(task = %name, error = %e, "Could not mark task failed");
    }
}

/// Build the outcome value for a finished plan.
pub(crate) fn outcome(
    plan: &Plan,
    status: PlanStatus,
    diagnostic: Option<String>,
    phase: Option<String>,
) -> PlanOutcome {
    let snapshot = plan.snapshot();
    match status {
        PlanStatus::Done | PlanStatus::Open => PlanOutcome::Completed { snapshot },
        PlanStatus::Blocked => PlanOutcome::Blocked {
            diagnostic: diagnostic.unwrap_or_default(),
            snapshot,
        },
        PlanStatus::Escalated => PlanOutcome::Escalated {
            phase: phase.unwrap_or_default(),
            diagnostic: diagnostic.unwrap_or_default(),
            snapshot,
        },
    }
}
