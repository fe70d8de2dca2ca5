//! Built-in phase gates.

use plotloom_core::{Dependency, GateContext, GateVerdict, PhaseGate, TaskStatus, Validator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Gate backed by a closure.
pub struct FnGate<F> {
    name: String,
    f: F,
}

impl<F> FnGate<F>
where
    F: Fn(&GateContext<'_>) -> GateVerdict + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> PhaseGate for FnGate<F>
where
    F: Fn(&GateContext<'_>) -> GateVerdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
        (self.f)(ctx)
    }
}

/// Every task added by the phase must be completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCompleted;

impl PhaseGate for AllCompleted {
    fn name(&self) -> &str {
        "all_completed"
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let unfinished: Vec<String> = ctx
            .tasks()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| t.name.clone())
            .collect();

        if unfinished.is_empty() {
            GateVerdict::pass(format!("{} task(s) completed", ctx.phase_tasks.len()))
        } else {
            GateVerdict::fail(
                format!("not completed: {}", unfinished.join(", ")),
                unfinished,
            )
        }
    }
}

/// Applies a validator to the results of every task matching an expression.
///
/// Tasks that are not completed, or whose result is rejected, are sent back.
/// An expression matching nothing fails the gate.
pub struct ResultCheck {
    name: String,
    tasks: Dependency,
    validator: Arc<dyn Validator>,
}

impl ResultCheck {
    /// Create a check over `tasks`, e.g. `scene_*`.
    pub fn new(
        name: impl Into<String>,
        tasks: impl Into<Dependency>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            name: name.into(),
            tasks: tasks.into(),
            validator,
        }
    }
}

impl PhaseGate for ResultCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let mut checked = 0;
        let mut problems = Vec::new();
        let mut retry = Vec::new();

        for task in ctx.snapshot.matching(&self.tasks) {
            checked += 1;
            let problem = match (&task.status, &task.result) {
                (TaskStatus::Completed, Some(result)) => {
                    let validation = self.validator.validate(result);
                    (!validation.valid).then_some(validation.message)
                }
                (status, _) => Some(format!("status is {status}")),
            };
            if let Some(message) = problem {
                problems.push(format!("`{}`: {}", task.name, message));
                retry.push(task.name.clone());
            }
        }

        debug!(gate = %self.name, checked, failed = retry.len(), "Result check");

        if checked == 0 {
            return GateVerdict::fail(format!("no task matches `{}`", self.tasks), Vec::new());
        }
        if problems.is_empty() {
            GateVerdict::pass(format!("{}: {checked} result(s) accepted", self.name))
        } else {
            GateVerdict::fail(format!("{}: {}", self.name, problems.join("; ")), retry)
        }
    }
}

impl std::fmt::Debug for ResultCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCheck")
            .field("name", &self.name)
            .field("tasks", &self.tasks)
            .finish()
    }
}

/// How many member gates must pass for a composite to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassCondition {
    /// Every member passes
    #[default]
    AllPassed,
    /// At least `count` members pass
    AtLeast {
        /// Members that must pass
        count: usize,
    },
}

/// Several gates judged together.
pub struct CompositeGate {
    name: String,
    gates: Vec<Arc<dyn PhaseGate>>,
    condition: PassCondition,
}

impl CompositeGate {
    /// Create an empty composite that requires every member to pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gates: Vec::new(),
            condition: PassCondition::AllPassed,
        }
    }

    /// Add a member gate.
    pub fn add_gate(mut self, gate: Arc<dyn PhaseGate>) -> Self {
        self.gates.push(gate);
        self
    }

    /// Set pass condition.
    pub fn with_pass_condition(mut self, condition: PassCondition) -> Self {
        self.condition = condition;
        self
    }
}

impl PhaseGate for CompositeGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let verdicts: Vec<(&str, GateVerdict)> = self
            .gates
            .iter()
            .map(|g| (g.name(), g.evaluate(ctx)))
            .collect();
        let passed = verdicts.iter().filter(|(_, v)| v.pass).count();

        let pass = match self.condition {
            PassCondition::AllPassed => passed == verdicts.len(),
            PassCondition::AtLeast { count } => passed >= count,
        };

        let diagnostic = verdicts
            .iter()
            .map(|(name, v)| {
                let mark = if v.pass { "pass" } else { "fail" };
                format!("[{name}] {mark}: {}", v.diagnostic)
            })
            .collect::<Vec<_>>()
            .join("; ");

        if pass {
            return GateVerdict::pass(diagnostic);
        }

        let mut retry: Vec<String> = Vec::new();
        for (_, verdict) in verdicts.iter().filter(|(_, v)| !v.pass) {
            for name in &verdict.tasks_to_retry {
                if !retry.contains(name) {
                    retry.push(name.clone());
                }
            }
        }
        GateVerdict::fail(diagnostic, retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{RequiredFields, Threshold};
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Context, Plan, PlanSnapshot, Task};
    use serde_json::{json, Value};

    fn snapshot(results: &[(&str, Option<Value>)]) -> PlanSnapshot {
        let mut plan = Plan::new();
        for (name, result) in results {
            let cap = from_fn("noop", |_ctx: Context| async { Ok(Value::Null) });
            plan.add_task(Task::new(*name, cap)).unwrap();
            plan.begin_attempt(name).unwrap();
            match result {
                Some(value) => plan.complete(name, value.clone()).unwrap(),
                None => plan.fail(name, "boom").unwrap(),
            }
        }
        plan.snapshot()
    }

    fn ctx<'a>(snapshot: &'a PlanSnapshot, names: &'a [String]) -> GateContext<'a> {
        GateContext {
            phase: "scenes",
            snapshot,
            phase_tasks: names,
            iteration: 0,
        }
    }

    #[test]
    fn test_all_completed() {
        let snap = snapshot(&[("scene_1", Some(json!({}))), ("scene_2", None)]);
        let names = vec!["scene_1".to_string(), "scene_2".to_string()];

        let verdict = AllCompleted.evaluate(&ctx(&snap, &names));
        assert!(!verdict.pass);
        assert_eq!(verdict.tasks_to_retry, vec!["scene_2"]);
    }

    #[test]
    fn test_result_check_sends_back_bad_scenes() {
        let snap = snapshot(&[
            ("scene_1", Some(json!({"goal": "flee", "conflict": "storm", "outcome": "wreck"}))),
            ("scene_2", Some(json!({"goal": "hide"}))),
            ("summary", Some(json!({}))),
        ]);
        let names: Vec<String> = snap.tasks.iter().map(|t| t.name.clone()).collect();
        let gate = ResultCheck::new(
            "scene_quality",
            "scene_*",
            Arc::new(RequiredFields::new(["goal", "conflict", "outcome"])),
        );

        let verdict = gate.evaluate(&ctx(&snap, &names));
        assert!(!verdict.pass);
        assert_eq!(verdict.tasks_to_retry, vec!["scene_2"]);
        assert_eq!(
            verdict.diagnostic,
            "scene_quality: `scene_2`: missing field(s): conflict, outcome"
        );
    }

    #[test]
    fn test_result_check_without_matches_fails() {
        let snap = snapshot(&[]);
        let gate = ResultCheck::new("coverage", "coverage", Arc::new(Threshold::new("pct", 70.0)));
        let verdict = gate.evaluate(&ctx(&snap, &[]));
        assert!(!verdict.pass);
        assert_eq!(verdict.diagnostic, "no task matches `coverage`");
    }

    #[test]
    fn test_composite_at_least() {
        let snap = snapshot(&[("coverage", Some(json!({"pct": 50})))]);
        let names = vec!["coverage".to_string()];
        let coverage: Arc<dyn PhaseGate> = Arc::new(ResultCheck::new(
            "coverage",
            "coverage",
            Arc::new(Threshold::new("pct", 70.0)),
        ));
        let lenient = FnGate::new("lenient", |_ctx: &GateContext<'_>| GateVerdict::pass("ok"));

        let all = CompositeGate::new("planning")
            .add_gate(coverage.clone())
            .add_gate(Arc::new(AllCompleted));
        let verdict = all.evaluate(&ctx(&snap, &names));
        assert!(!verdict.pass);
        assert_eq!(verdict.tasks_to_retry, vec!["coverage"]);
        assert!(verdict.diagnostic.contains("[all_completed] pass"));

        let any = CompositeGate::new("planning")
            .add_gate(coverage)
            .add_gate(Arc::new(lenient))
            .with_pass_condition(PassCondition::AtLeast { count: 1 });
        assert!(any.evaluate(&ctx(&snap, &names)).pass);
    }
}
