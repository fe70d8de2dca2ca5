//! Execution runner - one attempt of one task.
//!
//! Work is split in three so the plan is only touched from the scheduler's
//! loop: [`ExecutionRunner::prepare`] reads the plan and builds an
//! [`Invocation`], the invocation runs detached from the plan, and
//! [`ExecutionRunner::apply`] writes its outcome back.

use plotloom_core::{
    Capability, CapabilityError, Context, Plan, PlanError, TaskStatus, Validator,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, RetryBackoff};
use crate::dependency::DependencyMatcher;

/// Raw result of one invocation, before it is applied to the plan.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// Result produced and accepted by the validator (if any)
    Accepted(Value),

    /// Result produced but rejected by the validator
    Rejected {
        /// Rejected value
        result: Value,
        /// Validator diagnostic
        message: String,
    },

    /// Capability reported an error
    Error(CapabilityError),

    /// No result within the timeout
    TimedOut(Duration),

    /// Capability panicked
    Panicked(String),
}

/// What happened to the task after an attempt was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Result accepted
    Completed,
    /// Attempt rejected, task back to pending
    Retrying {
        /// Diagnostic fed to the next attempt
        reason: String,
    },
    /// Attempt rejected with no retry left, or fatal error
    Failed {
        /// Why the task failed
        reason: String,
    },
}

impl TaskOutcome {
    /// Whether the task reached `failed`.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A prepared attempt, independent of the plan.
pub struct Invocation {
    /// Task name
    pub task: String,
    /// Attempt number, 1-based
    pub attempt: u32,
    capability: Arc<dyn Capability>,
    validator: Option<Arc<dyn Validator>>,
    context: Context,
    timeout: Duration,
    delay: Duration,
}

impl Invocation {
    /// Context handed to the capability.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Backoff wait before the capability is called.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run the capability under the timeout and validate its result.
    pub async fn run(self) -> AttemptResult {
        if !self.delay.is_zero() {
            debug!(task = %self.task, delay_ms = self.delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(self.delay).await;
        }

        let call = self.capability.execute(self.context);
        let value = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return AttemptResult::Error(e),
            Err(_) => return AttemptResult::TimedOut(self.timeout),
        };

        match &self.validator {
            Some(validator) => {
                let validation = validator.validate(&value);
                if validation.valid {
                    AttemptResult::Accepted(value)
                } else {
                    AttemptResult::Rejected {
                        result: value,
                        message: validation.message,
                    }
                }
            }
            None => AttemptResult::Accepted(value),
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("task", &self.task)
            .field("attempt", &self.attempt)
            .field("capability", &self.capability.id())
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .finish()
    }
}

/// Runs single attempts and classifies their outcome.
#[derive(Debug, Clone)]
pub struct ExecutionRunner {
    matcher: DependencyMatcher,
    default_timeout: Duration,
    backoff: RetryBackoff,
}

impl ExecutionRunner {
    /// Create a runner from engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            matcher: DependencyMatcher::new(),
            default_timeout: config.task_timeout(),
            backoff: config.retry.clone(),
        }
    }

    /// Enrich a running task's context with its dependencies' results and
    /// build the invocation for its current attempt.
    ///
    /// Each completed dependency's result is stored under the dependency's
    /// name, so wildcard fan-in sees every matched result separately.
    pub fn prepare(&self, plan: &mut Plan, name: &str) -> Result<Invocation, PlanError> {
        let task = plan
            .task(name)
            .ok_or_else(|| PlanError::UnknownTask(name.to_string()))?;

        let inputs: Vec<(String, Value)> = self
            .matcher
            .resolve_all(plan, task)
            .into_iter()
            .filter(|dep| dep.status() == TaskStatus::Completed)
            .filter_map(|dep| dep.result().map(|r| (dep.name.clone(), r.clone())))
            .collect();

        for (dep, result) in inputs {
            plan.merge_context(name, &dep, result)?;
        }

        let task = plan
            .task(name)
            .ok_or_else(|| PlanError::UnknownTask(name.to_string()))?;
        let attempt = task.attempt();

        debug!(
            task = %name,
            attempt,
            keys = ?task.context.keys().collect::<Vec<_>>(),
            "Prepared context"
        );

        Ok(Invocation {
            task: name.to_string(),
            attempt,
            capability: Arc::clone(&task.capability),
            validator: task.validator.clone(),
            context: task.context.clone(),
            timeout: task.timeout.unwrap_or(self.default_timeout),
            delay: self.backoff.delay_before(attempt),
        })
    }

    /// Write an attempt's outcome to the plan.
    ///
    /// Invalid results, transient errors and timeouts re-queue the task while
    /// budget remains. Fatal errors and panics fail it at once.
    pub fn apply(
        &self,
        plan: &mut Plan,
        name: &str,
        attempt: AttemptResult,
    ) -> Result<TaskOutcome, PlanError> {
        let retryable = match attempt {
            AttemptResult::Accepted(value) => {
                plan.complete(name, value)?;
                info!(task = %name, "Task completed");
                return Ok(TaskOutcome::Completed);
            }
            AttemptResult::Rejected { message, .. } => format!("validation failed: {message}"),
            AttemptResult::Error(CapabilityError::Transient(message)) => {
                format!("transient failure: {message}")
            }
            AttemptResult::TimedOut(after) => format!("timed out after {}ms", after.as_millis()),
            AttemptResult::Error(CapabilityError::Fatal(message)) => {
                let reason = format!("fatal failure: {message}");
                plan.fail(name, &reason)?;
                warn!(task = %name, %reason, "Task failed");
                return Ok(TaskOutcome::Failed { reason });
            }
            AttemptResult::Panicked(message) => {
                let reason = format!("capability panicked: {message}");
                plan.fail(name, &reason)?;
                warn!(task = %name, %reason, "Task failed");
                return Ok(TaskOutcome::Failed { reason });
            }
        };

        let has_budget = plan
            .task(name)
            .map(|t| t.has_budget())
            .ok_or_else(|| PlanError::UnknownTask(name.to_string()))?;

        if has_budget {
            plan.requeue(name, &retryable)?;
            info!(task = %name, reason = %retryable, "Task re-queued");
            Ok(TaskOutcome::Retrying { reason: retryable })
        } else {
            plan.fail(name, &retryable)?;
            warn!(task = %name, reason = %retryable, "Task failed, attempts exhausted");
            Ok(TaskOutcome::Failed { reason: retryable })
        }
    }

    /// Run one full attempt of a task in place: dispatch, invoke, apply.
    pub async fn execute(&self, plan: &mut Plan, name: &str) -> Result<TaskOutcome, PlanError> {
        plan.begin_attempt(name)?;
        let invocation = self.prepare(plan, name)?;
        let attempt = invocation.run().await;
        self.apply(plan, name, attempt)
    }
}

impl Default for ExecutionRunner {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Task, Validation};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NonEmpty;

    impl Validator for NonEmpty {
        fn validate(&self, result: &Value) -> Validation {
            match result.as_str() {
                Some(s) if !s.is_empty() => Validation::valid(),
                _ => Validation::invalid("result is empty"),
            }
        }
    }

    #[tokio::test]
    async fn test_context_receives_dependency_results() {
        let mut plan = Plan::new();
        let echo = from_fn("echo", |ctx: Context| async move { Ok(Value::Object(ctx)) });
        plan.add_tasks(vec![
            Task::new("synthesis", echo.clone()).with_context("premise", "heist"),
            Task::new("arc", echo).depends_on("synthesis"),
        ])
        .unwrap();

        let runner = ExecutionRunner::default();
        assert_eq!(runner.execute(&mut plan, "synthesis").await.unwrap(), TaskOutcome::Completed);
        assert_eq!(runner.execute(&mut plan, "arc").await.unwrap(), TaskOutcome::Completed);

        let arc = plan.task("arc").unwrap();
        assert_eq!(arc.result().unwrap()["synthesis"]["premise"], json!("heist"));
    }

    #[tokio::test]
    async fn test_invalid_result_retries_with_feedback() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cap = from_fn("draft", move |_ctx: Context| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n == 0 { json!("") } else { json!("draft") }) }
        });

        let mut plan = Plan::new();
        plan.add_task(
            Task::new("arc", cap)
                .with_validator(Arc::new(NonEmpty))
                .with_max_iterations(2),
        )
        .unwrap();

        let runner = ExecutionRunner::default();
        let first = runner.execute(&mut plan, "arc").await.unwrap();
        assert_eq!(
            first,
            TaskOutcome::Retrying {
                reason: "validation failed: result is empty".to_string()
            }
        );
        assert_eq!(runner.execute(&mut plan, "arc").await.unwrap(), TaskOutcome::Completed);

        let arc = plan.task("arc").unwrap();
        assert_eq!(arc.attempt(), 2);
        assert_eq!(arc.revision_feedback(), vec!["validation failed: result is empty"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_skips_remaining_budget() {
        let cap = from_fn("broken", |_ctx: Context| async {
            Err(CapabilityError::fatal("missing credentials"))
        });
        let mut plan = Plan::new();
        plan.add_task(Task::new("arc", cap).with_max_iterations(5)).unwrap();

        let outcome = ExecutionRunner::default().execute(&mut plan, "arc").await.unwrap();
        assert!(outcome.is_failed());
        assert_eq!(plan.task("arc").unwrap().attempt(), 1);
        assert_eq!(plan.status_of("arc"), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_transient_error_exhausts_budget() {
        let cap = from_fn("flaky", |_ctx: Context| async {
            Err(CapabilityError::transient("rate limited"))
        });
        let mut plan = Plan::new();
        plan.add_task(Task::new("arc", cap).with_max_iterations(2)).unwrap();

        let runner = ExecutionRunner::default();
        assert!(matches!(
            runner.execute(&mut plan, "arc").await.unwrap(),
            TaskOutcome::Retrying { .. }
        ));
        assert_eq!(
            runner.execute(&mut plan, "arc").await.unwrap(),
            TaskOutcome::Failed {
                reason: "transient failure: rate limited".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_attempt() {
        let cap = from_fn("slow", |_ctx: Context| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let mut plan = Plan::new();
        plan.add_task(Task::new("slow", cap).with_timeout(Duration::from_secs(1)))
            .unwrap();

        let outcome = ExecutionRunner::default().execute(&mut plan, "slow").await.unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Failed {
                reason: "timed out after 1000ms".to_string()
            }
        );
    }

    #[test]
    fn test_retry_invocation_carries_backoff() {
        let config = EngineConfig::new().with_retry(RetryBackoff {
            base_delay_ms: 250,
            ..Default::default()
        });
        let runner = ExecutionRunner::new(&config);
        let mut plan = Plan::new();
        let cap = from_fn("noop", |_ctx: Context| async { Ok(Value::Null) });
        plan.add_task(Task::new("arc", cap).with_max_iterations(3)).unwrap();

        plan.begin_attempt("arc").unwrap();
        assert_eq!(runner.prepare(&mut plan, "arc").unwrap().delay(), Duration::ZERO);
        plan.requeue("arc", "again").unwrap();
        plan.begin_attempt("arc").unwrap();
        assert_eq!(
            runner.prepare(&mut plan, "arc").unwrap().delay(),
            Duration::from_millis(250)
        );
    }
}
