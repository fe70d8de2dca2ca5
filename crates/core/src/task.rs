//! Task model - the schedulable unit of work.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::Capability;

/// Context bundle handed to a capability.
pub type Context = serde_json::Map<String, Value>;

/// Context key under which retry diagnostics accumulate.
pub const REVISION_FEEDBACK_KEY: &str = "_revision_feedback";

/// A dependency expression.
///
/// Parsed once when the task is built, so a literal name is never confused
/// with a pattern at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Dependency {
    /// Exactly the task with this name
    Exact(String),

    /// Every other task whose name starts with this prefix
    Prefix(String),
}

impl Dependency {
    /// Marker that turns a name into a prefix pattern.
    pub const WILDCARD: char = '*';

    /// Parse an expression: a trailing `*` makes it a prefix pattern.
    pub fn parse(expression: &str) -> Self {
        match expression.strip_suffix(Self::WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(expression.to_string()),
        }
    }

    /// Exact dependency.
    pub fn exact(name: impl Into<String>) -> Self {
        Self::Exact(name.into())
    }

    /// Prefix dependency.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Whether `name` is covered by this expression.
    ///
    /// Self-exclusion for prefixes is the matcher's job, not this one's.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(n) => n == name,
            Self::Prefix(p) => name.starts_with(p.as_str()),
        }
    }

    /// Whether this is a prefix pattern.
    pub fn is_prefix(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(n) => f.write_str(n),
            Self::Prefix(p) => write!(f, "{}{}", p, Self::WILDCARD),
        }
    }
}

impl From<&str> for Dependency {
    fn from(expression: &str) -> Self {
        Self::parse(expression)
    }
}

impl From<String> for Dependency {
    fn from(expression: String) -> Self {
        Self::parse(&expression)
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or a dispatch slot
    Pending,
    /// Dependencies satisfied, waiting for a dispatch slot
    Ready,
    /// Handed to the runner
    Running,
    /// Finished with a valid result
    Completed,
    /// Finished without a usable result
    Failed,
    /// Never attempted because a dependency failed
    Skipped,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Ready,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Skipped,
    ];

    /// Completed, failed or skipped.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Pending or ready - eligible for selection once dependencies allow.
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// Whether the result is acceptable
    pub valid: bool,

    /// Diagnostic, fed back to the next attempt when invalid
    pub message: String,
}

impl Validation {
    /// Accept the result.
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    /// Reject the result.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Predicate over a task's result.
pub trait Validator: Send + Sync {
    /// Judge a result.
    fn validate(&self, result: &Value) -> Validation;
}

/// A unit of work with declared dependencies and a bounded retry budget.
///
/// Definition fields are public and set through the builder. Runtime state
/// (status, attempt, result, error) is only changed by the owning
/// [`Plan`](crate::Plan).
#[derive(Clone)]
pub struct Task {
    /// Unique name within a plan
    pub name: String,

    /// What to run
    pub capability: Arc<dyn Capability>,

    /// Context bundle, enriched with dependency results before each attempt
    pub context: Context,

    /// Dependency expressions, in declaration order
    pub dependencies: Vec<Dependency>,

    /// Higher runs first among simultaneously-ready tasks
    pub priority: i32,

    /// Attempt ceiling, at least 1
    pub max_iterations: u32,

    /// Optional result check
    pub validator: Option<Arc<dyn Validator>>,

    /// Whether the plan needs this task to complete
    pub required: bool,

    /// Overrides the engine-wide timeout
    pub timeout: Option<Duration>,

    /// Phase that added this task
    pub phase: Option<String>,

    pub(crate) status: TaskStatus,
    pub(crate) attempt: u32,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) blocked_by: Option<String>,
}

impl Task {
    /// Create a task with no dependencies, priority 0 and a single attempt.
    pub fn new(name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        Self {
            name: name.into(),
            capability,
            context: Context::new(),
            dependencies: Vec::new(),
            priority: 0,
            max_iterations: 1,
            validator: None,
            required: true,
            timeout: None,
            phase: None,
            status: TaskStatus::Pending,
            attempt: 0,
            result: None,
            error: None,
            blocked_by: None,
        }
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Replace the whole context.
    pub fn with_context_map(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Add a dependency expression.
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the attempt ceiling. Zero is raised to one.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Set a validator.
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Mark the task optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set a per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Result of the completed attempt.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Last diagnostic (failure reason, skip reason, or last retry cause).
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Root failed task that caused this one to be skipped.
    pub fn blocked_by(&self) -> Option<&str> {
        self.blocked_by.as_deref()
    }

    /// Whether another attempt fits in the budget.
    pub fn has_budget(&self) -> bool {
        self.attempt < self.max_iterations
    }

    /// Accumulated revision feedback.
    pub fn revision_feedback(&self) -> Vec<&str> {
        self.context
            .get(REVISION_FEEDBACK_KEY)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub(crate) fn push_feedback(&mut self, message: &str) {
        let entry = self
            .context
            .entry(REVISION_FEEDBACK_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            items.push(Value::String(message.to_string()));
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("capability", &self.capability.id())
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("max_iterations", &self.max_iterations)
            .field("required", &self.required)
            .field("status", &self.status)
            .field("attempt", &self.attempt)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::from_fn;
    use serde_json::json;

    fn noop() -> Arc<dyn Capability> {
        from_fn("noop", |_ctx: Context| async { Ok(Value::Null) })
    }

    #[test]
    fn test_dependency_parse() {
        assert_eq!(Dependency::parse("synthesis"), Dependency::exact("synthesis"));
        assert_eq!(Dependency::parse("scene_*"), Dependency::prefix("scene_"));
        assert_eq!(Dependency::parse("scene_*").to_string(), "scene_*");
    }

    #[test]
    fn test_dependency_matches() {
        let dep = Dependency::prefix("scene_");
        assert!(dep.matches("scene_1"));
        assert!(!dep.matches("scenery"));
        assert!(Dependency::exact("arc").matches("arc"));
        assert!(!Dependency::exact("arc").matches("arc_2"));
    }

    #[test]
    fn test_task_builder_defaults() {
        let task = Task::new("synthesis", noop());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.attempt(), 0);
        assert_eq!(task.max_iterations, 1);
        assert!(task.required);
        assert!(task.has_budget());
    }

    #[test]
    fn test_task_builder_chain() {
        let task = Task::new("validator", noop())
            .depends_on("scene_*")
            .depends_on("arc")
            .with_priority(5)
            .with_max_iterations(0)
            .with_context("genre", "noir")
            .optional();

        assert_eq!(
            task.dependencies,
            vec![Dependency::prefix("scene_"), Dependency::exact("arc")]
        );
        assert_eq!(task.max_iterations, 1);
        assert_eq!(task.context["genre"], json!("noir"));
        assert!(!task.required);
    }

    #[test]
    fn test_feedback_accumulates() {
        let mut task = Task::new("arc", noop());
        task.push_feedback("too short");
        task.push_feedback("missing climax");
        assert_eq!(task.revision_feedback(), vec!["too short", "missing climax"]);
    }

    #[test]
    fn test_status_classes() {
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Ready.is_schedulable());
        assert!(!TaskStatus::Failed.is_schedulable());
    }
}
