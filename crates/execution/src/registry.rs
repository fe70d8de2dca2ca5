//! Capability registry and declarative task specs.

use plotloom_core::{Capability, Context, Dependency, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No capability with that id
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// Id already registered
    #[error("capability already registered: {0}")]
    DuplicateCapability(String),
}

/// Declarative description of a task, resolved against a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task name
    pub name: String,

    /// Capability id
    pub capability: String,

    /// Initial context
    #[serde(default)]
    pub context: Context,

    /// Dependency expressions; a trailing `*` makes a prefix pattern
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Scheduling priority
    #[serde(default)]
    pub priority: i32,

    /// Attempt ceiling
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Whether the plan needs this task
    #[serde(default = "default_required")]
    pub required: bool,

    /// Per-task timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_iterations() -> u32 {
    1
}

fn default_required() -> bool {
    true
}

impl TaskSpec {
    /// Create a spec with defaults.
    pub fn new(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            context: Context::new(),
            depends_on: Vec::new(),
            priority: 0,
            max_iterations: default_max_iterations(),
            required: default_required(),
            timeout_ms: None,
        }
    }
}

/// Capabilities by id.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a capability under its own id.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let id = capability.id().to_string();
        if self.capabilities.contains_key(&id) {
            return Err(RegistryError::DuplicateCapability(id));
        }
        self.order.push(id.clone());
        self.capabilities.insert(id, capability);
        Ok(())
    }

    /// Builder form of [`CapabilityRegistry::register`].
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Result<Self, RegistryError> {
        self.register(capability)?;
        Ok(self)
    }

    /// Look up a capability.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Capability>, RegistryError> {
        self.capabilities
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCapability(id.to_string()))
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Build a task from a spec.
    pub fn build_task(&self, spec: &TaskSpec) -> Result<Task, RegistryError> {
        let mut task = Task::new(spec.name.clone(), self.resolve(&spec.capability)?)
            .with_context_map(spec.context.clone())
            .with_priority(spec.priority)
            .with_max_iterations(spec.max_iterations);
        task.dependencies = spec.depends_on.iter().map(|d| Dependency::parse(d)).collect();
        if !spec.required {
            task = task.optional();
        }
        if let Some(ms) = spec.timeout_ms {
            task = task.with_timeout(Duration::from_millis(ms));
        }
        Ok(task)
    }

    /// Build tasks from specs, failing on the first unknown capability.
    pub fn build_tasks(&self, specs: &[TaskSpec]) -> Result<Vec<Task>, RegistryError> {
        specs.iter().map(|s| self.build_task(s)).collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use serde_json::{json, Value};

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with(from_fn("echo", |ctx: Context| async move { Ok(Value::Object(ctx)) }))
            .unwrap()
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let mut registry = registry();
        let err = registry
            .register(from_fn("echo", |_ctx: Context| async { Ok(Value::Null) }))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCapability("echo".to_string()));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["echo"]);
    }

    #[test]
    fn test_build_task_from_spec() {
        let spec: TaskSpec = serde_json::from_value(json!({
            "name": "review",
            "capability": "echo",
            "depends_on": ["scene_*", "arc"],
            "priority": 3,
            "max_iterations": 2,
            "required": false,
            "timeout_ms": 1500,
            "context": {"tone": "grim"}
        }))
        .unwrap();

        let task = registry().build_task(&spec).unwrap();
        assert_eq!(
            task.dependencies,
            vec![Dependency::prefix("scene_"), Dependency::exact("arc")]
        );
        assert_eq!(task.priority, 3);
        assert_eq!(task.max_iterations, 2);
        assert!(!task.required);
        assert_eq!(task.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(task.context["tone"], json!("grim"));
        assert_eq!(task.capability.id(), "echo");
    }

    #[test]
    fn test_unknown_capability() {
        let err = registry()
            .build_task(&TaskSpec::new("x", "missing"))
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownCapability("missing".to_string()));
    }
}
