//! Pipeline definition files.

use anyhow::{Context as _, Result};
use plotloom_core::{Phase, PhaseGate, Plan, Task};
use plotloom_execution::{CapabilityRegistry, EngineConfig, TaskSpec};
use plotloom_quality::{AllCompleted, EmptyCollection, RequiredFields, ResultCheck, Threshold};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A pipeline as written in TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pipeline {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Phases in execution order
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
}

/// One `[[phases]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseSpec {
    /// Phase name
    pub name: String,

    /// Gate retries allowed after the first failure, before escalation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Gate applied once the phase drains
    #[serde(default)]
    pub gate: Option<GateSpec>,

    /// Tasks the phase adds
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

fn default_max_iterations() -> u32 {
    1
}

/// Built-in gate kinds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateSpec {
    /// Every task of the phase completed
    AllCompleted,

    /// Number at `path` is at least `min`
    Threshold {
        /// Tasks to check, e.g. `coverage` or `scene_*`
        tasks: String,
        /// Path into each result
        path: String,
        /// Minimum value
        min: f64,
    },

    /// Array at `path` is absent or empty
    Empty {
        /// Tasks to check
        tasks: String,
        /// Path into each result
        path: String,
    },

    /// Every path is present
    RequiredFields {
        /// Tasks to check
        tasks: String,
        /// Paths into each result
        paths: Vec<String>,
    },
}

impl GateSpec {
    /// Instantiate the gate.
    pub fn build(&self) -> Arc<dyn PhaseGate> {
        match self {
            GateSpec::AllCompleted => Arc::new(AllCompleted),
            GateSpec::Threshold { tasks, path, min } => Arc::new(ResultCheck::new(
                "threshold",
                tasks.as_str(),
                Arc::new(Threshold::new(path.as_str(), *min)),
            )),
            GateSpec::Empty { tasks, path } => Arc::new(ResultCheck::new(
                "empty",
                tasks.as_str(),
                Arc::new(EmptyCollection::new(path.as_str())),
            )),
            GateSpec::RequiredFields { tasks, paths } => Arc::new(ResultCheck::new(
                "required_fields",
                tasks.as_str(),
                Arc::new(RequiredFields::new(paths.iter().map(String::as_str))),
            )),
        }
    }
}

impl Pipeline {
    /// Read and parse a pipeline file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline TOML.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve every phase against the registry.
    pub fn phases(&self, registry: &CapabilityRegistry) -> Result<Vec<Phase>> {
        self.phases
            .iter()
            .map(|spec| -> Result<Phase> {
                let tasks = registry
                    .build_tasks(&spec.tasks)
                    .with_context(|| format!("phase `{}`", spec.name))?;
                let mut phase = Phase::with_tasks(spec.name.as_str(), tasks)
                    .with_max_iterations(spec.max_iterations);
                if let Some(gate) = &spec.gate {
                    phase = phase.with_gate(gate.build());
                }
                Ok(phase)
            })
            .collect()
    }

    /// All static tasks in one plan, for previews.
    pub fn preview_plan(&self, registry: &CapabilityRegistry) -> Result<Plan> {
        let mut plan = Plan::new();
        for spec in &self.phases {
            let tasks: Vec<Task> = registry
                .build_tasks(&spec.tasks)
                .with_context(|| format!("phase `{}`", spec.name))?
                .into_iter()
                .map(|mut task| {
                    task.phase = Some(spec.name.clone());
                    task
                })
                .collect();
            plan.add_tasks(tasks)
                .with_context(|| format!("phase `{}`", spec.name))?;
        }
        Ok(plan)
    }
}
