//! Blocker detection and resolution.
//!
//! Explains why a plan stopped short of done:
//! - Failed tasks and the dependents they took down
//! - Tasks waiting on dependency expressions nothing matches
//! - Circular dependency detection
//! - Resolution suggestions per blocker

use plotloom_core::{Dependency, PlanSnapshot, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Blocker resolution suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    /// The type of resolution
    pub action: ResolutionAction,
    /// Description of the suggested action
    pub description: String,
    /// Priority of this resolution (lower = higher priority)
    pub priority: u32,
}

/// Actions that can resolve a blocker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Give the task more attempts or revise its input
    RetryTask,
    /// Fix what the capability depends on, then rerun
    ManualReview,
    /// Add tasks that satisfy a dependency expression
    AddTasks,
    /// Modify dependencies
    ModifyDependencies,
    /// Wait for in-flight work
    Wait,
}

impl ResolutionAction {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::RetryTask => "retry_task",
            ResolutionAction::ManualReview => "manual_review",
            ResolutionAction::AddTasks => "add_tasks",
            ResolutionAction::ModifyDependencies => "modify_dependencies",
            ResolutionAction::Wait => "wait",
        }
    }
}

/// What is in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockerKind {
    /// A task failed; `dependents` were skipped because of it
    FailedTask {
        /// Last diagnostic
        error: String,
        /// Tasks skipped with this one as root
        dependents: Vec<String>,
    },
    /// A dependency expression matches no task
    AbsentDependency {
        /// The expression
        dependency: String,
    },
    /// Waiting on tasks that have not finished
    Unfinished {
        /// Tasks being waited on
        on: Vec<String>,
    },
    /// Part of a dependency cycle
    Cycle {
        /// The cycle as a closed path
        chain: Vec<String>,
    },
}

/// Something that is blocking progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    /// Blocked (or failed) task
    pub task: String,
    /// Whether the plan needs that task
    pub required: bool,
    /// Cause
    pub kind: BlockerKind,
}

/// Blocker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerStats {
    /// Total blockers detected
    pub total_blockers: usize,
    /// Failed tasks
    pub failed: usize,
    /// Tasks skipped behind failures
    pub skipped: usize,
    /// Tasks waiting on absent dependencies
    pub absent_dependencies: usize,
    /// Circular dependency count
    pub circular_dependencies: usize,
}

/// Result of blocker analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerAnalysis {
    /// All detected blockers
    pub blockers: Vec<Blocker>,
    /// Suggested resolutions
    pub suggestions: Vec<ResolutionSuggestion>,
    /// Blocker statistics
    pub stats: BlockerStats,
    /// Circular dependency chains
    pub circular_chains: Vec<Vec<String>>,
}

impl BlockerAnalysis {
    /// Whether nothing is blocked.
    pub fn is_clear(&self) -> bool {
        self.blockers.is_empty()
    }
}

/// Finds blockers in a plan snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockerDetector;

impl BlockerDetector {
    /// Create a new blocker detector.
    pub fn new() -> Self {
        Self
    }

    /// Detect all current blockers with full analysis.
    pub fn analyze(&self, snapshot: &PlanSnapshot) -> BlockerAnalysis {
        let mut blockers = self.detect_failures(snapshot);
        blockers.extend(self.detect_waiting(snapshot));

        let circular_chains = self.detect_cycles(snapshot);
        for chain in &circular_chains {
            let members: HashSet<&String> = chain.iter().collect();
            for name in members {
                blockers.push(Blocker {
                    task: name.clone(),
                    required: snapshot.task(name).map(|t| t.required).unwrap_or(true),
                    kind: BlockerKind::Cycle {
                        chain: chain.clone(),
                    },
                });
            }
        }
        blockers.sort_by(|a, b| {
            position(snapshot, &a.task)
                .cmp(&position(snapshot, &b.task))
                .then_with(|| kind_rank(&a.kind).cmp(&kind_rank(&b.kind)))
        });

        let suggestions = self.generate_suggestions(snapshot, &blockers, &circular_chains);
        let stats = BlockerStats {
            total_blockers: blockers.len(),
            failed: snapshot.with_status(TaskStatus::Failed).count(),
            skipped: snapshot.with_status(TaskStatus::Skipped).count(),
            absent_dependencies: blockers
                .iter()
                .filter(|b| matches!(b.kind, BlockerKind::AbsentDependency { .. }))
                .count(),
            circular_dependencies: circular_chains.len(),
        };

        BlockerAnalysis {
            blockers,
            suggestions,
            stats,
            circular_chains,
        }
    }

    /// Failed tasks, each with the dependents skipped because of it.
    fn detect_failures(&self, snapshot: &PlanSnapshot) -> Vec<Blocker> {
        snapshot
            .with_status(TaskStatus::Failed)
            .map(|task| Blocker {
                task: task.name.clone(),
                required: task.required,
                kind: BlockerKind::FailedTask {
                    error: task.error.clone().unwrap_or_default(),
                    dependents: snapshot
                        .with_status(TaskStatus::Skipped)
                        .filter(|t| t.blocked_by.as_deref() == Some(task.name.as_str()))
                        .map(|t| t.name.clone())
                        .collect(),
                },
            })
            .collect()
    }

    /// Tasks that never became ready.
    fn detect_waiting(&self, snapshot: &PlanSnapshot) -> Vec<Blocker> {
        let mut blockers = Vec::new();

        for task in snapshot.tasks.iter().filter(|t| t.status.is_schedulable()) {
            let mut unfinished = Vec::new();
            for dep in &task.dependencies {
                let matched = resolve(snapshot, task, dep);
                if matched.is_empty() {
                    blockers.push(Blocker {
                        task: task.name.clone(),
                        required: task.required,
                        kind: BlockerKind::AbsentDependency {
                            dependency: dep.to_string(),
                        },
                    });
                }
                unfinished.extend(
                    matched
                        .into_iter()
                        .filter(|t| !t.status.is_terminal())
                        .map(|t| t.name.clone()),
                );
            }
            if !unfinished.is_empty() {
                blockers.push(Blocker {
                    task: task.name.clone(),
                    required: task.required,
                    kind: BlockerKind::Unfinished { on: unfinished },
                });
            }
        }
        blockers
    }

    /// Detect circular dependencies in the task graph.
    fn detect_cycles(&self, snapshot: &PlanSnapshot) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for start in &snapshot.tasks {
            if visited.contains(start.name.as_str()) {
                continue;
            }
            let mut recursion_stack = HashSet::new();
            if let Some(cycle) = find_cycle(
                snapshot,
                start,
                &mut visited,
                &mut recursion_stack,
                &mut Vec::new(),
            ) {
                cycles.push(cycle);
            }
        }
        cycles
    }

    /// Generate resolution suggestions for blockers.
    fn generate_suggestions(
        &self,
        snapshot: &PlanSnapshot,
        blockers: &[Blocker],
        circular_chains: &[Vec<String>],
    ) -> Vec<ResolutionSuggestion> {
        let mut suggestions = Vec::new();

        for blocker in blockers {
            match &blocker.kind {
                BlockerKind::FailedTask { error, dependents } => {
                    let task = snapshot.task(&blocker.task);
                    let unblocks = if dependents.is_empty() {
                        String::new()
                    } else {
                        format!(" to unblock {}", dependents.join(", "))
                    };
                    if error.starts_with("fatal failure") || error.starts_with("capability panicked") {
                        suggestions.push(ResolutionSuggestion {
                            action: ResolutionAction::ManualReview,
                            description: format!(
                                "Fix the cause of `{}` ({}) and rerun{}",
                                blocker.task, error, unblocks
                            ),
                            priority: 1,
                        });
                    } else {
                        let (attempt, max) = task.map(|t| (t.attempt, t.max_iterations)).unwrap_or((0, 0));
                        suggestions.push(ResolutionSuggestion {
                            action: ResolutionAction::RetryTask,
                            description: format!(
                                "Raise max_iterations of `{}` (used {attempt} of {max}) or revise its input{}",
                                blocker.task, unblocks
                            ),
                            priority: if blocker.required { 1 } else { 3 },
                        });
                    }
                }
                BlockerKind::AbsentDependency { dependency } => {
                    suggestions.push(ResolutionSuggestion {
                        action: ResolutionAction::AddTasks,
                        description: format!(
                            "Add a task matching `{dependency}` or remove it from `{}`",
                            blocker.task
                        ),
                        priority: 2,
                    });
                }
                BlockerKind::Unfinished { on } => {
                    suggestions.push(ResolutionSuggestion {
                        action: ResolutionAction::Wait,
                        description: format!("`{}` is waiting on {}", blocker.task, on.join(", ")),
                        priority: 4,
                    });
                }
                BlockerKind::Cycle { .. } => {}
            }
        }

        for chain in circular_chains {
            suggestions.push(ResolutionSuggestion {
                action: ResolutionAction::ModifyDependencies,
                description: format!("Break the dependency cycle {}", chain.join(" -> ")),
                priority: 1,
            });
        }

        suggestions.sort_by_key(|s| s.priority);
        suggestions
    }
}

/// Tasks an expression matches; a prefix never matches its own task.
fn resolve<'a>(
    snapshot: &'a PlanSnapshot,
    task: &TaskSnapshot,
    dependency: &Dependency,
) -> Vec<&'a TaskSnapshot> {
    snapshot
        .tasks
        .iter()
        .filter(|t| dependency.matches(&t.name))
        .filter(|t| !(dependency.is_prefix() && t.name == task.name))
        .collect()
}

/// Find a cycle starting from a node using DFS.
fn find_cycle<'a>(
    snapshot: &'a PlanSnapshot,
    node: &'a TaskSnapshot,
    visited: &mut HashSet<&'a str>,
    recursion_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(&node.name);
    recursion_stack.insert(&node.name);
    path.push(&node.name);

    for dep in &node.dependencies {
        for target in resolve(snapshot, node, dep) {
            if !visited.contains(target.name.as_str()) {
                if let Some(cycle) = find_cycle(snapshot, target, visited, recursion_stack, path) {
                    return Some(cycle);
                }
            } else if recursion_stack.contains(target.name.as_str()) {
                let start = path.iter().position(|n| *n == target.name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(target.name.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    recursion_stack.remove(node.name.as_str());
    None
}

fn position(snapshot: &PlanSnapshot, name: &str) -> usize {
    snapshot
        .tasks
        .iter()
        .position(|t| t.name == name)
        .unwrap_or(usize::MAX)
}

fn kind_rank(kind: &BlockerKind) -> u8 {
    match kind {
        BlockerKind::FailedTask { .. } => 0,
        BlockerKind::Cycle { .. } => 1,
        BlockerKind::AbsentDependency { .. } => 2,
        BlockerKind::Unfinished { .. } => 3,
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
    }

    #[test]
    fn test_failed_root_lists_dependents() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![
            task("arc"),
            task("scene_1").depends_on("arc"),
            task("scene_2").depends_on("arc"),
        ])
        .unwrap();
        plan.begin_attempt("arc").unwrap();
        plan.fail("arc", "fatal failure: no premise").unwrap();
        plan.skip("scene_1", "arc").unwrap();
        plan.skip("scene_2", "arc").unwrap();

        let analysis = BlockerDetector::new().analyze(&plan.snapshot());
        assert_eq!(
            analysis.blockers,
            vec![Blocker {
                task: "arc".to_string(),
                required: true,
                kind: BlockerKind::FailedTask {
                    error: "fatal failure: no premise".to_string(),
                    dependents: vec!["scene_1".to_string(), "scene_2".to_string()],
                },
            }]
        );
        assert_eq!(analysis.stats.skipped, 2);
        assert_eq!(analysis.suggestions[0].action, ResolutionAction::ManualReview);
        assert!(analysis.suggestions[0]
            .description
            .ends_with("to unblock scene_1, scene_2"));
    }

    #[test]
    fn test_absent_wildcard_and_waiting() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![
            task("summary").depends_on("chapter_*"),
            task("epilogue").depends_on("summary"),
        ])
        .unwrap();

        let analysis = BlockerDetector::new().analyze(&plan.snapshot());
        assert_eq!(analysis.stats.absent_dependencies, 1);
        assert_eq!(
            analysis.blockers[0].kind,
            BlockerKind::AbsentDependency {
                dependency: "chapter_*".to_string()
            }
        );
        assert_eq!(
            analysis.blockers[1].kind,
            BlockerKind::Unfinished {
                on: vec!["summary".to_string()]
            }
        );
        assert_eq!(analysis.suggestions[0].action, ResolutionAction::AddTasks);
    }

    #[test]
    fn test_cycle_detected() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![
            task("a").depends_on("c"),
            task("b").depends_on("a"),
            task("c").depends_on("b"),
        ])
        .unwrap();

        let analysis = BlockerDetector::new().analyze(&plan.snapshot());
        assert_eq!(
            analysis.circular_chains,
            vec![vec!["a", "c", "b", "a"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()]
        );
        assert_eq!(analysis.stats.circular_dependencies, 1);
        assert_eq!(analysis.suggestions[0].action, ResolutionAction::ModifyDependencies);
    }

    #[test]
    fn test_clean_plan_has_no_blockers() {
        let mut plan = Plan::new();
        plan.add_task(task("a")).unwrap();
        plan.begin_attempt("a").unwrap();
        plan.complete("a", Value::Null).unwrap();
        assert!(BlockerDetector::new().analyze(&plan.snapshot()).is_clear());
    }
}
