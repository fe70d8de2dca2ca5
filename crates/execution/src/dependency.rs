//! Dependency resolution for tasks.
//!
//! Expressions are resolved against the plan as it stands right now, so a
//! prefix pattern picks up tasks that later phases append.

use plotloom_core::{Dependency, Plan, Task, TaskStatus};
use std::collections::{HashMap, HashSet};

/// Result of checking a task's dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every expression resolved to completed tasks
    Ready,

    /// Some dependency has not finished, or does not exist yet
    Waiting {
        /// Expressions that currently match nothing
        absent: Vec<Dependency>,
        /// Matched tasks that are not terminal yet
        unfinished: Vec<String>,
    },

    /// A matched task failed or was skipped
    Blocked {
        /// Dependency that ended badly
        dependency: String,
        /// The failed task at the root of the chain
        root: String,
    },
}

impl Resolution {
    /// Whether the task is waiting only on expressions with no match.
    pub fn is_waiting_on_absent(&self) -> bool {
        matches!(self, Self::Waiting { absent, unfinished } if !absent.is_empty() && unfinished.is_empty())
    }
}

/// Error computing an execution order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// The graph contains a cycle
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// An expression matches no task
    #[error("task `{task}` depends on `{dependency}`, which matches no task")]
    Unresolved {
        /// Task holding the expression
        task: String,
        /// The expression
        dependency: String,
    },
}

/// Resolves dependency expressions against a plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyMatcher;

impl DependencyMatcher {
    /// Create a new matcher.
    pub fn new() -> Self {
        Self
    }

    /// Tasks an expression refers to, in insertion order.
    ///
    /// A prefix never matches the requesting task itself.
    pub fn resolve<'p>(
        &self,
        dependency: &Dependency,
        plan: &'p Plan,
        requester: &str,
    ) -> Vec<&'p Task> {
        match dependency {
            Dependency::Exact(name) => plan.task(name).into_iter().collect(),
            Dependency::Prefix(_) => plan
                .tasks()
                .filter(|t| t.name != requester && dependency.matches(&t.name))
                .collect(),
        }
    }

    /// Every task `task` depends on, deduplicated, in declaration order.
    pub fn resolve_all<'p>(&self, plan: &'p Plan, task: &Task) -> Vec<&'p Task> {
        let mut seen = HashSet::new();
        task.dependencies
            .iter()
            .flat_map(|dep| self.resolve(dep, plan, &task.name))
            .filter(|t| seen.insert(t.name.as_str()))
            .collect()
    }

    /// Check whether a task can run.
    pub fn check(&self, plan: &Plan, task: &Task) -> Resolution {
        let mut absent = Vec::new();
        let mut unfinished = Vec::new();

        for dep in &task.dependencies {
            let matched = self.resolve(dep, plan, &task.name);
            if matched.is_empty() {
                absent.push(dep.clone());
                continue;
            }
            for target in matched {
                match target.status() {
                    TaskStatus::Completed => {}
                    TaskStatus::Failed => {
                        return Resolution::Blocked {
                            dependency: target.name.clone(),
                            root: target.name.clone(),
                        };
                    }
                    TaskStatus::Skipped => {
                        return Resolution::Blocked {
                            dependency: target.name.clone(),
                            root: target.blocked_by().unwrap_or(&target.name).to_string(),
                        };
                    }
                    _ => unfinished.push(target.name.clone()),
                }
            }
        }

        if absent.is_empty() && unfinished.is_empty() {
            Resolution::Ready
        } else {
            Resolution::Waiting { absent, unfinished }
        }
    }

    /// Resolved edges: task -> tasks it depends on.
    pub fn graph(&self, plan: &Plan) -> HashMap<String, Vec<String>> {
        plan.tasks()
            .map(|task| {
                let deps = self
                    .resolve_all(plan, task)
                    .into_iter()
                    .map(|t| t.name.clone())
                    .collect();
                (task.name.clone(), deps)
            })
            .collect()
    }

    /// Group every task into stages that could run together, assuming each
    /// task succeeds. Stages and their members follow insertion order.
    pub fn execution_order(&self, plan: &Plan) -> Result<Vec<Vec<String>>, OrderError> {
        for task in plan.tasks() {
            for dep in &task.dependencies {
                if self.resolve(dep, plan, &task.name).is_empty() {
                    return Err(OrderError::Unresolved {
                        task: task.name.clone(),
                        dependency: dep.to_string(),
                    });
                }
            }
        }

        let graph = self.graph(plan);
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in plan.names() {
            let deps = graph.get(name).map(Vec::as_slice).unwrap_or(&[]);
            in_degree.insert(name, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(name);
            }
        }

        let mut stages: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<&str> = plan.names().filter(|n| in_degree[n] == 0).collect();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = HashSet::new();
            for name in &current {
                for dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(*dependent);
                        }
                    }
                }
            }
            stages.push(current.iter().map(|n| n.to_string()).collect());
            current = plan.names().filter(|n| next.contains(n)).collect();
        }

        if placed < plan.len() {
            let cycle = self.find_cycle(plan).unwrap_or_default();
            return Err(OrderError::Cycle(cycle));
        }
        Ok(stages)
    }

    /// First dependency cycle found, as a closed path (`a -> b -> a`).
    pub fn find_cycle(&self, plan: &Plan) -> Option<Vec<String>> {
        let graph = self.graph(plan);
        let mut state: HashMap<&str, Visit> = HashMap::new();

        for start in plan.names() {
            if state.contains_key(start) {
                continue;
            }
            let mut path: Vec<&str> = Vec::new();
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            state.insert(start, Visit::InProgress);
            path.push(start);

            while let Some((node, next_edge)) = stack.pop() {
                let edges = graph.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if next_edge < edges.len() {
                    stack.push((node, next_edge + 1));
                    let target = edges[next_edge].as_str();
                    match state.get(target) {
                        Some(Visit::InProgress) => {
                            let from = path.iter().position(|n| *n == target).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[from..].iter().map(|n| n.to_string()).collect();
                            cycle.push(target.to_string());
                            return Some(cycle);
                        }
                        Some(Visit::Done) => {}
                        None => {
                            state.insert(target, Visit::InProgress);
                            path.push(target);
                            stack.push((target, 0));
                        }
                    }
                } else {
                    state.insert(node, Visit::Done);
                    path.pop();
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}
