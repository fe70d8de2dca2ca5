//! Task selection strategies.

use plotloom_core::Plan;
use std::cmp::Reverse;

/// Strategy for ordering the ready set before dispatch.
pub trait TaskSelector: Send + Sync {
    /// Order `ready` in place; the scheduler dispatches from the front.
    fn order(&self, plan: &Plan, ready: &mut Vec<String>);
}

/// Default selector: highest priority first, insertion order among equals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritySelector;

impl PrioritySelector {
    /// Create a new default selector.
    pub fn new() -> Self {
        Self
    }
}

impl TaskSelector for PrioritySelector {
    fn order(&self, plan: &Plan, ready: &mut Vec<String>) {
        ready.sort_by_key(|name| {
            let priority = plan.task(name).map(|t| t.priority).unwrap_or(i32::MIN);
            let position = plan.position(name).unwrap_or(usize::MAX);
            (Reverse(priority), position)
        });
    }
}

/// Selector strategies available.
#[derive(Debug, Clone, Copy)]
pub enum SelectorStrategy {
    /// Priority, then insertion order
    Priority(PrioritySelector),
    /// Insertion order only
    Fifo,
}

impl Default for SelectorStrategy {
    fn default() -> Self {
        Self::Priority(PrioritySelector)
    }
}

impl TaskSelector for SelectorStrategy {
    fn order(&self, plan: &Plan, ready: &mut Vec<String>) {
        match self {
            Self::Priority(s) => s.order(plan, ready),
            Self::Fifo => ready.sort_by_key(|name| plan.position(name).unwrap_or(usize::MAX)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotloom_core::capability::from_fn;
    use plotloom_core::{Context, Task};
    use serde_json::Value;

    fn task(name: &str, priority: i32) -> Task {
        Task::new(name, from_fn("noop", |_ctx: Context| async { Ok(Value::Null) }))
            .with_priority(priority)
    }

    #[test]
    fn test_priority_then_insertion() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![task("c", 5), task("a", 10), task("b", 10)])
            .unwrap();

        let mut ready = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        PrioritySelector::new().order(&plan, &mut ready);
        assert_eq!(ready, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let mut plan = Plan::new();
        plan.add_tasks(vec![task("low", -1), task("high", 9)]).unwrap();

        let mut ready = vec!["high".to_string(), "low".to_string()];
        SelectorStrategy::Fifo.order(&plan, &mut ready);
        assert_eq!(ready, vec!["low", "high"]);
    }
}
