//! Working memory - ephemeral per-process task state
//!
//! Holds the current project and task, a capped ring of recent actions and a
//! capped active-context ring seeded by high-importance stores. Nothing here
//! is persisted; [`crate::MemoryStore::set_project`] rebuilds it from the
//! stored entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A recently taken action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentAction {
    /// Action description
    pub action: String,
    /// Whether it succeeded
    pub success: bool,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral task state owned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    /// Current project id
    pub project_id: Option<String>,

    /// Current task description
    pub current_task: Option<String>,

    /// Most recent actions, newest first
    pub recent_actions: VecDeque<RecentAction>,

    /// Summaries of important memories, newest first
    pub active_context: VecDeque<String>,

    #[serde(skip)]
    action_capacity: usize,

    #[serde(skip)]
    context_capacity: usize,
}

impl WorkingMemory {
    /// Create empty working memory with the given ring capacities
    pub fn new(action_capacity: usize, context_capacity: usize) -> Self {
        Self {
            project_id: None,
            current_task: None,
            recent_actions: VecDeque::with_capacity(action_capacity),
            active_context: VecDeque::with_capacity(context_capacity),
            action_capacity: action_capacity.max(1),
            context_capacity: context_capacity.max(1),
        }
    }

    /// Record an action at the front, dropping the oldest past capacity
    pub fn push_action(&mut self, action: impl Into<String>, success: bool, at: DateTime<Utc>) {
        self.recent_actions.push_front(RecentAction {
            action: action.into(),
            success,
            timestamp: at,
        });
        self.recent_actions.truncate(self.action_capacity);
    }

    /// Unshift a summary into the active context, dropping the oldest past capacity
    pub fn push_context(&mut self, summary: impl Into<String>) {
        self.active_context.push_front(summary.into());
        self.active_context.truncate(self.context_capacity);
    }

    /// Forget task state and both rings
    pub fn reset(&mut self, project_id: Option<String>) {
        self.project_id = project_id;
        self.current_task = None;
        self.recent_actions.clear();
        self.active_context.clear();
    }

    /// Short multi-line description used as the task segment of a context
    pub fn summary(&self, max_actions: usize) -> String {
        let mut lines = Vec::new();

        if let Some(project) = &self.project_id {
            lines.push(format!("Project: {}", project));
        }
        if let Some(task) = &self.current_task {
            lines.push(format!("Current task: {}", task));
        }
        if !self.recent_actions.is_empty() {
            lines.push("Recent actions:".to_string());
            for action in self.recent_actions.iter().take(max_actions) {
                lines.push(format!(
                    "- {} [{}]",
                    action.action,
                    if action.success { "ok" } else { "failed" }
                ));
            }
        }

        lines.join("\n")
    }

    /// Ring capacities as `(actions, context)`
    pub fn capacities(&self) -> (usize, usize) {
        (self.action_capacity, self.context_capacity)
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(20, 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rings_are_capped_newest_first() {
        let mut working = WorkingMemory::new(3, 2);
        let now = Utc::now();

        for i in 0..5 {
            working.push_action(format!("action-{}", i), i % 2 == 0, now);
            working.push_context(format!("ctx-{}", i));
        }

        assert_eq!(working.recent_actions.len(), 3);
        assert_eq!(working.recent_actions[0].action, "action-4");
        assert_eq!(working.active_context, VecDeque::from(vec![
            "ctx-4".to_string(),
            "ctx-3".to_string(),
        ]));
    }

    #[test]
    fn test_summary_and_reset() {
        let mut working = WorkingMemory::default();
        working.project_id = Some("promo".to_string());
        working.current_task = Some("add intro".to_string());
        working.push_action("render preview", false, Utc::now());

        let summary = working.summary(5);
        assert!(summary.contains("Project: promo"));
        assert!(summary.contains("render preview [failed]"));

        working.reset(Some("other".to_string()));
        assert_eq!(working.project_id.as_deref(), Some("other"));
        assert!(working.current_task.is_none());
        assert!(working.recent_actions.is_empty());
        assert_eq!(working.capacities(), (20, 50));
    }
}
