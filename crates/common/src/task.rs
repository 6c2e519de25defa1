//! Task entities and the workflow state machine they move through.

use crate::message::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow status. `Done` is terminal under normal rules; only the
/// privileged planner may override a transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Blocked,
}

impl TaskStatus {
    /// The allowed workflow edges out of this status.
    pub fn allowed_transitions(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Todo => &[TaskStatus::InProgress, TaskStatus::Blocked],
            TaskStatus::Blocked => &[TaskStatus::Todo, TaskStatus::InProgress],
            TaskStatus::InProgress => &[
                TaskStatus::InReview,
                TaskStatus::Blocked,
                TaskStatus::Todo,
            ],
            // review can reject back
            TaskStatus::InReview => &[TaskStatus::Done, TaskStatus::InProgress],
            TaskStatus::Done => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A unit of work in the shared task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created_by: String,
    pub created_at: u64,
    pub updated_at: u64,

    /// Task ids this task waits on
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,

    /// Must be signed off by a reviewer before it can reach `Done`
    #[serde(default = "default_true")]
    pub requires_review: bool,
    #[serde(default)]
    pub requires_testing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested_by: Option<String>,

    /// Next agent this task should be picked up by, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Todo,
            assignee: None,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            dependencies: Vec::new(),
            tags: Vec::new(),
            priority: TaskPriority::Medium,
            requires_review: true,
            requires_testing: false,
            reviewed_by: None,
            tested_by: None,
            handoff_to: None,
            handoff_reason: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// Parameters for creating a task, as they arrive from the model or an API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default = "default_true")]
    pub requires_review: bool,
    #[serde(default)]
    pub requires_testing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_is_terminal() {
        assert!(TaskStatus::Done.allowed_transitions().is_empty());
    }

    #[test]
    fn review_can_reject_back() {
        assert!(TaskStatus::InReview.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InReview.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::InReview.can_transition_to(TaskStatus::Todo));
    }

    #[test]
    fn todo_cannot_jump_to_done() {
        assert!(!TaskStatus::Todo.can_transition_to(TaskStatus::Done));
        assert!(!TaskStatus::Todo.can_transition_to(TaskStatus::InReview));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        let parsed: TaskStatus = serde_json::from_str("\"in_review\"").unwrap();
        assert_eq!(parsed, TaskStatus::InReview);
    }

    #[test]
    fn spec_defaults() {
        let spec: TaskSpec = serde_json::from_str(r#"{"title": "Build API"}"#).unwrap();
        assert!(spec.requires_review);
        assert!(!spec.requires_testing);
        assert_eq!(spec.priority, TaskPriority::Medium);
        assert!(spec.dependencies.is_empty());
    }
}
