//! Role descriptors.
//!
//! Agent behavior is parameterized by a role descriptor instead of
//! subclassing: the descriptor carries the system prompt, a capability set,
//! and the write-permission policy, all checked through one authorization
//! function shared by every agent.

use crate::action::ActionKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Capabilities an agent role can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Write and modify workspace files
    CodeWrite,
    /// Run terminal commands
    CommandExecution,
    /// Create/finalize the task plan and complete the mission
    TaskPlanning,
    /// Sign off reviews
    CodeReview,
    /// Record test results
    TestExecution,
}

/// Which paths a role may write to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum WritePolicy {
    /// May write any workspace path
    Full,
    /// May only write paths matching one of these substrings
    TestsOnly { patterns: Vec<String> },
    /// May not write at all
    ReadOnly,
}

impl WritePolicy {
    pub fn allows(&self, path: &str) -> bool {
        match self {
            WritePolicy::Full => true,
            WritePolicy::TestsOnly { patterns } => patterns.iter().any(|p| path.contains(p.as_str())),
            WritePolicy::ReadOnly => false,
        }
    }
}

/// Everything the runtime needs to know about how an agent of this role
/// behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDescriptor {
    /// Role name, e.g. "Developer"
    pub name: String,

    /// Role-specific system prompt
    pub system_prompt: String,

    pub capabilities: HashSet<Capability>,

    pub write_policy: WritePolicy,

    /// Privileged planner: may override workflow transitions, create tasks,
    /// and complete the mission
    #[serde(default)]
    pub privileged: bool,

    /// Acts without waiting for inbound messages (the planner processes the
    /// mission goal before any bus traffic exists)
    #[serde(default)]
    pub proactive: bool,
}

impl RoleDescriptor {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Authorize a write-class action for a role. Returns a plain-text refusal
/// (fed back to the model as a system message) when the role may not perform
/// it, `None` when allowed.
pub fn check_write(role: &RoleDescriptor, action: &ActionKind, path: &str) -> Option<String> {
    if !matches!(
        action,
        ActionKind::WriteFile { .. } | ActionKind::EditFile { .. } | ActionKind::DeleteFile { .. }
    ) {
        return None;
    }

    if !role.has_capability(Capability::CodeWrite) {
        return Some(format!(
            "As a {}, you cannot use '{}'. Your role is to read and review, \
             then use 'suggest_task' to ask the planner to create fix tasks.",
            role.name,
            action.name(),
        ));
    }

    if !role.write_policy.allows(path) {
        let patterns = match &role.write_policy {
            WritePolicy::TestsOnly { patterns } => patterns.join(", "),
            _ => String::new(),
        };
        return Some(format!(
            "As a {}, you can only write test files (paths containing: {}). \
             '{}' is a production file. Use 'suggest_task' to ask the planner \
             to create a fix task for a developer.",
            role.name, patterns, path,
        ));
    }

    None
}
