//! Structured actions decoded from model output.
//!
//! The model replies with `{"thinking": ..., "action": <kind>,
//! "params": {...}, "message": ...}`. Rather than passing an open
//! string-keyed map around, the reply is decoded at the boundary into a
//! closed tagged union; anything unparseable or unrecognized degrades to a
//! plain `Message` action instead of failing the turn.

use crate::task::{TaskSpec, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
}

/// One variant per action kind the runtime knows how to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum ActionKind {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        #[serde(default)]
        content: String,
    },
    EditFile {
        path: String,
        search: String,
        replace: String,
    },
    ListFiles {
        #[serde(default)]
        path: String,
    },
    DeleteFile {
        path: String,
    },
    RunCommand {
        command: String,
    },
    CreateTask(TaskSpec),
    CreateTasks {
        tasks: Vec<TaskSpec>,
    },
    FinalizePlan,
    UpdateTask {
        task_id: String,
        status: TaskStatus,
    },
    AssignTask {
        task_id: String,
        assignee: String,
    },
    SuggestTask {
        title: String,
        #[serde(default)]
        reason: String,
    },
    SubmitReview {
        task_id: String,
        verdict: ReviewVerdict,
        #[serde(default)]
        notes: String,
    },
    ReportTests {
        task_id: String,
        passed: bool,
        #[serde(default)]
        summary: String,
    },
    Handoff {
        task_id: String,
        #[serde(default)]
        files_touched: Vec<String>,
        #[serde(default)]
        commands_run: Vec<String>,
        #[serde(default)]
        known_risks: Vec<String>,
        #[serde(default)]
        next_role: String,
    },
    RequestReview {
        #[serde(default)]
        task_id: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        reviewers: Vec<String>,
    },
    EscalateTask {
        task_id: String,
        #[serde(default)]
        reason: String,
    },
    AskHelp {
        #[serde(default)]
        target: String,
        question: String,
        #[serde(default)]
        context: String,
        #[serde(default)]
        task_id: String,
    },
    ShareInsight {
        insight: String,
        #[serde(default)]
        files: Vec<String>,
    },
    ProposeApproach {
        approach: String,
        #[serde(default)]
        alternatives: Vec<String>,
        #[serde(default)]
        task_id: String,
    },
    Done,
    Message,
}

impl ActionKind {
    /// Snake-case kind name, matching the wire tag. Used for logging,
    /// checkpoint matching, and capability checks.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ReadFile { .. } => "read_file",
            ActionKind::WriteFile { .. } => "write_file",
            ActionKind::EditFile { .. } => "edit_file",
            ActionKind::ListFiles { .. } => "list_files",
            ActionKind::DeleteFile { .. } => "delete_file",
            ActionKind::RunCommand { .. } => "run_command",
            ActionKind::CreateTask(_) => "create_task",
            ActionKind::CreateTasks { .. } => "create_tasks",
            ActionKind::FinalizePlan => "finalize_plan",
            ActionKind::UpdateTask { .. } => "update_task",
            ActionKind::AssignTask { .. } => "assign_task",
            ActionKind::SuggestTask { .. } => "suggest_task",
            ActionKind::SubmitReview { .. } => "submit_review",
            ActionKind::ReportTests { .. } => "report_tests",
            ActionKind::Handoff { .. } => "handoff",
            ActionKind::RequestReview { .. } => "request_review",
            ActionKind::EscalateTask { .. } => "escalate_task",
            ActionKind::AskHelp { .. } => "ask_help",
            ActionKind::ShareInsight { .. } => "share_insight",
            ActionKind::ProposeApproach { .. } => "propose_approach",
            ActionKind::Done => "done",
            ActionKind::Message => "message",
        }
    }

    /// Kinds whose failure counts toward a task's consecutive-failure streak.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionKind::WriteFile { .. }
                | ActionKind::EditFile { .. }
                | ActionKind::RunCommand { .. }
        )
    }
}

/// A fully decoded model reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub thinking: String,
    #[serde(flatten)]
    pub action: ActionKind,
    #[serde(default)]
    pub message: String,
}

impl AgentReply {
    pub fn message_only(text: impl Into<String>) -> Self {
        Self {
            thinking: String::new(),
            action: ActionKind::Message,
            message: text.into(),
        }
    }

    /// Decode raw model output. Strips markdown fences, then:
    /// - valid JSON with a known action kind decodes fully;
    /// - valid JSON with an unknown/malformed action degrades to `Message`
    ///   (keeping whatever `thinking`/`message` text it carried);
    /// - anything else becomes a `Message` wrapping the raw text.
    pub fn parse(raw: &str) -> Self {
        let text = strip_code_fences(raw);

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Self::message_only(text),
        };

        let first_err = match serde_json::from_value::<AgentReply>(value.clone()) {
            Ok(reply) => return reply,
            Err(e) => e,
        };

        // Models emit "params": {} for parameterless kinds and sometimes omit
        // the key entirely; retry once with the opposite shape before giving up.
        if let Some(normalized) = normalize_params(&value) {
            if let Ok(reply) = serde_json::from_value::<AgentReply>(normalized) {
                return reply;
            }
        }

        let kind = value
            .get("action")
            .and_then(|a| a.as_str())
            .unwrap_or("<missing>");
        warn!(action = kind, error = %first_err, "Unrecognized or malformed action, treating as message");
        let thinking = value
            .get("thinking")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| text.to_string());
        Self {
            thinking,
            action: ActionKind::Message,
            message,
        }
    }
}

/// Flip the `params` shape: drop an empty/null `params` (unit kinds reject
/// `{}`), or inject `"params": {}` when the key is missing (struct kinds
/// with all-default fields require it). Returns `None` when no retry shape
/// exists.
fn normalize_params(value: &serde_json::Value) -> Option<serde_json::Value> {
    let obj = value.as_object()?;
    let mut alt = obj.clone();
    match obj.get("params") {
        Some(p) if p.is_null() || p.as_object().is_some_and(|m| m.is_empty()) => {
            alt.remove("params");
        }
        None => {
            alt.insert("params".into(), serde_json::json!({}));
        }
        Some(_) => return None,
    }
    Some(serde_json::Value::Object(alt))
}

/// Strip a leading/trailing markdown code fence, if present.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_edit_file() {
        let raw = r#"{"thinking": "fix the bug", "action": "edit_file",
            "params": {"path": "src/app.py", "search": "foo", "replace": "bar"},
            "message": "patching"}"#;
        let reply = AgentReply::parse(raw);
        assert_eq!(reply.thinking, "fix the bug");
        assert_eq!(reply.message, "patching");
        match reply.action {
            ActionKind::EditFile {
                path,
                search,
                replace,
            } => {
                assert_eq!(path, "src/app.py");
                assert_eq!(search, "foo");
                assert_eq!(replace, "bar");
            }
            other => panic!("wrong kind: {}", other.name()),
        }
    }

    #[test]
    fn decodes_unit_kinds_without_params() {
        let reply = AgentReply::parse(r#"{"thinking": "", "action": "done", "message": ""}"#);
        assert!(matches!(reply.action, ActionKind::Done));

        let reply = AgentReply::parse(r#"{"action": "finalize_plan"}"#);
        assert!(matches!(reply.action, ActionKind::FinalizePlan));
    }

    #[test]
    fn empty_params_object_accepted_for_unit_kinds() {
        let reply =
            AgentReply::parse(r#"{"thinking": "all tasks finished", "action": "done", "params": {}, "message": "wrapping up"}"#);
        assert!(matches!(reply.action, ActionKind::Done));
        assert_eq!(reply.message, "wrapping up");

        let reply = AgentReply::parse(r#"{"action": "message", "params": null}"#);
        assert!(matches!(reply.action, ActionKind::Message));
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"action\": \"message\", \"message\": \"hi\"}\n```";
        let reply = AgentReply::parse(raw);
        assert!(matches!(reply.action, ActionKind::Message));
        assert_eq!(reply.message, "hi");
    }

    #[test]
    fn non_json_becomes_message() {
        let reply = AgentReply::parse("I think we should refactor the parser first.");
        assert!(matches!(reply.action, ActionKind::Message));
        assert!(reply.message.contains("refactor"));
    }

    #[test]
    fn unknown_kind_degrades_to_message() {
        let raw = r#"{"thinking": "spawning", "action": "summon_demon",
            "params": {"name": "x"}, "message": "let me try this"}"#;
        let reply = AgentReply::parse(raw);
        assert!(matches!(reply.action, ActionKind::Message));
        assert_eq!(reply.thinking, "spawning");
        assert_eq!(reply.message, "let me try this");
    }

    #[test]
    fn create_tasks_batch() {
        let raw = r#"{"action": "create_tasks", "params": {"tasks": [
            {"title": "Set up project", "assignee": "developer"},
            {"title": "Write tests", "assignee": "tester", "dependencies": ["t1"]}
        ]}}"#;
        let reply = AgentReply::parse(raw);
        match reply.action {
            ActionKind::CreateTasks { tasks } => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].title, "Set up project");
                assert_eq!(tasks[1].dependencies, vec!["t1"]);
            }
            other => panic!("wrong kind: {}", other.name()),
        }
    }

    #[test]
    fn update_task_status_parses() {
        let raw = r#"{"action": "update_task",
            "params": {"task_id": "ab12", "status": "in_review"}}"#;
        let reply = AgentReply::parse(raw);
        match reply.action {
            ActionKind::UpdateTask { task_id, status } => {
                assert_eq!(task_id, "ab12");
                assert_eq!(status, crate::task::TaskStatus::InReview);
            }
            other => panic!("wrong kind: {}", other.name()),
        }
    }

    #[test]
    fn mutating_kinds() {
        let edit = ActionKind::EditFile {
            path: "a".into(),
            search: "b".into(),
            replace: "c".into(),
        };
        assert!(edit.is_mutating());
        assert!(!ActionKind::Done.is_mutating());
        assert!(!ActionKind::ReadFile { path: "a".into() }.is_mutating());
    }
}
