//! Configurable human-in-the-loop pause points.
//!
//! Before executing an action, agents check it against checkpoint rules;
//! a match blocks the action on human approval.

use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use swarm_common::ActionKind;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRule {
    pub id: String,
    /// What the pattern is matched against: "command", "file_write",
    /// "file_delete", or "custom" (matches any action)
    pub trigger: String,
    pub pattern: String,
    pub label: String,
}

fn default_rules() -> Vec<CheckpointRule> {
    let rule = |id: &str, trigger: &str, pattern: &str, label: &str| CheckpointRule {
        id: id.into(),
        trigger: trigger.into(),
        pattern: pattern.into(),
        label: label.into(),
    };
    vec![
        rule("default-rm", "command", r"rm\s+-rf", "Destructive delete"),
        rule(
            "default-docker",
            "command",
            r"docker\s+(rm|rmi|system\s+prune)",
            "Docker cleanup",
        ),
        rule("default-drop", "command", r"DROP\s+(TABLE|DATABASE)", "Database drop"),
        rule(
            "default-deploy",
            "command",
            r"(deploy|push.*production|kubectl\s+apply)",
            "Production deploy",
        ),
    ]
}

pub struct CheckpointManager {
    rules: RwLock<Vec<CheckpointRule>>,
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self {
            rules: RwLock::new(default_rules()),
        }
    }
}

impl CheckpointManager {
    /// Start with no rules at all (tests, fully autonomous runs).
    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn rules(&self) -> Vec<CheckpointRule> {
        self.rules.read().clone()
    }

    pub fn add_rule(&self, trigger: &str, pattern: &str, label: &str) -> CheckpointRule {
        let rule = CheckpointRule {
            id: format!("custom-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            trigger: trigger.to_string(),
            pattern: pattern.to_string(),
            label: if label.is_empty() {
                format!("Custom: {}", &pattern[..pattern.len().min(30)])
            } else {
                label.to_string()
            },
        };
        info!(label = %rule.label, "Checkpoint added");
        self.rules.write().push(rule.clone());
        rule
    }

    pub fn remove_rule(&self, rule_id: &str) {
        self.rules.write().retain(|r| r.id != rule_id);
    }

    /// Check an action against the rules. Returns the first matching rule.
    pub fn check_action(&self, action: &ActionKind) -> Option<CheckpointRule> {
        let (check_text, trigger_type) = match action {
            ActionKind::RunCommand { command } => (command.clone(), "command"),
            ActionKind::WriteFile { path, .. } => (path.clone(), "file_write"),
            ActionKind::EditFile { path, .. } => (path.clone(), "file_write"),
            ActionKind::DeleteFile { path } => (path.clone(), "file_delete"),
            _ => return None,
        };

        for rule in self.rules.read().iter() {
            if rule.trigger != trigger_type && rule.trigger != "custom" {
                continue;
            }
            let Ok(re) = Regex::new(&format!("(?i){}", rule.pattern)) else {
                warn!(rule = %rule.id, "Invalid checkpoint pattern, skipping");
                continue;
            };
            if re.is_match(&check_text) {
                info!(label = %rule.label, text = %check_text, "Checkpoint triggered");
                return Some(rule.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(command: &str) -> ActionKind {
        ActionKind::RunCommand {
            command: command.into(),
        }
    }

    #[test]
    fn default_rules_catch_destructive_commands() {
        let manager = CheckpointManager::default();
        assert!(manager.check_action(&run("rm -rf build/")).is_some());
        assert!(manager.check_action(&run("docker system prune -af")).is_some());
        assert!(manager.check_action(&run("psql -c 'DROP TABLE users'")).is_some());
        assert!(manager.check_action(&run("ls -la")).is_none());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let manager = CheckpointManager::default();
        assert!(manager.check_action(&run("drop table users")).is_some());
    }

    #[test]
    fn custom_rule_on_file_writes() {
        let manager = CheckpointManager::empty();
        manager.add_rule("file_write", r"\.env", "Secrets file");

        let action = ActionKind::WriteFile {
            path: ".env".into(),
            content: "KEY=1".into(),
        };
        let matched = manager.check_action(&action).unwrap();
        assert_eq!(matched.label, "Secrets file");

        // Commands don't hit file_write rules.
        assert!(manager.check_action(&run("cat .env")).is_none());
    }

    #[test]
    fn remove_rule_by_id() {
        let manager = CheckpointManager::empty();
        let rule = manager.add_rule("command", "terraform", "");
        assert!(manager.check_action(&run("terraform apply")).is_some());
        manager.remove_rule(&rule.id);
        assert!(manager.check_action(&run("terraform apply")).is_none());
    }

    #[test]
    fn read_actions_never_match() {
        let manager = CheckpointManager::default();
        assert!(manager
            .check_action(&ActionKind::ReadFile { path: "rm -rf".into() })
            .is_none());
    }
}
