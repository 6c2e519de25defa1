//! Message types for inter-agent communication on the bus.

use serde::{Deserialize, Serialize};

/// Kind of a bus message. Drives delivery filtering and the agent's
/// "is this actionable" gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    CodeUpdate,
    TaskAssigned,
    ReviewRequest,
    ReviewResult,
    TestResult,
    ApprovalRequest,
    ApprovalResponse,
    TerminalOutput,
    FileUpdate,
    System,
    AgentStatus,
    Thought,
    AskHelp,
    ShareInsight,
    ProposeApproach,
    Handoff,
    MissionComplete,
}

impl MessageType {
    /// Types that always reach every mailbox, even when the message carries
    /// an explicit mention list.
    pub fn is_broadcast(self) -> bool {
        matches!(
            self,
            MessageType::System | MessageType::AgentStatus | MessageType::TaskAssigned
        )
    }
}

/// An immutable message published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Unix millis at publish time
    pub timestamp: u64,

    /// Agent ID of the sender
    pub sender: String,

    /// Role name of the sender
    pub sender_role: String,

    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// Human-readable content
    pub content: String,

    /// Structured payload (diffs, task dicts, command output)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,

    /// Agents this message is addressed to; empty = unaddressed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,

    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "general".into()
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        sender_role: impl Into<String>,
        msg_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            sender: sender.into(),
            sender_role: sender_role.into(),
            msg_type,
            content: content.into(),
            data: serde_json::Value::Null,
            mentions: Vec::new(),
            channel: default_channel(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Whether an agent should see this message at all.
    pub fn addressed_to(&self, agent_id: &str) -> bool {
        self.mentions.is_empty()
            || self.mentions.iter().any(|m| m == agent_id)
            || self.msg_type.is_broadcast()
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageType::TaskAssigned).unwrap(),
            "\"task_assigned\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::AskHelp).unwrap(),
            "\"ask_help\""
        );
    }

    #[test]
    fn broadcast_allowlist() {
        assert!(MessageType::System.is_broadcast());
        assert!(MessageType::AgentStatus.is_broadcast());
        assert!(MessageType::TaskAssigned.is_broadcast());
        assert!(!MessageType::Chat.is_broadcast());
        assert!(!MessageType::ReviewRequest.is_broadcast());
    }

    #[test]
    fn mention_addressing() {
        let msg = Message::new("dev-1", "developer", MessageType::Chat, "hello")
            .with_mentions(vec!["reviewer".into()]);
        assert!(msg.addressed_to("reviewer"));
        assert!(!msg.addressed_to("tester"));

        // Unaddressed messages reach everyone.
        let open = Message::new("dev-1", "developer", MessageType::Chat, "hello");
        assert!(open.addressed_to("tester"));

        // Broadcast types ignore the mention filter.
        let sys = Message::new("dev-1", "developer", MessageType::System, "notice")
            .with_mentions(vec!["reviewer".into()]);
        assert!(sys.addressed_to("tester"));
    }

    #[test]
    fn serialization_uses_type_key() {
        let msg = Message::new("a", "planner", MessageType::Chat, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["channel"], "general");
        assert!(json.get("mentions").is_none());
    }
}
