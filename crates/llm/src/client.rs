//! Provider-facing request/response types and the provider trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for JSON output. Providers that reject structured
    /// mode get one retry with this cleared.
    pub structured: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenCounts>,
    pub finish_reason: Option<String>,
}

/// A provider endpoint serving one or more models.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, model: &str, request: &LlmRequest) -> Result<LlmResponse>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn request_roundtrip() {
        let request = LlmRequest {
            system_prompt: Some("Be helpful.".into()),
            messages: vec![ChatMessage::user("Hi")],
            temperature: Some(0.7),
            max_tokens: Some(1024),
            structured: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: LlmRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.system_prompt.as_deref(), Some("Be helpful."));
        assert_eq!(parsed.messages.len(), 1);
        assert!(parsed.structured);
    }
}
