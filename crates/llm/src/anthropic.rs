//! Anthropic provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_common::{Result, SwarmError};

use crate::client::{LlmRequest, LlmResponse, Provider, Role, TokenCounts};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicProvider {
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<AnthropicMessage> {
        request
            .messages
            .iter()
            .filter(|msg| msg.role != Role::System)
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: vec![AnthropicContent {
                    content_type: "text".to_string(),
                    text: msg.content.clone(),
                }],
            })
            .collect()
    }

    fn build_request_body(&self, model: &str, request: &LlmRequest) -> AnthropicRequest {
        // Anthropic has no server-side JSON mode; structured requests lean
        // on the system prompt instead.
        let system = match (&request.system_prompt, request.structured) {
            (Some(s), true) => Some(format!("{s}\n\nYou MUST respond with valid JSON only.")),
            (Some(s), false) => Some(s.clone()),
            (None, true) => Some("You MUST respond with valid JSON only.".to_string()),
            (None, false) => None,
        };
        AnthropicRequest {
            model: model.to_string(),
            messages: Self::build_messages(request),
            system,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, model: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(model, request);

        let response = self
            .http_client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SwarmError::Provider(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SwarmError::Provider(format!(
                "Anthropic API error {status}: {body_text}"
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| SwarmError::Provider(format!("Failed to parse Anthropic response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenCounts {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: parsed.stop_reason,
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn request_body_matches_anthropic_format() {
        let provider = AnthropicProvider::new("sk-ant-test".to_string());
        let request = LlmRequest {
            system_prompt: Some("Be helpful.".to_string()),
            messages: vec![
                ChatMessage::user("Hello"),
                ChatMessage::assistant("Hi there!"),
                ChatMessage::user("How are you?"),
            ],
            temperature: Some(0.7),
            max_tokens: Some(1024),
            structured: false,
        };

        let body = provider.build_request_body("claude-sonnet-4-20250514", &request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["system"], "Be helpful.");
        assert_eq!(json["max_tokens"], 1024);

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "text");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn structured_mode_appends_json_instruction() {
        let provider = AnthropicProvider::new("key".to_string());
        let request = LlmRequest {
            system_prompt: Some("System instruction".to_string()),
            messages: vec![ChatMessage::user("Hello")],
            structured: true,
            ..Default::default()
        };

        let body = provider.build_request_body("claude-sonnet-4-20250514", &request);
        let json = serde_json::to_value(&body).unwrap();
        let system = json["system"].as_str().unwrap();
        assert!(system.starts_with("System instruction"));
        assert!(system.contains("valid JSON only"));
    }

    #[test]
    fn default_max_tokens_when_none() {
        let provider = AnthropicProvider::new("key".to_string());
        let request = LlmRequest {
            messages: vec![ChatMessage::user("Hello")],
            ..Default::default()
        };
        let body = provider.build_request_body("claude-sonnet-4-20250514", &request);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 4096);
    }

    #[test]
    fn system_messages_never_appear_in_message_list() {
        let provider = AnthropicProvider::new("key".to_string());
        let request = LlmRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: "sys".into(),
                },
                ChatMessage::user("Hello"),
            ],
            ..Default::default()
        };
        let body = provider.build_request_body("claude-sonnet-4-20250514", &request);
        let json = serde_json::to_value(&body).unwrap();
        for msg in json["messages"].as_array().unwrap() {
            assert_ne!(msg["role"], "system");
        }
    }
}
