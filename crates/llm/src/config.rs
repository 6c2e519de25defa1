//! Router configuration: the model roster, per-role cascades, and provider
//! credentials.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,

    /// Provider key: "anthropic" or "openai"
    pub provider: String,

    /// Requests per minute this model may receive
    pub rpm: u32,

    /// USD per 1M input tokens
    #[serde(default)]
    pub cost_in: f64,

    /// USD per 1M output tokens
    #[serde(default)]
    pub cost_out: f64,

    /// Informal capability tier, surfaced in status output
    #[serde(default)]
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub models: Vec<ModelEntry>,

    /// Ordered model preferences per role name
    #[serde(default)]
    pub cascades: HashMap<String, Vec<String>>,

    /// Fallback order for roles without a cascade
    #[serde(default)]
    pub default_cascade: Vec<String>,

    /// Retry budget multiplier: total attempts = max_retries * model count
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    /// Override for OpenAI-compatible endpoints (Groq etc)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RouterConfig {
    fn default() -> Self {
        let entry = |name: &str, provider: &str, rpm, cost_in, cost_out, tier: &str| ModelEntry {
            name: name.into(),
            provider: provider.into(),
            rpm,
            cost_in,
            cost_out,
            tier: tier.into(),
        };

        let mut cascades = HashMap::new();
        cascades.insert(
            "Planner".to_string(),
            vec![
                "claude-opus-4-20250514".to_string(),
                "claude-sonnet-4-20250514".to_string(),
                "gpt-4o".to_string(),
            ],
        );
        cascades.insert(
            "Developer".to_string(),
            vec![
                "claude-sonnet-4-20250514".to_string(),
                "gpt-4o-mini".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
            ],
        );
        cascades.insert(
            "Reviewer".to_string(),
            vec![
                "claude-sonnet-4-20250514".to_string(),
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
            ],
        );
        cascades.insert(
            "Tester".to_string(),
            vec![
                "gpt-4o-mini".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
                "claude-sonnet-4-20250514".to_string(),
            ],
        );

        Self {
            models: vec![
                entry("claude-opus-4-20250514", "anthropic", 5, 15.0, 75.0, "premium"),
                entry("claude-sonnet-4-20250514", "anthropic", 10, 3.0, 15.0, "standard"),
                entry("claude-3-5-haiku-20241022", "anthropic", 30, 0.8, 4.0, "fast"),
                entry("gpt-4o", "openai", 10, 2.5, 10.0, "standard"),
                entry("gpt-4o-mini", "openai", 30, 0.15, 0.6, "fast"),
            ],
            cascades,
            default_cascade: vec![
                "claude-sonnet-4-20250514".to_string(),
                "gpt-4o-mini".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
            ],
            max_retries: default_max_retries(),
            anthropic_api_key: None,
            openai_api_key: None,
            openai_base_url: None,
        }
    }
}

impl RouterConfig {
    /// Resolve provider credentials, preferring explicit config over the
    /// `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` environment variables.
    pub fn resolve_key(&self, provider: &str) -> Option<String> {
        let (explicit, env_var) = match provider {
            "anthropic" => (&self.anthropic_api_key, "ANTHROPIC_API_KEY"),
            "openai" => (&self.openai_api_key, "OPENAI_API_KEY"),
            _ => return None,
        };
        if let Some(key) = explicit {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(env_var).ok()
    }

    pub fn cascade_for(&self, role: &str) -> &[String] {
        self.cascades
            .get(role)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_uses_default_cascade() {
        let config = RouterConfig::default();
        assert_eq!(config.cascade_for("Archaeologist"), config.default_cascade);
        assert_ne!(config.cascade_for("Planner"), config.default_cascade);
    }

    #[test]
    fn planner_prefers_premium() {
        let config = RouterConfig::default();
        let planner = config.cascade_for("Planner");
        let tier = |name: &str| {
            config
                .models
                .iter()
                .find(|m| m.name == name)
                .map(|m| m.tier.clone())
                .unwrap_or_default()
        };
        assert_eq!(tier(&planner[0]), "premium");
    }

    #[test]
    fn explicit_key_beats_env() {
        let config = RouterConfig {
            anthropic_api_key: Some("explicit".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_key("anthropic").as_deref(), Some("explicit"));
        assert!(config.resolve_key("unknown-provider").is_none());
    }
}
