//! The request router: role-based model selection with rate limiting,
//! cooldown, budget enforcement, and cross-provider fallback.
//!
//! Rate limits are absorbed here: a model that reports 429 cools down and
//! the next cascade model is tried, and the caller only ever sees an error
//! when every registered model is exhausted.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use swarm_common::{AgentReply, Result, SwarmError};
use tracing::{error, info, warn};

use crate::anthropic::AnthropicProvider;
use crate::client::{ChatMessage, LlmRequest, LlmResponse, Provider};
use crate::config::RouterConfig;
use crate::openai::OpenAiProvider;
use crate::state::ModelState;

/// Cooldown applied on auth/permission failures; effectively takes the
/// model out of rotation for the mission.
const AUTH_COOLDOWN: Duration = Duration::from_secs(600);
/// Cooldown when a provider says the model doesn't exist.
const NOT_FOUND_COOLDOWN: Duration = Duration::from_secs(300);
/// Consecutive agent failures before the router pins the agent to a
/// higher-tier model.
const ESCALATION_THRESHOLD: u32 = 3;
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    RateLimit,
    Auth,
    NotFound,
    InvalidRequest,
    Server,
    Other,
}

fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("429")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("resource_exhausted")
        || lower.contains("too many requests")
    {
        ErrorClass::RateLimit
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("permission_denied")
        || lower.contains("invalid x-api-key")
    {
        ErrorClass::Auth
    } else if lower.contains("404") || lower.contains("not_found") || lower.contains("not found") {
        ErrorClass::NotFound
    } else if lower.contains("400")
        || lower.contains("invalid_argument")
        || lower.contains("invalid_request")
    {
        ErrorClass::InvalidRequest
    } else if lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("server error")
        || lower.contains("overloaded")
    {
        ErrorClass::Server
    } else {
        ErrorClass::Other
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub remaining_usd: f64,
    pub percent_used: f64,
    pub exceeded: bool,
    pub warning: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub name: String,
    pub provider: String,
    pub active: bool,
    pub has_capacity: bool,
    pub requests_in_window: usize,
    pub rpm_limit: u32,
    pub cooldown_remaining_secs: u64,
    pub tier: String,
}

#[derive(Debug, Clone)]
struct Pin {
    model: String,
    /// Installed automatically by failure escalation (cleared on success)
    escalated: bool,
}

struct RouterState {
    models: Vec<ModelState>,
    current_model: String,
    global: UsageTotals,
    per_agent: HashMap<String, UsageTotals>,
    budget_limit_usd: f64,
    budget_warned: bool,
    budget_exceeded: bool,
    pins: HashMap<String, Pin>,
    agent_failures: HashMap<String, u32>,
}

impl RouterState {
    fn model_mut(&mut self, name: &str) -> Option<&mut ModelState> {
        self.models.iter_mut().find(|m| m.name == name)
    }
}

pub struct RequestRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    state: Mutex<RouterState>,
    config: RouterConfig,
}

impl RequestRouter {
    /// Build a router from config, constructing HTTP providers for every
    /// credentialed provider key.
    pub fn new(config: RouterConfig, budget_limit_usd: f64) -> Self {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        if let Some(key) = config.resolve_key("anthropic") {
            providers.insert("anthropic".into(), Arc::new(AnthropicProvider::new(key)));
            info!("Anthropic provider initialized");
        }
        if let Some(key) = config.resolve_key("openai") {
            let provider = match &config.openai_base_url {
                Some(url) => OpenAiProvider::with_base_url(key, url.clone()),
                None => OpenAiProvider::new(key),
            };
            providers.insert("openai".into(), Arc::new(provider));
            info!("OpenAI provider initialized");
        }
        Self::with_providers(config, budget_limit_usd, providers)
    }

    /// Build a router over explicit provider implementations. This is also
    /// the seam tests use to inject scripted providers.
    pub fn with_providers(
        config: RouterConfig,
        budget_limit_usd: f64,
        providers: HashMap<String, Arc<dyn Provider>>,
    ) -> Self {
        if providers.is_empty() {
            error!("No LLM providers available; set ANTHROPIC_API_KEY or OPENAI_API_KEY");
        }

        let models: Vec<ModelState> = config
            .models
            .iter()
            .filter(|entry| {
                let available = providers.contains_key(&entry.provider);
                if !available {
                    warn!(model = %entry.name, provider = %entry.provider, "Skipping model, provider unavailable");
                }
                available
            })
            .map(|entry| {
                ModelState::new(
                    &entry.name,
                    &entry.provider,
                    entry.rpm,
                    entry.cost_in,
                    entry.cost_out,
                )
            })
            .collect();

        info!(
            models = models.len(),
            providers = providers.len(),
            "Model router ready"
        );

        let current_model = models.first().map(|m| m.name.clone()).unwrap_or_default();
        Self {
            providers,
            state: Mutex::new(RouterState {
                models,
                current_model,
                global: UsageTotals::default(),
                per_agent: HashMap::new(),
                budget_limit_usd,
                budget_warned: false,
                budget_exceeded: false,
                pins: HashMap::new(),
                agent_failures: HashMap::new(),
            }),
            config,
        }
    }

    /// Generate a structured reply using the best available model for the
    /// agent's role, falling back across models and providers as needed.
    pub async fn generate(
        &self,
        agent_id: &str,
        system_prompt: &str,
        messages: Vec<ChatMessage>,
        role: &str,
    ) -> Result<AgentReply> {
        if self.providers.is_empty() {
            return Err(SwarmError::Config(
                "no LLM providers initialized; set ANTHROPIC_API_KEY or OPENAI_API_KEY".into(),
            ));
        }

        self.check_budget()?;

        let model_count = self.state.lock().models.len().max(1);
        let total_attempts = (self.config.max_retries as usize * model_count).max(1);
        let mut last_error = String::from("no models registered");

        let request = LlmRequest {
            system_prompt: Some(system_prompt.to_string()),
            messages,
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: None,
            structured: true,
        };

        for attempt in 0..total_attempts {
            let Some((model_name, provider_name)) = self.pick_model(agent_id, role) else {
                let wait = self.shortest_wait().max(Duration::from_secs(1));
                warn!(wait_secs = wait.as_secs(), "All models exhausted, waiting");
                tokio::time::sleep(wait).await;
                continue;
            };
            let provider = self.providers[&provider_name].clone();

            match provider.complete(&model_name, &request).await {
                Ok(response) => {
                    self.on_success(agent_id, &model_name, &response);
                    return Ok(AgentReply::parse(&response.content));
                }
                Err(e) => {
                    let message = e.to_string();
                    last_error = message.clone();

                    match classify(&message) {
                        ErrorClass::RateLimit => {
                            warn!(agent = %agent_id, model = %model_name, "Rate-limited, trying next model");
                            self.with_model(&model_name, ModelState::record_rate_limit);
                        }
                        ErrorClass::Auth => {
                            error!(agent = %agent_id, model = %model_name, error = %message, "Auth error, cooling model");
                            self.with_model(&model_name, |m| m.cooldown_for(AUTH_COOLDOWN));
                        }
                        ErrorClass::NotFound => {
                            warn!(agent = %agent_id, model = %model_name, "Model not found, cooling");
                            self.with_model(&model_name, |m| m.cooldown_for(NOT_FOUND_COOLDOWN));
                        }
                        ErrorClass::InvalidRequest => {
                            // Some providers reject structured-output mode;
                            // retry once without it before giving up on this
                            // attempt.
                            warn!(agent = %agent_id, model = %model_name, "Structured mode rejected, retrying without");
                            let relaxed = LlmRequest {
                                structured: false,
                                ..request.clone()
                            };
                            match provider.complete(&model_name, &relaxed).await {
                                Ok(response) => {
                                    self.on_success(agent_id, &model_name, &response);
                                    return Ok(AgentReply::parse(&response.content));
                                }
                                Err(retry_err) => {
                                    last_error = retry_err.to_string();
                                    self.with_model(&model_name, ModelState::record_error);
                                }
                            }
                        }
                        ErrorClass::Server => {
                            self.with_model(&model_name, ModelState::record_error);
                            let backoff = Duration::from_secs(1 << (attempt % 3));
                            warn!(agent = %agent_id, model = %model_name, backoff_secs = backoff.as_secs(), "Server error, backing off");
                            tokio::time::sleep(backoff).await;
                        }
                        ErrorClass::Other => {
                            error!(agent = %agent_id, model = %model_name, error = %message, "Provider error");
                            self.with_model(&model_name, ModelState::record_error);
                        }
                    }
                }
            }
        }

        Err(SwarmError::ModelsExhausted(last_error))
    }

    /// Pick the best available model: the agent's pin first (when it has
    /// capacity), then the role cascade, then any model with capacity. The
    /// chosen model's rolling window is charged immediately.
    fn pick_model(&self, agent_id: &str, role: &str) -> Option<(String, String)> {
        let mut state = self.state.lock();

        let mut candidates: Vec<String> = Vec::new();
        if let Some(pin) = state.pins.get(agent_id) {
            candidates.push(pin.model.clone());
        }
        candidates.extend(self.config.cascade_for(role).iter().cloned());

        for name in candidates {
            if let Some(model) = state.model_mut(&name) {
                if model.has_capacity() {
                    return Some(Self::choose(&mut state, &name));
                }
            }
        }

        // Last resort: scan the whole roster.
        let fallback = state
            .models
            .iter_mut()
            .find_map(|m| m.has_capacity().then(|| m.name.clone()));
        if let Some(name) = fallback {
            warn!(model = %name, "Fallback model selected, no cascade model available");
            return Some(Self::choose(&mut state, &name));
        }
        None
    }

    fn choose(state: &mut RouterState, name: &str) -> (String, String) {
        if state.current_model != name {
            let provider = state
                .model_mut(name)
                .map(|m| m.provider.clone())
                .unwrap_or_default();
            info!(model = %name, provider = %provider, "Routing to model");
        }
        state.current_model = name.to_string();
        let model = state.model_mut(name).expect("model exists");
        model.mark_dispatched();
        (model.name.clone(), model.provider.clone())
    }

    fn with_model(&self, name: &str, f: impl FnOnce(&mut ModelState)) {
        let mut state = self.state.lock();
        if let Some(model) = state.model_mut(name) {
            f(model);
        }
    }

    fn shortest_wait(&self) -> Duration {
        let mut state = self.state.lock();
        state
            .models
            .iter_mut()
            .map(|m| m.wait_time())
            .min()
            .unwrap_or(Duration::from_secs(1))
    }

    fn on_success(&self, agent_id: &str, model_name: &str, response: &LlmResponse) {
        let mut state = self.state.lock();
        let (cost_in, cost_out) = state
            .model_mut(model_name)
            .map(|m| {
                m.record_success();
                (m.cost_in, m.cost_out)
            })
            .unwrap_or((0.0, 0.0));

        if let Some(usage) = &response.usage {
            let cost = usage.prompt_tokens as f64 / 1_000_000.0 * cost_in
                + usage.completion_tokens as f64 / 1_000_000.0 * cost_out;

            state.global.input_tokens += usage.prompt_tokens as u64;
            state.global.output_tokens += usage.completion_tokens as u64;
            state.global.estimated_cost_usd += cost;

            let per_agent = state.per_agent.entry(agent_id.to_string()).or_default();
            per_agent.input_tokens += usage.prompt_tokens as u64;
            per_agent.output_tokens += usage.completion_tokens as u64;
            per_agent.estimated_cost_usd += cost;
        }
        info!(agent = %agent_id, model = %model_name, "Model responded");
    }

    /// Budget gate, evaluated before any provider call. A limit of zero or
    /// less means unlimited. Emits a one-time warning at 80%.
    fn check_budget(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.budget_limit_usd <= 0.0 {
            return Ok(());
        }
        let spent = state.global.estimated_cost_usd;
        let limit = state.budget_limit_usd;
        let fraction = spent / limit;

        if fraction >= 1.0 {
            state.budget_exceeded = true;
            warn!(spent_usd = spent, limit_usd = limit, "Budget exceeded");
            return Err(SwarmError::BudgetExhausted { spent, limit });
        }
        if fraction >= 0.8 && !state.budget_warned {
            state.budget_warned = true;
            warn!(spent_usd = spent, limit_usd = limit, "Budget at 80%");
        }
        Ok(())
    }

    /// Replace the budget ceiling and re-arm the warning/exceeded flags.
    pub fn set_budget(&self, limit_usd: f64) {
        let mut state = self.state.lock();
        state.budget_limit_usd = limit_usd;
        state.budget_exceeded = false;
        state.budget_warned = false;
        info!(limit_usd, "Budget set");
    }

    pub fn budget_status(&self) -> BudgetStatus {
        let state = self.state.lock();
        let spent = state.global.estimated_cost_usd;
        let limit = state.budget_limit_usd;
        let pct = if limit > 0.0 {
            (spent / limit * 100.0).min(100.0)
        } else {
            0.0
        };
        BudgetStatus {
            limit_usd: limit,
            spent_usd: spent,
            remaining_usd: (limit - spent).max(0.0),
            percent_used: pct,
            exceeded: state.budget_exceeded,
            warning: state.budget_warned,
        }
    }

    /// Pin an agent to a specific model. The pin is a preference: when the
    /// pinned model lacks capacity the cascade applies as usual.
    pub fn pin_model(&self, agent_id: &str, model: &str) {
        info!(agent = %agent_id, model = %model, "Agent pinned to model");
        self.state.lock().pins.insert(
            agent_id.to_string(),
            Pin {
                model: model.to_string(),
                escalated: false,
            },
        );
    }

    pub fn clear_pin(&self, agent_id: &str) {
        self.state.lock().pins.remove(agent_id);
    }

    pub fn pinned_model(&self, agent_id: &str) -> Option<String> {
        self.state.lock().pins.get(agent_id).map(|p| p.model.clone())
    }

    /// Called by the agent loop after a successful action: resets the
    /// failure streak and removes any escalation pin.
    pub fn record_agent_success(&self, agent_id: &str) {
        let mut state = self.state.lock();
        state.agent_failures.remove(agent_id);
        if state.pins.get(agent_id).is_some_and(|p| p.escalated) {
            info!(agent = %agent_id, "De-escalating model pin after success");
            state.pins.remove(agent_id);
        }
    }

    /// Called on agent loop failures. After enough consecutive failures the
    /// agent is escalated: pinned to the premium tier until it succeeds.
    pub fn record_agent_failure(&self, agent_id: &str) {
        let premium = self
            .config
            .models
            .iter()
            .find(|m| m.tier == "premium")
            .map(|m| m.name.clone());

        let mut state = self.state.lock();
        let failures = state
            .agent_failures
            .entry(agent_id.to_string())
            .or_insert(0);
        *failures += 1;
        let failures = *failures;

        if failures >= ESCALATION_THRESHOLD && !state.pins.contains_key(agent_id) {
            if let Some(model) = premium {
                warn!(agent = %agent_id, model = %model, failures, "Escalating agent to premium model");
                state.pins.insert(
                    agent_id.to_string(),
                    Pin {
                        model,
                        escalated: true,
                    },
                );
            }
        }
    }

    pub fn global_usage(&self) -> UsageTotals {
        self.state.lock().global.clone()
    }

    pub fn agent_usage(&self, agent_id: &str) -> UsageTotals {
        self.state
            .lock()
            .per_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_model(&self) -> String {
        self.state.lock().current_model.clone()
    }

    /// Status of every registered model, for UI/status surfaces.
    pub fn model_states(&self) -> Vec<ModelStatus> {
        let mut state = self.state.lock();
        let current = state.current_model.clone();
        state
            .models
            .iter_mut()
            .map(|m| ModelStatus {
                name: m.name.clone(),
                provider: m.provider.clone(),
                active: m.name == current,
                has_capacity: m.has_capacity(),
                requests_in_window: m.requests_in_window(),
                rpm_limit: m.rpm_limit,
                cooldown_remaining_secs: m.cooldown_remaining().as_secs(),
                tier: String::new(),
            })
            .map(|mut status| {
                status.tier = self
                    .config
                    .models
                    .iter()
                    .find(|e| e.name == status.name)
                    .map(|e| e.tier.clone())
                    .unwrap_or_default();
                status
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limits() {
        assert_eq!(
            classify("API error 429 Too Many Requests: rate limit exceeded"),
            ErrorClass::RateLimit
        );
        assert_eq!(classify("RESOURCE_EXHAUSTED"), ErrorClass::RateLimit);
    }

    #[test]
    fn classify_auth() {
        assert_eq!(classify("API error 401 Unauthorized"), ErrorClass::Auth);
        assert_eq!(classify("403 PERMISSION_DENIED"), ErrorClass::Auth);
    }

    #[test]
    fn classify_server_and_invalid() {
        assert_eq!(classify("502 bad gateway"), ErrorClass::Server);
        assert_eq!(classify("Anthropic API error 529: overloaded"), ErrorClass::Server);
        assert_eq!(
            classify("400 INVALID_ARGUMENT: response_format unsupported"),
            ErrorClass::InvalidRequest
        );
        assert_eq!(classify("connection reset by peer"), ErrorClass::Other);
    }
}
