//! Runtime configuration knobs shared by the core components.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment-level configuration consumed by the core. Loaded from a TOML
/// file, then overridable from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// USD budget ceiling for the mission; `<= 0` means unlimited.
    #[serde(default = "default_budget")]
    pub budget_limit_usd: f64,

    /// Consecutive unhandled loop errors before an agent auto-pauses.
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,

    /// Fixed delay between agent loop cycles, in milliseconds.
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_ms: u64,

    /// Sleep when the agent has nothing actionable, in milliseconds.
    #[serde(default = "default_idle_delay")]
    pub idle_delay_ms: u64,

    /// How long a human-approval request waits before resolving to rejected.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    /// Bounded per-agent mailbox size; overflow drops the message.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Bounded bus history ring size.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// TTL for advisory file reservations, in seconds.
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: u64,

    /// Conversation budget handed to context trimming.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_budget() -> f64 {
    1.0
}
fn default_max_errors() -> u32 {
    5
}
fn default_cycle_delay() -> u64 {
    3_000
}
fn default_idle_delay() -> u64 {
    2_000
}
fn default_approval_timeout() -> u64 {
    300
}
fn default_mailbox_capacity() -> usize {
    256
}
fn default_history_capacity() -> usize {
    500
}
fn default_reservation_ttl() -> u64 {
    180
}
fn default_max_context_tokens() -> usize {
    200_000
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            budget_limit_usd: default_budget(),
            max_consecutive_errors: default_max_errors(),
            cycle_delay_ms: default_cycle_delay(),
            idle_delay_ms: default_idle_delay(),
            approval_timeout_secs: default_approval_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
            history_capacity: default_history_capacity(),
            reservation_ttl_secs: default_reservation_ttl(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Apply environment-variable overrides on top of the loaded values.
    ///
    /// - `SWARM_BUDGET_USD`: budget ceiling (0 = unlimited)
    /// - `SWARM_MAX_ERRORS`: auto-pause threshold
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("SWARM_BUDGET_USD") {
            match raw.parse::<f64>() {
                Ok(v) => self.budget_limit_usd = v,
                Err(_) => warn!(value = %raw, "Ignoring unparseable SWARM_BUDGET_USD"),
            }
        }
        if let Ok(raw) = std::env::var("SWARM_MAX_ERRORS") {
            match raw.parse::<u32>() {
                Ok(v) => self.max_consecutive_errors = v,
                Err(_) => warn!(value = %raw, "Ignoring unparseable SWARM_MAX_ERRORS"),
            }
        }
    }

    pub fn budget_unlimited(&self) -> bool {
        self.budget_limit_usd <= 0.0
    }
}
