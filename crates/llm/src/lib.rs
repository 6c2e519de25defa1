//! Multi-provider request routing for the swarm.
//!
//! The router owns a roster of (model, provider) pairs, each with an
//! independent rolling-window rate limit and cooldown timer. Per-role
//! cascades order which models an agent should try first; rate limits,
//! auth failures, and transient provider errors rotate through the roster
//! instead of surfacing to the caller; and a mission-wide budget gate stops
//! everything when the estimated spend crosses the ceiling.

pub mod anthropic;
pub mod client;
pub mod config;
pub mod openai;
pub mod router;
pub mod state;

pub use anthropic::AnthropicProvider;
pub use client::{ChatMessage, LlmRequest, LlmResponse, Provider, Role, TokenCounts};
pub use config::{ModelEntry, RouterConfig};
pub use openai::OpenAiProvider;
pub use router::{BudgetStatus, ModelStatus, RequestRouter, UsageTotals};
pub use state::ModelState;
