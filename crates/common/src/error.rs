//! Error types shared across the swarm crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Invalid transition: {from} -> {to}. Valid: {allowed}")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Task [{task_id}] requires review before completion. Move to 'in_review' first, then a reviewer must approve.")]
    ReviewRequired { task_id: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Stale read of '{path}': {reason}")]
    StaleRead { path: String, reason: String },

    #[error("Search text not found in {path}. The file may have been modified. Read it again to see the current content.")]
    PatternNotFound { path: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Path escapes workspace: {0}")]
    PathEscape(String),

    #[error("Budget limit of ${limit:.2} exceeded (spent ${spent:.4})")]
    BudgetExhausted { spent: f64, limit: f64 },

    #[error("Failed after exhausting all models and retries: {0}")]
    ModelsExhausted(String),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwarmError {
    /// Whether this error should terminate the agent loop instead of being
    /// converted into a system message on the agent's conversation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SwarmError::BudgetExhausted { .. } | SwarmError::ModelsExhausted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
