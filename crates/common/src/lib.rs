//! Common types and traits shared across the swarm crates.
//!
//! This crate provides the foundational vocabulary the coordination
//! substrate is built on: bus messages, task entities and their workflow
//! state machine, the structured action union decoded from model output,
//! role descriptors, and the shared error type.

pub mod action;
pub mod config;
pub mod error;
pub mod message;
pub mod role;
pub mod task;

pub use action::{ActionKind, AgentReply, ReviewVerdict};
pub use config::SwarmConfig;
pub use error::{Result, SwarmError};
pub use message::{now_millis, Message, MessageType};
pub use role::{check_write, Capability, RoleDescriptor, WritePolicy};
pub use task::{Task, TaskPriority, TaskSpec, TaskStatus};

/// Generate a short task id: the first 8 hex chars of a v4 UUID, matching
/// the ids agents quote back in chat.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
