//! Agent runtime for the swarm.
//!
//! Composes the four core components (task graph, message bus, workspace
//! store, request router) into one observe -> think -> act loop per agent,
//! with role-based write permissions, configurable approval checkpoints,
//! failure recovery with auto-pause, and graceful budget-exhaustion
//! shutdown. Collaborators the core must not re-implement (terminal, git
//! snapshotting, persistence) are consumed through traits defined here.

pub mod agent;
pub mod approval;
pub mod checkpoints;
pub mod collaborators;
pub mod context;
pub mod ctx;
pub mod roles;
pub mod terminal;

pub use agent::{AgentHandle, AgentRuntime, AgentStatus};
pub use approval::ApprovalBroker;
pub use checkpoints::{CheckpointManager, CheckpointRule};
pub use collaborators::{
    GitSnapshots, LessonRecord, MissionRecord, NoopGit, NoopPersistence, Persistence,
};
pub use context::{estimate_tokens, trim_messages, HistoryEntry, HistoryRole};
pub use ctx::{MissionInfo, SwarmContext};
pub use terminal::{is_safe_command, CommandResult, ProcessTerminal, Terminal};
