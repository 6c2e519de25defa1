//! External collaborator interfaces.
//!
//! The core calls these at mission boundaries and failure paths but never
//! implements them beyond thin defaults: git snapshotting and mission
//! history live outside the coordination substrate.

use async_trait::async_trait;
use serde::Serialize;
use swarm_common::{Result, Task};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct MissionRecord {
    pub mission_id: String,
    pub goal: String,
    pub workspace_path: String,
    pub tasks: Vec<Task>,
    pub cost_usd: f64,
    pub duration_secs: f64,
    pub agents: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonRecord {
    pub agent_role: String,
    pub lesson: String,
    pub context: String,
    pub mission_id: String,
    /// "error_recovery", "pattern", "feedback", "general"
    pub kind: String,
}

/// Mission/lesson persistence. Fire-and-forget from the core's perspective:
/// implementations must not fail the caller.
pub trait Persistence: Send + Sync {
    fn save_mission(&self, record: MissionRecord);
    fn save_lesson(&self, record: LessonRecord);
}

/// Git snapshotting, used only at mission-completion boundaries.
#[async_trait]
pub trait GitSnapshots: Send + Sync {
    /// Stage and commit everything; returns the commit id when a commit was
    /// made.
    async fn auto_commit(&self, message: &str) -> Result<Option<String>>;
}

/// Default no-op persistence.
#[derive(Debug, Default)]
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
    fn save_mission(&self, record: MissionRecord) {
        debug!(mission = %record.mission_id, status = %record.status, "Mission record dropped (no persistence configured)");
    }

    fn save_lesson(&self, record: LessonRecord) {
        debug!(role = %record.agent_role, kind = %record.kind, "Lesson dropped (no persistence configured)");
    }
}

/// Default no-op git collaborator.
#[derive(Debug, Default)]
pub struct NoopGit;

#[async_trait]
impl GitSnapshots for NoopGit {
    async fn auto_commit(&self, message: &str) -> Result<Option<String>> {
        debug!(message = %message, "Git snapshotting disabled");
        Ok(None)
    }
}
