//! The shared context handle.
//!
//! Every agent runtime receives one `SwarmContext` at construction: the
//! four core stores, the collaborator interfaces, and mission metadata.
//! There is no ambient global state anywhere in the system.

use crate::checkpoints::CheckpointManager;
use crate::collaborators::{GitSnapshots, NoopGit, NoopPersistence, Persistence};
use crate::terminal::{ProcessTerminal, Terminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use swarm_bus::MessageBus;
use swarm_common::SwarmConfig;
use swarm_graph::TaskGraph;
use swarm_llm::RequestRouter;
use swarm_workspace::WorkspaceStore;

#[derive(Debug, Clone)]
pub struct MissionInfo {
    pub id: String,
    pub goal: String,
    pub started_at: Instant,
}

#[derive(Clone)]
pub struct SwarmContext {
    pub config: SwarmConfig,
    pub graph: Arc<TaskGraph>,
    pub bus: Arc<MessageBus>,
    pub workspace: Arc<WorkspaceStore>,
    pub router: Arc<RequestRouter>,
    pub terminal: Arc<dyn Terminal>,
    pub git: Arc<dyn GitSnapshots>,
    pub persistence: Arc<dyn Persistence>,
    pub checkpoints: Arc<CheckpointManager>,
    pub mission: Arc<MissionInfo>,
    /// Agent id of the privileged planner.
    pub planner_id: String,
    mission_active: Arc<AtomicBool>,
}

impl SwarmContext {
    pub fn new(
        config: SwarmConfig,
        graph: Arc<TaskGraph>,
        bus: Arc<MessageBus>,
        workspace: Arc<WorkspaceStore>,
        router: Arc<RequestRouter>,
        mission: MissionInfo,
        planner_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            graph,
            bus,
            workspace,
            router,
            terminal: Arc::new(ProcessTerminal::default()),
            git: Arc::new(NoopGit),
            persistence: Arc::new(NoopPersistence),
            checkpoints: Arc::new(CheckpointManager::default()),
            mission: Arc::new(mission),
            planner_id: planner_id.into(),
            mission_active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn Terminal>) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_git(mut self, git: Arc<dyn GitSnapshots>) -> Self {
        self.git = git;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointManager>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// False once the mission finished (or was aborted); agent loops exit.
    pub fn mission_active(&self) -> bool {
        self.mission_active.load(Ordering::SeqCst)
    }

    pub fn end_mission(&self) {
        self.mission_active.store(false, Ordering::SeqCst);
    }
}
