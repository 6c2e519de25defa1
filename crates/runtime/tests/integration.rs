//! Integration tests driving the full observe -> think -> act loop with
//! scripted providers and a recording terminal. No network, no real model.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_bus::MessageBus;
use swarm_common::{Message, MessageType, SwarmConfig, TaskSpec, TaskStatus};
use swarm_graph::TaskGraph;
use swarm_llm::{
    LlmRequest, LlmResponse, ModelEntry, Provider, RequestRouter, RouterConfig, TokenCounts,
};
use swarm_runtime::{
    roles, AgentHandle, AgentRuntime, CheckpointManager, CommandResult, MissionInfo, SwarmContext,
    Terminal,
};
use swarm_workspace::WorkspaceStore;
use tempfile::TempDir;

const PLANNER_ID: &str = "planner-1";

/// Provider that replays a scripted list of replies and records every
/// request it sees.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<LlmRequest>>,
    usage: Option<TokenCounts>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            usage: None,
        })
    }

    fn with_usage(replies: &[&str], prompt: u32, completion: u32) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
            usage: Some(TokenCounts {
                prompt_tokens: prompt,
                completion_tokens: completion,
            }),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn last_request_contains(&self, needle: &str) -> bool {
        self.requests
            .lock()
            .last()
            .map(|r| r.messages.iter().any(|m| m.content.contains(needle)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, model: &str, request: &LlmRequest) -> swarm_common::Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let content = self.replies.lock().pop_front().unwrap_or_else(|| {
            r#"{"thinking": "", "action": "message", "params": {}, "message": "idle"}"#.to_string()
        });
        Ok(LlmResponse {
            content,
            model: model.to_string(),
            usage: self.usage,
            finish_reason: Some("stop".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Terminal that records commands instead of running them.
#[derive(Default)]
struct RecordingTerminal {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Terminal for RecordingTerminal {
    async fn execute(&self, command: &str, _cwd: &Path) -> swarm_common::Result<CommandResult> {
        self.calls.lock().push(command.to_string());
        Ok(CommandResult {
            command: command.to_string(),
            stdout: "ok".into(),
            stderr: String::new(),
            return_code: 0,
            duration_secs: 0.01,
            timed_out: false,
        })
    }
}

struct Harness {
    _dir: TempDir,
    ctx: SwarmContext,
    terminal: Arc<RecordingTerminal>,
}

fn harness(provider: Arc<ScriptedProvider>, budget: f64) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = SwarmConfig {
        budget_limit_usd: budget,
        cycle_delay_ms: 10,
        idle_delay_ms: 10,
        approval_timeout_secs: 1,
        ..Default::default()
    };

    let router_config = RouterConfig {
        models: vec![ModelEntry {
            name: "test-model".into(),
            provider: "mock".into(),
            rpm: 10_000,
            cost_in: 1.0,
            cost_out: 10.0,
            tier: "standard".into(),
        }],
        cascades: HashMap::new(),
        default_cascade: vec!["test-model".into()],
        max_retries: 3,
        anthropic_api_key: None,
        openai_api_key: None,
        openai_base_url: None,
    };
    let providers: HashMap<String, Arc<dyn Provider>> =
        HashMap::from([("mock".to_string(), provider as Arc<dyn Provider>)]);
    let router = Arc::new(RequestRouter::with_providers(router_config, budget, providers));

    let terminal = Arc::new(RecordingTerminal::default());
    let bus = MessageBus::new(config.history_capacity, config.mailbox_capacity);
    let ctx = SwarmContext::new(
        config,
        Arc::new(TaskGraph::new(PLANNER_ID)),
        Arc::new(bus),
        Arc::new(WorkspaceStore::new(dir.path()).unwrap()),
        router,
        MissionInfo {
            id: "mission-1".into(),
            goal: "build the thing".into(),
            started_at: Instant::now(),
        },
        PLANNER_ID,
    )
    .with_terminal(terminal.clone() as Arc<dyn Terminal>)
    .with_checkpoints(Arc::new(CheckpointManager::empty()));

    Harness {
        _dir: dir,
        ctx,
        terminal,
    }
}

fn nudge(ctx: &SwarmContext, content: &str) {
    ctx.bus.publish(Message::new(
        "user",
        "user",
        MessageType::TaskAssigned,
        content,
    ));
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

/// Wait until `pred` holds or the deadline passes.
async fn wait_for(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn spawn_developer(h: &Harness) -> AgentHandle {
    AgentRuntime::new("dev-1", roles::developer(), h.ctx.clone()).spawn()
}

#[tokio::test]
async fn idle_gate_skips_model_calls_for_chatter() {
    let provider = ScriptedProvider::new(&[]);
    let h = harness(provider.clone(), 0.0);
    let handle = spawn_developer(&h);

    // Plain chatter is not actionable; the agent must idle without a call.
    h.ctx
        .bus
        .publish(Message::new("other", "developer", MessageType::Chat, "hi all"));
    settle().await;
    assert_eq!(provider.request_count(), 0);

    // A task assignment is actionable and wakes the model up.
    nudge(&h.ctx, "Task created: do the work");
    assert!(wait_for(|| provider.request_count() > 0).await);

    handle.stop();
}

#[tokio::test]
async fn write_file_action_lands_on_disk_and_broadcasts() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "creating the module", "action": "write_file",
            "params": {"path": "src/app.py", "content": "print('hi')\n"},
            "message": "wrote the app module"}"#,
    ]);
    let h = harness(provider.clone(), 0.0);
    let mut watch = h.ctx.bus.watch_all();
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "Task: create src/app.py");
    assert!(wait_for(|| h.ctx.workspace.exists("src/app.py")).await);

    // FileUpdate and the model's chat message both hit the bus.
    let mut saw_file_update = false;
    let mut saw_chat = false;
    while let Ok(Ok(msg)) =
        tokio::time::timeout(Duration::from_millis(500), watch.recv()).await
    {
        match msg.msg_type {
            MessageType::FileUpdate => saw_file_update = true,
            MessageType::Chat if msg.content.contains("wrote the app module") => saw_chat = true,
            _ => {}
        }
        if saw_file_update && saw_chat {
            break;
        }
    }
    assert!(saw_file_update);
    assert!(saw_chat);

    handle.stop();
}

#[tokio::test]
async fn reviewer_cannot_write_files() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "", "action": "edit_file",
            "params": {"path": "src/app.py", "search": "a", "replace": "b"},
            "message": ""}"#,
    ]);
    let h = harness(provider.clone(), 0.0);
    h.ctx
        .workspace
        .write("src/app.py", "a\n", "setup")
        .await
        .unwrap();

    let handle = AgentRuntime::new("rev-1", roles::reviewer(), h.ctx.clone()).spawn();
    nudge(&h.ctx, "Please review");
    assert!(wait_for(|| provider.request_count() >= 1).await);
    settle().await;

    // File untouched.
    let content = h.ctx.workspace.read("src/app.py", "check").await.unwrap();
    assert_eq!(content, "a\n");

    // The refusal reaches the model on its next turn.
    nudge(&h.ctx, "Please review again");
    assert!(wait_for(|| provider.request_count() >= 2).await);
    assert!(provider.last_request_contains("cannot use 'edit_file'"));

    handle.stop();
}

#[tokio::test]
async fn unsafe_command_times_out_unexecuted() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "", "action": "run_command",
            "params": {"command": "pip install leftpad"}, "message": ""}"#,
    ]);
    let h = harness(provider.clone(), 0.0);
    let mut watch = h.ctx.bus.watch_all();
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "Task: set up deps");

    // The approval request goes out...
    let mut saw_approval = false;
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Ok(Ok(msg)) = tokio::time::timeout(Duration::from_millis(200), watch.recv()).await {
            if msg.msg_type == MessageType::ApprovalRequest {
                saw_approval = true;
                break;
            }
        }
    }
    assert!(saw_approval);

    // ...nobody answers, the 1s timeout rejects, the command never runs.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(h.terminal.calls.lock().is_empty());

    handle.stop();
}

#[tokio::test]
async fn approved_command_executes() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "", "action": "run_command",
            "params": {"command": "pip install requests"}, "message": ""}"#,
    ]);
    let h = harness(provider.clone(), 0.0);
    let mut watch = h.ctx.bus.watch_all();
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "Task: set up deps");

    // Catch the approval request and approve it.
    let mut approval_id = None;
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && approval_id.is_none() {
        if let Ok(Ok(msg)) = tokio::time::timeout(Duration::from_millis(200), watch.recv()).await {
            if msg.msg_type == MessageType::ApprovalRequest {
                approval_id = msg.data["approval_id"].as_str().map(str::to_string);
            }
        }
    }
    let approval_id = approval_id.expect("approval request published");
    assert!(handle.resolve_approval(&approval_id, true));

    assert!(wait_for(|| !h.terminal.calls.lock().is_empty()).await);
    assert_eq!(h.terminal.calls.lock()[0], "pip install requests");

    handle.stop();
}

#[tokio::test]
async fn safe_commands_skip_approval() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "", "action": "run_command",
            "params": {"command": "ls -la"}, "message": ""}"#,
    ]);
    let h = harness(provider.clone(), 0.0);
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "Task: look around");
    assert!(wait_for(|| !h.terminal.calls.lock().is_empty()).await);

    handle.stop();
}

#[tokio::test]
async fn budget_exhaustion_stops_the_agent_gracefully() {
    // Each call costs ~$11 against a $5 ceiling: the second think raises.
    let provider = ScriptedProvider::with_usage(
        &[
            r#"{"thinking": "", "action": "message", "params": {}, "message": "working"}"#,
            r#"{"thinking": "", "action": "message", "params": {}, "message": "still working"}"#,
        ],
        1_000_000,
        1_000_000,
    );
    let h = harness(provider.clone(), 5.0);
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "Task one");
    assert!(wait_for(|| provider.request_count() >= 1).await);
    nudge(&h.ctx, "Task two");

    assert!(wait_for(|| !handle.is_running()).await);
    let history = h.ctx.bus.history(None, Some(MessageType::System), 50);
    assert!(history
        .iter()
        .any(|m| m.content.contains("Budget limit reached")));
    // Budget exhaustion ends the mission for everyone.
    assert!(!h.ctx.mission_active());
}

#[tokio::test]
async fn repeated_task_failures_inject_reflection_once() {
    // Three edits against a file that was never read: each fails, and the
    // third think must carry the reflection prompt.
    let edit = r#"{"thinking": "", "action": "edit_file",
        "params": {"path": "ghost.py", "search": "x", "replace": "y"}, "message": ""}"#;
    let provider = ScriptedProvider::new(&[edit, edit, edit]);
    let h = harness(provider.clone(), 0.0);

    // An in-progress task assigned to the agent anchors the failure streak.
    let task = h.ctx.graph.create_task(
        TaskSpec {
            title: "Fix ghost".into(),
            assignee: Some("dev-1".into()),
            requires_review: false,
            ..Default::default()
        },
        PLANNER_ID,
    );
    h.ctx
        .graph
        .update_status(&task.id, TaskStatus::InProgress, "dev-1")
        .unwrap();
    let handle = spawn_developer(&h);

    nudge(&h.ctx, "round 1");
    assert!(wait_for(|| provider.request_count() >= 1).await);
    nudge(&h.ctx, "round 2");
    assert!(wait_for(|| provider.request_count() >= 2).await);
    nudge(&h.ctx, "round 3");
    assert!(wait_for(|| provider.request_count() >= 3).await);

    assert!(provider.last_request_contains("Self-Reflection Required"));

    handle.stop();
}

#[tokio::test]
async fn planner_plans_and_finalizes() {
    let provider = ScriptedProvider::new(&[
        r#"{"thinking": "planning", "action": "create_tasks", "params": {"tasks": [
            {"title": "Build API", "assignee": "dev-1", "requires_review": false},
            {"title": "Write tests", "assignee": "tester-1", "requires_review": false}
        ]}, "message": "plan is up"}"#,
        r#"{"thinking": "", "action": "finalize_plan", "params": {}, "message": ""}"#,
    ]);
    let h = harness(provider.clone(), 0.0);

    let handle = AgentRuntime::new(PLANNER_ID, roles::planner(), h.ctx.clone()).spawn();
    handle.inject_message("[MISSION GOAL] Ship a small API with tests.");

    assert!(wait_for(|| h.ctx.graph.list_tasks().len() == 2).await);
    assert!(wait_for(|| h.ctx.graph.planning_complete()).await);

    // Tasks were broadcast to their assignees.
    let assigned = h.ctx.bus.history(None, Some(MessageType::TaskAssigned), 10);
    assert!(!assigned.is_empty());

    handle.stop();
}

#[tokio::test]
async fn pause_and_resume_gate_the_loop() {
    let provider = ScriptedProvider::new(&[]);
    let h = harness(provider.clone(), 0.0);
    let handle = spawn_developer(&h);

    handle.pause();
    settle().await;
    nudge(&h.ctx, "Task while paused");
    settle().await;
    assert_eq!(provider.request_count(), 0);

    handle.resume();
    assert!(wait_for(|| provider.request_count() > 0).await);

    handle.stop();
}

#[tokio::test]
async fn stop_releases_reservations_and_mailbox() {
    let provider = ScriptedProvider::new(&[]);
    let h = harness(provider.clone(), 0.0);
    let handle = spawn_developer(&h);

    assert!(h.ctx.workspace.reservations.reserve("app.py", "dev-1", None));
    assert_eq!(h.ctx.bus.subscribers(), vec!["dev-1".to_string()]);

    handle.stop();
    assert!(h.ctx.workspace.reservations.holder("app.py").is_none());
    assert!(h.ctx.bus.subscribers().is_empty());
    assert!(!handle.is_running());
}
