//! The per-agent observe -> think -> act loop.
//!
//! One `AgentRuntime` per agent, parameterized by a role descriptor and a
//! shared `SwarmContext`. The loop gates model calls on actionable work,
//! drains the mailbox, asks the router for a structured action, executes it
//! against the owning component, and tracks failures for self-reflection
//! and auto-pause.

use crate::approval::ApprovalBroker;
use crate::collaborators::{LessonRecord, MissionRecord};
use crate::context::{trim_messages, HistoryEntry, HistoryRole};
use crate::ctx::SwarmContext;
use crate::terminal::is_safe_command;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_bus::Mailbox;
use swarm_common::{
    check_write, short_id, ActionKind, AgentReply, Capability, Message, MessageType,
    ReviewVerdict, RoleDescriptor, Result, SwarmError, TaskStatus,
};
use swarm_llm::{ChatMessage, Role};
use tracing::{error, info, warn};

/// Error markers scanned for in the latest feedback entry.
const ERROR_MARKERS: &[&str] = &["error", "Error", "failed", "Failed", "BLOCKED", "Cannot"];
/// Consecutive failures on one task before a reflection prompt is injected.
const REFLECTION_THRESHOLD: u32 = 2;
/// Cap on the loop's exponential error backoff.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);
/// Minimum spacing between "thinking" broadcasts.
const THOUGHT_THROTTLE: Duration = Duration::from_secs(10);
/// Window for deduplicating repeated task suggestions.
const SUGGESTION_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Acting,
    Waiting,
    Paused,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Acting => "acting",
            AgentStatus::Waiting => "waiting",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
        }
    }
}

struct AgentShared {
    status: parking_lot::RwLock<AgentStatus>,
    paused: AtomicBool,
    running: AtomicBool,
    approvals: ApprovalBroker,
    injected: parking_lot::Mutex<Vec<String>>,
}

/// Control surface for a spawned agent, held by the supervisor/transport.
pub struct AgentHandle {
    id: String,
    role_name: String,
    shared: Arc<AgentShared>,
    ctx: SwarmContext,
    join: tokio::task::JoinHandle<()>,
}

impl AgentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &str {
        &self.role_name
    }

    pub fn status(&self) -> AgentStatus {
        *self.shared.status.read()
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && !self.join.is_finished()
    }

    /// Stop the agent: cancel its loop task, drop its mailbox, and release
    /// its reservations. In-flight approval waits are abandoned; the
    /// timeout mechanism reclaims them.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        *self.shared.status.write() = AgentStatus::Stopped;
        self.join.abort();
        self.ctx.bus.unsubscribe(&self.id);
        self.ctx.workspace.reservations.release_all(&self.id);
        info!(agent = %self.id, "Stopped");
    }

    /// Resolve a pending approval request by id.
    pub fn resolve_approval(&self, approval_id: &str, approved: bool) -> bool {
        self.shared.approvals.resolve(approval_id, approved)
    }

    /// Inject a user directive into the agent's next think phase.
    pub fn inject_message(&self, content: impl Into<String>) {
        self.shared.injected.lock().push(content.into());
    }
}

pub struct AgentRuntime {
    id: String,
    role: RoleDescriptor,
    ctx: SwarmContext,
    shared: Arc<AgentShared>,
    inbox: Mailbox,
    /// Messages peeked by the idle gate and pushed back unread.
    pending: Vec<Message>,
    history: Vec<HistoryEntry>,
    consecutive_errors: u32,
    error_backoff: Duration,
    task_failures: HashMap<String, u32>,
    task_last_error: HashMap<String, String>,
    /// Tasks already given a reflection prompt this failure streak.
    reflected: HashSet<String>,
    recent_suggestions: HashMap<String, Instant>,
    last_thought_broadcast: Option<Instant>,
}

impl AgentRuntime {
    pub fn new(id: impl Into<String>, role: RoleDescriptor, ctx: SwarmContext) -> Self {
        let id = id.into();
        let inbox = ctx.bus.subscribe(&id);
        Self {
            id,
            role,
            ctx,
            shared: Arc::new(AgentShared {
                status: parking_lot::RwLock::new(AgentStatus::Idle),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(true),
                approvals: ApprovalBroker::default(),
                injected: parking_lot::Mutex::new(Vec::new()),
            }),
            inbox,
            pending: Vec::new(),
            history: Vec::new(),
            consecutive_errors: 0,
            error_backoff: Duration::from_secs(1),
            task_failures: HashMap::new(),
            task_last_error: HashMap::new(),
            reflected: HashSet::new(),
            recent_suggestions: HashMap::new(),
            last_thought_broadcast: None,
        }
    }

    /// Start the event loop on the runtime's task and return the control
    /// handle.
    pub fn spawn(self) -> AgentHandle {
        let id = self.id.clone();
        let role_name = self.role.name.clone();
        let shared = self.shared.clone();
        let ctx = self.ctx.clone();
        info!(agent = %id, role = %role_name, "Started");
        let join = tokio::spawn(self.run());
        AgentHandle {
            id,
            role_name,
            shared,
            ctx,
            join,
        }
    }

    async fn run(mut self) {
        while self.shared.running.load(Ordering::SeqCst) && self.ctx.mission_active() {
            if self.shared.paused.load(Ordering::SeqCst) {
                self.set_status(AgentStatus::Paused);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            match self.cycle().await {
                Ok(()) => {}
                Err(SwarmError::BudgetExhausted { spent, limit }) => {
                    warn!(agent = %self.id, spent, limit, "Budget exhausted, stopping");
                    self.publish(
                        MessageType::System,
                        "Budget limit reached, attempting mission completion",
                    );
                    self.mission_complete().await;
                    break;
                }
                Err(e) => self.recover(e).await,
            }
        }

        self.set_status(AgentStatus::Stopped);
        self.ctx.bus.unsubscribe(&self.id);
        self.ctx.workspace.reservations.release_all(&self.id);
        info!(agent = %self.id, "Loop exited");
    }

    async fn cycle(&mut self) -> Result<()> {
        let idle_delay = Duration::from_millis(self.ctx.config.idle_delay_ms);

        // Gate: without actionable tasks, only actionable messages justify a
        // model call. Everything else is pushed back unread.
        if !self.role.proactive && self.ctx.graph.actionable_tasks(&self.id).is_empty() {
            let peeked = self.drain_inbox();
            let actionable = peeked.iter().any(|m| self.is_actionable(m));
            self.pending.extend(peeked);
            if !actionable {
                self.set_status(AgentStatus::Idle);
                tokio::time::sleep(idle_delay).await;
                return Ok(());
            }
        }

        // Observe.
        let new_messages = self.drain_inbox();
        let injected: Vec<String> = std::mem::take(&mut *self.shared.injected.lock());
        if new_messages.is_empty() && injected.is_empty() && !self.role.proactive {
            self.set_status(AgentStatus::Idle);
            tokio::time::sleep(idle_delay).await;
            return Ok(());
        }

        // Think.
        self.set_status(AgentStatus::Thinking);
        self.broadcast_status();
        let Some(reply) = self.think(new_messages, injected).await? else {
            tokio::time::sleep(idle_delay).await;
            return Ok(());
        };

        // Act.
        self.set_status(AgentStatus::Acting);
        self.broadcast_status();
        self.act(&reply).await;

        // Bookkeeping.
        self.track_failures(&reply);
        self.consecutive_errors = 0;
        self.error_backoff = Duration::from_secs(1);
        self.ctx.router.record_agent_success(&self.id);

        tokio::time::sleep(Duration::from_millis(self.ctx.config.cycle_delay_ms)).await;
        Ok(())
    }

    fn drain_inbox(&mut self) -> Vec<Message> {
        let mut messages = std::mem::take(&mut self.pending);
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// A message worth waking up for: a task assignment, review traffic, a
    /// collaboration request, or a direct mention.
    fn is_actionable(&self, msg: &Message) -> bool {
        matches!(
            msg.msg_type,
            MessageType::TaskAssigned
                | MessageType::ReviewRequest
                | MessageType::ReviewResult
                | MessageType::AskHelp
                | MessageType::ShareInsight
                | MessageType::ProposeApproach
                | MessageType::Handoff
        ) || msg.mentions.iter().any(|m| m == &self.id)
    }

    async fn think(
        &mut self,
        new_messages: Vec<Message>,
        injected: Vec<String>,
    ) -> Result<Option<AgentReply>> {
        for msg in &new_messages {
            let data = if msg.data.is_null() {
                String::new()
            } else {
                format!("\nData: {}", msg.data)
            };
            self.history.push(HistoryEntry::user(format!(
                "[{} @{}] ({:?}): {}{}",
                msg.sender_role, msg.sender, msg.msg_type, msg.content, data
            )));
        }
        for directive in injected {
            self.history
                .push(HistoryEntry::user(format!("[USER DIRECTIVE]: {directive}")));
        }

        if self.history.is_empty() {
            return Ok(None);
        }

        self.inject_reflections();

        let trimmed = trim_messages(&self.history, self.ctx.config.max_context_tokens);
        let messages: Vec<ChatMessage> = trimmed
            .iter()
            .map(|entry| ChatMessage {
                role: match entry.role {
                    HistoryRole::User => Role::User,
                    HistoryRole::Model => Role::Assistant,
                },
                content: entry.content.clone(),
            })
            .collect();

        if self
            .last_thought_broadcast
            .is_none_or(|t| t.elapsed() >= THOUGHT_THROTTLE)
        {
            self.last_thought_broadcast = Some(Instant::now());
            self.publish(
                MessageType::Thought,
                "Analyzing context and deciding next action...",
            );
        }

        match self
            .ctx
            .router
            .generate(&self.id, &self.role.system_prompt, messages, &self.role.name)
            .await
        {
            Ok(reply) => {
                if !reply.thinking.is_empty() {
                    self.publish(MessageType::Thought, reply.thinking.clone());
                }
                self.history
                    .push(HistoryEntry::model(serde_json::to_string(&reply)?));
                Ok(Some(reply))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(agent = %self.id, error = %e, "Think failed");
                self.publish(MessageType::System, format!("Think error: {e}"));
                Ok(None)
            }
        }
    }

    /// After repeated failures on a task, demand a different approach once
    /// per failure streak instead of letting the model retry blindly.
    fn inject_reflections(&mut self) {
        for task in self.ctx.graph.tasks_for_agent(&self.id) {
            let failures = self.task_failures.get(&task.id).copied().unwrap_or(0);
            if failures < REFLECTION_THRESHOLD || self.reflected.contains(&task.id) {
                continue;
            }
            self.reflected.insert(task.id.clone());
            let last_error = self
                .task_last_error
                .get(&task.id)
                .cloned()
                .unwrap_or_else(|| "unknown error".into());
            info!(agent = %self.id, task = %task.id, failures, "Injecting self-reflection");
            self.history.push(HistoryEntry::user(format!(
                "[System: Self-Reflection Required] You have failed {failures} times on task \
                 [{}]. Last error: {last_error}\n\n\
                 Stop and think critically before your next attempt:\n\
                 1. What specific error did you hit and why did it occur?\n\
                 2. Why did your previous approach fail fundamentally, not just syntactically?\n\
                 3. What DIFFERENT approach could work? Do not retry the same thing.\n\
                 4. Would another agent's expertise help? Use ask_help to get input.\n\
                 5. Should you propose_approach to get feedback before coding?\n\n\
                 A different strategy is needed, not the same approach with small tweaks.",
                task.id
            )));
        }
    }

    async fn act(&mut self, reply: &AgentReply) {
        match self.dispatch(reply).await {
            Ok(()) => {
                if !reply.message.is_empty() {
                    self.publish(MessageType::Chat, reply.message.clone());
                }
            }
            Err(e) => {
                error!(agent = %self.id, action = reply.action.name(), error = %e, "Action failed");
                self.publish(
                    MessageType::System,
                    format!("Error executing {}: {e}", reply.action.name()),
                );
            }
        }
    }

    async fn dispatch(&mut self, reply: &AgentReply) -> Result<()> {
        let action = reply.action.clone();

        // Role-based write enforcement.
        let write_path = match &action {
            ActionKind::WriteFile { path, .. }
            | ActionKind::EditFile { path, .. }
            | ActionKind::DeleteFile { path } => path.clone(),
            _ => String::new(),
        };
        if let Some(refusal) = check_write(&self.role, &action, &write_path) {
            warn!(agent = %self.id, action = action.name(), path = %write_path, "Write blocked by role policy");
            self.system_note(refusal);
            return Ok(());
        }

        // Checkpoint gate: matching actions block on human approval.
        if let Some(rule) = self.ctx.checkpoints.check_action(&action) {
            let description = format!(
                "Checkpoint: {}. Agent {} wants to run '{}'",
                rule.label,
                self.id,
                action.name()
            );
            if !self.request_approval(&action, &description).await {
                self.system_note(format!(
                    "Action '{}' was not approved (checkpoint: {}). It was NOT executed.",
                    action.name(),
                    rule.label
                ));
                return Ok(());
            }
        }

        match action {
            ActionKind::ReadFile { path } => match self.ctx.workspace.read(&path, &self.id).await {
                Ok(content) => self.history.push(HistoryEntry::user(format!(
                    "[File content of {path}]:\n```\n{content}\n```"
                ))),
                Err(e) => self.history.push(HistoryEntry::user(format!(
                    "[read_file error]: {e}"
                ))),
            },

            ActionKind::WriteFile { path, content } => {
                // Overwriting an existing file destroys other agents' work;
                // force targeted edits instead.
                if self.ctx.workspace.exists(&path) {
                    warn!(agent = %self.id, path = %path, "Blocked write_file on existing file");
                    self.system_note(format!(
                        "Cannot use write_file on existing file '{path}'. write_file overwrites \
                         the entire file and destroys other changes. Read the file, then use \
                         edit_file with the exact search text you want to change."
                    ));
                    return Ok(());
                }
                match self.ctx.workspace.write(&path, &content, &self.id).await {
                    Ok(diff) => {
                        self.claim_path(&path);
                        let data = serde_json::json!({ "diff": diff, "path": path });
                        self.publish_with(
                            MessageType::FileUpdate,
                            format!("Wrote file: {path}"),
                            data,
                            Vec::new(),
                        );
                    }
                    Err(e) => self
                        .history
                        .push(HistoryEntry::user(format!("[write_file error]: {e}"))),
                }
            }

            ActionKind::EditFile {
                path,
                search,
                replace,
            } => {
                if search.is_empty() {
                    self.system_note("edit_file requires a non-empty 'search' parameter.");
                    return Ok(());
                }
                match self
                    .ctx
                    .workspace
                    .edit(&path, &search, &replace, &self.id)
                    .await
                {
                    Ok(diff) => {
                        self.claim_path(&path);
                        let data = serde_json::json!({ "diff": diff, "path": path });
                        self.publish_with(
                            MessageType::FileUpdate,
                            format!("Edited file: {path}"),
                            data,
                            Vec::new(),
                        );
                    }
                    Err(e) => self
                        .history
                        .push(HistoryEntry::user(format!("[edit_file error]: {e}"))),
                }
            }

            ActionKind::ListFiles { path } => {
                let entries = self.ctx.workspace.list_files(&path).await?;
                let listing = serde_json::to_string_pretty(&entries)?;
                self.history
                    .push(HistoryEntry::user(format!("[Directory listing]:\n{listing}")));
            }

            ActionKind::DeleteFile { path } => {
                let description = format!("Agent {} wants to delete: '{path}'", self.id);
                if self.request_approval(&reply.action, &description).await {
                    let existed = self.ctx.workspace.delete(&path).await?;
                    if existed {
                        self.publish(MessageType::FileUpdate, format!("Deleted file: {path}"));
                    }
                } else {
                    self.system_note(format!(
                        "Deletion of '{path}' was rejected or timed out. The file was NOT deleted."
                    ));
                }
            }

            ActionKind::RunCommand { command } => {
                if !is_safe_command(&command) {
                    let description =
                        format!("Agent {} wants to run: `{command}`", self.id);
                    if !self.request_approval(&reply.action, &description).await {
                        self.system_note(format!(
                            "Command REJECTED or timed out, NOT executed: `{command}`. \
                             Try a different approach or ask for guidance."
                        ));
                        return Ok(());
                    }
                }
                let result = self
                    .ctx
                    .terminal
                    .execute(&command, self.ctx.workspace.root())
                    .await?;
                self.publish_with(
                    MessageType::TerminalOutput,
                    format!("$ {command}"),
                    serde_json::to_value(&result)?,
                    Vec::new(),
                );
                self.history.push(HistoryEntry::user(format!(
                    "[Command output for `{command}`]:\nstdout: {}\nstderr: {}\nReturn code: {}",
                    truncate_chars(&result.stdout, 2000),
                    truncate_chars(&result.stderr, 1000),
                    result.return_code
                )));
            }

            ActionKind::CreateTask(spec) => {
                if !self.is_planner() {
                    self.system_note(
                        "Only the planner can create tasks. Use suggest_task to propose one.",
                    );
                    return Ok(());
                }
                let task = self.ctx.graph.create_task(spec, &self.id);
                let mentions = task.assignee.clone().into_iter().collect();
                self.publish_with(
                    MessageType::TaskAssigned,
                    format!("Created task: {}", task.title),
                    serde_json::to_value(&task)?,
                    mentions,
                );
            }

            ActionKind::CreateTasks { tasks } => {
                if !self.is_planner() {
                    self.system_note("Only the planner can create tasks.");
                    return Ok(());
                }
                let created: Vec<_> = tasks
                    .into_iter()
                    .map(|spec| self.ctx.graph.create_task(spec, &self.id))
                    .collect();
                self.publish_with(
                    MessageType::TaskAssigned,
                    format!("Created {} tasks for the mission", created.len()),
                    serde_json::json!({ "tasks": created }),
                    Vec::new(),
                );
                self.system_note(format!(
                    "Successfully created {} tasks. Now call finalize_plan to enable \
                     completion checks.",
                    created.len()
                ));
            }

            ActionKind::FinalizePlan => {
                if !self.is_planner() {
                    self.system_note("Only the planner can finalize the plan.");
                    return Ok(());
                }
                self.ctx.graph.mark_planning_complete();
                self.publish(
                    MessageType::System,
                    format!(
                        "Plan finalized with {} tasks, agents can now work",
                        self.ctx.graph.list_tasks().len()
                    ),
                );
            }

            ActionKind::UpdateTask { task_id, status } => {
                match self.ctx.graph.update_status(&task_id, status, &self.id) {
                    Err(e) => self.system_note(format!("Cannot update task status: {e}")),
                    Ok(task) => {
                        self.publish_with(
                            MessageType::TaskAssigned,
                            format!("Task [{task_id}] updated to {}", task.status),
                            serde_json::to_value(&task)?,
                            Vec::new(),
                        );
                        if task.status == TaskStatus::InReview {
                            // The workflow's review gate: ask for sign-off.
                            self.publish_with(
                                MessageType::ReviewRequest,
                                format!("Task '{}' is ready for review", task.title),
                                serde_json::to_value(&task)?,
                                Vec::new(),
                            );
                        }
                        if task.status == TaskStatus::Done && self.ctx.graph.all_done() {
                            if self.is_planner() {
                                self.mission_complete().await;
                            } else {
                                self.publish_with(
                                    MessageType::Chat,
                                    "All tasks appear to be done. Planner, please verify and \
                                     use the done action to complete the mission.",
                                    serde_json::Value::Null,
                                    vec![self.ctx.planner_id.clone()],
                                );
                            }
                        }
                    }
                }
            }

            ActionKind::AssignTask { task_id, assignee } => {
                match self.ctx.graph.assign_task(&task_id, &assignee) {
                    Err(e) => self.system_note(format!("Cannot assign task: {e}")),
                    Ok(task) => self.publish_with(
                        MessageType::TaskAssigned,
                        format!("Task [{task_id}] assigned to {assignee}"),
                        serde_json::to_value(&task)?,
                        vec![assignee],
                    ),
                }
            }

            ActionKind::SuggestTask { title, reason } => {
                let key = title.to_lowercase().trim().to_string();
                self.recent_suggestions
                    .retain(|_, t| t.elapsed() < SUGGESTION_WINDOW);
                if self.recent_suggestions.contains_key(&key) {
                    info!(agent = %self.id, title = %title, "Deduplicated repeat suggestion");
                } else {
                    self.recent_suggestions.insert(key, Instant::now());
                    self.publish_with(
                        MessageType::Chat,
                        format!("Task suggestion: {title}\nReason: {reason}"),
                        serde_json::json!({ "suggestion": { "title": title, "reason": reason } }),
                        vec![self.ctx.planner_id.clone()],
                    );
                }
            }

            ActionKind::SubmitReview {
                task_id,
                verdict,
                notes,
            } => {
                if !self.role.has_capability(Capability::CodeReview) {
                    self.system_note("Your role cannot submit reviews.");
                    return Ok(());
                }
                match verdict {
                    ReviewVerdict::Approve => {
                        match self.ctx.graph.mark_reviewed(&task_id, &self.id) {
                            Err(e) => self.system_note(format!("Cannot record review: {e}")),
                            Ok(task) => self.publish_with(
                                MessageType::ReviewResult,
                                format!("Approved task [{task_id}]: {notes}"),
                                serde_json::to_value(&task)?,
                                task.assignee.clone().into_iter().collect(),
                            ),
                        }
                    }
                    ReviewVerdict::RequestChanges => {
                        let mentions = self
                            .ctx
                            .graph
                            .get_task(&task_id)
                            .and_then(|t| t.assignee)
                            .into_iter()
                            .collect();
                        self.publish_with(
                            MessageType::ReviewResult,
                            format!("Changes requested on task [{task_id}]: {notes}"),
                            serde_json::json!({ "task_id": task_id, "notes": notes }),
                            mentions,
                        );
                    }
                }
            }

            ActionKind::ReportTests {
                task_id,
                passed,
                summary,
            } => {
                if !self.role.has_capability(Capability::TestExecution) {
                    self.system_note("Your role cannot report test results.");
                    return Ok(());
                }
                if passed {
                    if let Err(e) = self.ctx.graph.mark_tested(&task_id, &self.id) {
                        self.system_note(format!("Cannot record test result: {e}"));
                        return Ok(());
                    }
                }
                let verdict = if passed { "PASSED" } else { "FAILED" };
                self.publish_with(
                    MessageType::TestResult,
                    format!("Tests {verdict} for task [{task_id}]: {summary}"),
                    serde_json::json!({ "task_id": task_id, "passed": passed }),
                    Vec::new(),
                );
            }

            ActionKind::Handoff {
                task_id,
                files_touched,
                commands_run,
                known_risks,
                next_role,
            } => {
                if !next_role.is_empty() {
                    if let Err(e) = self.ctx.graph.set_handoff(&task_id, &next_role, &reply.message)
                    {
                        self.system_note(format!("Cannot record handoff: {e}"));
                        return Ok(());
                    }
                }
                let mentions = if next_role.is_empty() {
                    Vec::new()
                } else {
                    vec![next_role.clone()]
                };
                self.publish_with(
                    MessageType::Handoff,
                    format!("Handoff for task [{task_id}]"),
                    serde_json::json!({
                        "task_id": task_id,
                        "files_touched": files_touched,
                        "commands_run": commands_run,
                        "known_risks": known_risks,
                        "next_role": next_role,
                    }),
                    mentions,
                );
            }

            ActionKind::RequestReview {
                task_id,
                files,
                reviewers,
            } => {
                if !task_id.is_empty() {
                    self.publish_with(
                        MessageType::Handoff,
                        format!("Pre-review handoff for task [{task_id}]"),
                        serde_json::json!({
                            "task_id": task_id,
                            "files_touched": files,
                            "next_role": "reviewer",
                        }),
                        reviewers.clone(),
                    );
                }
                let content = if reply.message.is_empty() {
                    "Please review my code".to_string()
                } else {
                    reply.message.clone()
                };
                self.publish_with(
                    MessageType::ReviewRequest,
                    content,
                    serde_json::json!({ "task_id": task_id, "files": files }),
                    reviewers,
                );
            }

            ActionKind::EscalateTask { task_id, reason } => {
                match self
                    .ctx
                    .graph
                    .update_status(&task_id, TaskStatus::Blocked, &self.id)
                {
                    Err(e) => self.system_note(format!("Escalation failed: {e}")),
                    Ok(task) => {
                        self.publish_with(
                            MessageType::Chat,
                            format!(
                                "ESCALATION REQUEST: Task [{}] '{}' needs a stronger pair of \
                                 hands. Reason: {reason}",
                                task.id, task.title
                            ),
                            serde_json::to_value(&task)?,
                            vec![self.ctx.planner_id.clone()],
                        );
                        self.system_note(format!(
                            "Escalation sent. Task [{}] marked as blocked; the planner will \
                             reassign it.",
                            task.id
                        ));
                    }
                }
            }

            ActionKind::AskHelp {
                target,
                question,
                context,
                task_id,
            } => {
                let target = if target.is_empty() {
                    self.ctx.planner_id.clone()
                } else {
                    target
                };
                let mut content = format!("Help needed from @{target}\nQuestion: {question}");
                if !context.is_empty() {
                    content.push_str(&format!("\nWhat I've tried: {context}"));
                }
                if !task_id.is_empty() {
                    content.push_str(&format!("\nTask: [{task_id}]"));
                }
                self.publish_with(
                    MessageType::AskHelp,
                    content,
                    serde_json::json!({ "question": question, "context": context, "task_id": task_id }),
                    vec![target],
                );
            }

            ActionKind::ShareInsight { insight, files } => {
                let mut content = format!("Insight from {}: {insight}", self.id);
                if !files.is_empty() {
                    content.push_str(&format!("\nRelated files: {}", files.join(", ")));
                }
                self.publish_with(
                    MessageType::ShareInsight,
                    content,
                    serde_json::json!({ "insight": insight, "files": files }),
                    Vec::new(),
                );
            }

            ActionKind::ProposeApproach {
                approach,
                alternatives,
                task_id,
            } => {
                let mut content = format!("Approach proposal from {}: {approach}", self.id);
                if !alternatives.is_empty() {
                    content.push_str("\nAlternatives considered:");
                    for (i, alt) in alternatives.iter().enumerate() {
                        content.push_str(&format!("\n  {}. {alt}", i + 1));
                    }
                }
                if !task_id.is_empty() {
                    content.push_str(&format!("\nFor task: [{task_id}]"));
                }
                self.publish_with(
                    MessageType::ProposeApproach,
                    content,
                    serde_json::json!({ "approach": approach, "alternatives": alternatives, "task_id": task_id }),
                    vec![self.ctx.planner_id.clone()],
                );
            }

            ActionKind::Done => {
                if !self.is_planner() {
                    self.system_note(
                        "Only the planner can complete the mission. Notify the planner if you \
                         believe it is done.",
                    );
                    return Ok(());
                }
                let summary = self.ctx.graph.summary();
                if summary.todo > 0 || summary.in_progress > 0 {
                    let incomplete: Vec<String> = self
                        .ctx
                        .graph
                        .list_tasks()
                        .into_iter()
                        .filter(|t| {
                            matches!(t.status, TaskStatus::Todo | TaskStatus::InProgress)
                        })
                        .map(|t| format!("  - [{}] {}", t.status, t.title))
                        .collect();
                    warn!(agent = %self.id, todo = summary.todo, in_progress = summary.in_progress, "Mission completion blocked");
                    self.system_note(format!(
                        "Cannot complete mission: {} todo and {} in-progress task(s) remain:\n{}\n\
                         Wait for all tasks to finish, or cancel/complete them first.",
                        summary.todo,
                        summary.in_progress,
                        incomplete.join("\n")
                    ));
                } else {
                    self.mission_complete().await;
                }
            }

            ActionKind::Message => {}
        }

        Ok(())
    }

    fn is_planner(&self) -> bool {
        self.role.privileged && self.role.has_capability(Capability::TaskPlanning)
    }

    /// Advisory claim on a path the agent is actively working. The result
    /// is ignored: reservations never gate the write lock.
    fn claim_path(&self, path: &str) {
        let ttl = Duration::from_secs(self.ctx.config.reservation_ttl_secs);
        self.ctx
            .workspace
            .reservations
            .reserve(path, &self.id, Some(ttl));
    }

    /// Publish an approval request and block on the response channel until
    /// resolved or timed out. Timeout counts as rejection.
    async fn request_approval(&mut self, action: &ActionKind, description: &str) -> bool {
        let approval_id = short_id();
        let rx = self.shared.approvals.register(&approval_id);

        self.publish_with(
            MessageType::ApprovalRequest,
            description.to_string(),
            serde_json::json!({
                "approval_id": approval_id,
                "action": action.name(),
                "params": action,
            }),
            Vec::new(),
        );
        self.set_status(AgentStatus::Waiting);
        self.broadcast_status();

        let timeout = Duration::from_secs(self.ctx.config.approval_timeout_secs);
        self.shared.approvals.wait(&approval_id, rx, timeout).await
    }

    /// Scan the latest feedback entry for error markers and maintain the
    /// per-task failure streak that drives self-reflection.
    fn track_failures(&mut self, reply: &AgentReply) {
        if !reply.action.is_mutating() {
            return;
        }
        let Some(task_id) = self.active_task_id(&reply.action) else {
            return;
        };
        let Some(last) = self.history.last() else {
            return;
        };
        // Only user-role entries are action feedback; the model's own JSON
        // routinely mentions "error".
        let failed = last.role == HistoryRole::User
            && ERROR_MARKERS.iter().any(|m| last.content.contains(m));

        if failed {
            let count = self.task_failures.entry(task_id.clone()).or_insert(0);
            *count += 1;
            info!(agent = %self.id, task = %task_id, failures = *count, "Task action failed");
            self.task_last_error
                .insert(task_id, truncate_chars(&last.content, 300));
        } else if self.task_failures.get(&task_id).copied().unwrap_or(0) > 0 {
            self.task_failures.insert(task_id.clone(), 0);
            self.reflected.remove(&task_id);
        }
    }

    fn active_task_id(&self, action: &ActionKind) -> Option<String> {
        let explicit = match action {
            ActionKind::UpdateTask { task_id, .. }
            | ActionKind::EscalateTask { task_id, .. }
            | ActionKind::Handoff { task_id, .. } => Some(task_id.clone()),
            _ => None,
        };
        explicit.or_else(|| {
            self.ctx
                .graph
                .tasks_for_agent(&self.id)
                .into_iter()
                .find(|t| t.status == TaskStatus::InProgress)
                .map(|t| t.id)
        })
    }

    async fn recover(&mut self, error: SwarmError) {
        self.consecutive_errors += 1;
        self.ctx.router.record_agent_failure(&self.id);
        error!(
            agent = %self.id,
            errors = self.consecutive_errors,
            error = %error,
            "Loop error"
        );

        if self.consecutive_errors >= self.ctx.config.max_consecutive_errors {
            error!(agent = %self.id, "Too many consecutive errors, auto-pausing");
            self.ctx.persistence.save_lesson(LessonRecord {
                agent_role: self.role.name.clone(),
                lesson: format!("Repeated failure: {}", truncate_chars(&error.to_string(), 200)),
                context: format!(
                    "Failed {} times consecutively",
                    self.consecutive_errors
                ),
                mission_id: self.ctx.mission.id.clone(),
                kind: "error_recovery".into(),
            });
            self.publish(
                MessageType::System,
                format!(
                    "Auto-paused after {} consecutive errors: {}",
                    self.consecutive_errors,
                    truncate_chars(&error.to_string(), 100)
                ),
            );
            self.shared.paused.store(true, Ordering::SeqCst);
            self.set_status(AgentStatus::Paused);
        } else {
            let wait = (self.error_backoff * 2).min(MAX_ERROR_BACKOFF);
            self.error_backoff = wait;
            info!(agent = %self.id, wait_secs = wait.as_secs(), "Retrying after backoff");
            tokio::time::sleep(wait).await;
        }
    }

    /// Mission completion: broadcast, persist the record and a few lessons,
    /// snapshot the workspace, and end the mission for every agent loop.
    async fn mission_complete(&mut self) {
        let summary = self.ctx.graph.summary();
        info!(agent = %self.id, ?summary, "Mission complete");

        let tasks = self.ctx.graph.list_tasks();
        self.publish_with(
            MessageType::MissionComplete,
            "Mission complete, all tasks finished",
            serde_json::json!({ "tasks": tasks, "summary": summary }),
            Vec::new(),
        );

        let usage = self.ctx.router.global_usage();
        self.ctx.persistence.save_mission(MissionRecord {
            mission_id: self.ctx.mission.id.clone(),
            goal: self.ctx.mission.goal.clone(),
            workspace_path: self.ctx.workspace.root().display().to_string(),
            tasks: tasks.clone(),
            cost_usd: usage.estimated_cost_usd,
            duration_secs: self.ctx.mission.started_at.elapsed().as_secs_f64(),
            agents: self.ctx.bus.subscribers(),
            status: "completed".into(),
        });

        for task in tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .take(3)
        {
            self.ctx.persistence.save_lesson(LessonRecord {
                agent_role: task
                    .assignee
                    .clone()
                    .unwrap_or_else(|| self.role.name.clone()),
                lesson: format!("Successfully completed: {}", task.title),
                context: task.description.clone(),
                mission_id: self.ctx.mission.id.clone(),
                kind: "pattern".into(),
            });
        }

        if let Err(e) = self
            .ctx
            .git
            .auto_commit("Mission complete: all tasks done")
            .await
        {
            error!(error = %e, "Mission-complete snapshot failed");
        }

        self.ctx.end_mission();
        self.shared.running.store(false, Ordering::SeqCst);
    }

    fn set_status(&self, status: AgentStatus) {
        *self.shared.status.write() = status;
    }

    fn broadcast_status(&self) {
        let status = *self.shared.status.read();
        self.publish_with(
            MessageType::AgentStatus,
            status.as_str(),
            serde_json::json!({
                "id": self.id,
                "role": self.role.name,
                "status": status,
            }),
            Vec::new(),
        );
    }

    fn publish(&self, msg_type: MessageType, content: impl Into<String>) {
        self.ctx
            .bus
            .publish(Message::new(&self.id, &self.role.name, msg_type, content));
    }

    fn publish_with(
        &self,
        msg_type: MessageType,
        content: impl Into<String>,
        data: serde_json::Value,
        mentions: Vec<String>,
    ) {
        self.ctx.bus.publish(
            Message::new(&self.id, &self.role.name, msg_type, content)
                .with_data(data)
                .with_mentions(mentions),
        );
    }

    /// Feed a plain-text system note back into the agent's own
    /// conversation. This is how recoverable failures reach the model.
    fn system_note(&mut self, text: impl Into<String>) {
        self.history
            .push(HistoryEntry::user(format!("[System] {}", text.into())));
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
