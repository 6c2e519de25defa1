//! Task graph: task tracking with dependency edges and an enforced
//! workflow pipeline.
//!
//! Tasks declare dependencies and are auto-blocked until those complete;
//! status changes move only along the allowed edge set (the privileged
//! planner may override); completing a task re-examines every blocked task
//! that waits on it. A "planning complete" flag gates mission completion so
//! a half-written plan never reads as finished.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use swarm_common::{short_id, Result, SwarmError, Task, TaskSpec, TaskStatus};
use tracing::{error, info, warn};

/// Callback fired after a task's status changes: `(task, old, new)`.
pub type StatusObserver = std::sync::Arc<dyn Fn(&Task, TaskStatus, TaskStatus) + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TaskSummary {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub in_review: usize,
    pub done: usize,
    pub blocked: usize,
}

/// A blocked task together with the dependencies still holding it up.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedTask {
    pub task: Task,
    pub waiting_on: Vec<Task>,
}

/// One node of the exported dependency graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub title: String,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
}

#[derive(Default)]
struct GraphState {
    tasks: HashMap<String, Task>,
    /// Insertion order, so listings stay stable
    order: Vec<String>,
    planning_complete: bool,
}

/// The shared task store. One instance per mission, shared by every agent.
pub struct TaskGraph {
    state: RwLock<GraphState>,
    observers: Mutex<Vec<StatusObserver>>,
    /// Agent id allowed to override workflow transitions
    planner_id: String,
}

impl TaskGraph {
    pub fn new(planner_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            observers: Mutex::new(Vec::new()),
            planner_id: planner_id.into(),
        }
    }

    /// Register a callback for task status changes. Observers run after the
    /// graph lock is released, so they may call back into the graph.
    pub fn on_status_change(&self, observer: StatusObserver) {
        self.observers.lock().push(observer);
    }

    /// Create a task. Dependency ids that don't exist are dropped with a
    /// warning; a dependency set that would close a cycle is discarded
    /// entirely. Initial status is `Blocked` when any accepted dependency is
    /// not yet done.
    pub fn create_task(&self, spec: TaskSpec, created_by: &str) -> Task {
        let task_id = short_id();
        let mut state = self.state.write();

        let mut deps = Vec::new();
        for dep_id in &spec.dependencies {
            if state.tasks.contains_key(dep_id) {
                deps.push(dep_id.clone());
            } else {
                warn!(task = %task_id, dep = %dep_id, "Dependency not found, skipping");
            }
        }

        if !deps.is_empty() && would_create_cycle(&state.tasks, &task_id, &deps) {
            error!(task = %task_id, "Dependency set would create a cycle, discarding it");
            deps.clear();
        }

        let has_unresolved = deps
            .iter()
            .any(|d| state.tasks[d].status != TaskStatus::Done);
        let initial = if has_unresolved {
            TaskStatus::Blocked
        } else {
            TaskStatus::Todo
        };

        let mut task = Task::new(&task_id, spec.title, spec.description, created_by);
        task.status = initial;
        task.assignee = spec.assignee;
        task.dependencies = deps;
        task.tags = spec.tags;
        task.priority = spec.priority;
        task.requires_review = spec.requires_review;
        task.requires_testing = spec.requires_testing;

        info!(
            task = %task.id,
            title = %task.title,
            assignee = task.assignee.as_deref().unwrap_or("unassigned"),
            status = %task.status,
            "Task created"
        );

        state.tasks.insert(task_id.clone(), task.clone());
        state.order.push(task_id);
        task
    }

    /// Update a task's status with workflow validation.
    ///
    /// Moving to `InProgress` while dependencies remain unresolved is not an
    /// error: the task silently re-blocks and is returned as `Blocked`.
    /// Moving to `Done` fails with `ReviewRequired` until a reviewer signed
    /// off (when the task requires review). On success observers fire, and a
    /// completion re-examines every blocked dependent.
    pub fn update_status(&self, task_id: &str, new_status: TaskStatus, actor: &str) -> Result<Task> {
        let mut events: Vec<(Task, TaskStatus, TaskStatus)> = Vec::new();

        let result = {
            let mut state = self.state.write();
            let (old_status, requires_review, reviewed) = {
                let task = state
                    .tasks
                    .get(task_id)
                    .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;
                (task.status, task.requires_review, task.reviewed_by.is_some())
            };

            if actor != self.planner_id && !old_status.can_transition_to(new_status) {
                return Err(SwarmError::InvalidTransition {
                    from: old_status.to_string(),
                    to: new_status.to_string(),
                    allowed: old_status
                        .allowed_transitions()
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }

            if new_status == TaskStatus::InProgress {
                let unresolved = unresolved_deps(&state.tasks, task_id);
                if !unresolved.is_empty() {
                    let task = state.tasks.get_mut(task_id).expect("checked above");
                    task.status = TaskStatus::Blocked;
                    task.touch();
                    warn!(task = %task_id, waiting_on = ?unresolved, "Task blocked on unresolved dependencies");
                    return Ok(task.clone());
                }
            }

            if new_status == TaskStatus::Done && requires_review && !reviewed {
                return Err(SwarmError::ReviewRequired {
                    task_id: task_id.to_string(),
                });
            }

            let task = state.tasks.get_mut(task_id).expect("checked above");
            task.status = new_status;
            task.touch();
            info!(task = %task_id, from = %old_status, to = %new_status, "Task status updated");
            events.push((task.clone(), old_status, new_status));

            if new_status == TaskStatus::Done {
                for unblocked in resolve_dependents(&mut state.tasks, task_id) {
                    events.push((unblocked, TaskStatus::Blocked, TaskStatus::Todo));
                }
            }

            Ok(state.tasks[task_id].clone())
        };

        self.fire_observers(events);
        result
    }

    /// Record a reviewer's sign-off without changing status.
    pub fn mark_reviewed(&self, task_id: &str, reviewer: &str) -> Result<Task> {
        self.with_task_mut(task_id, |task| {
            task.reviewed_by = Some(reviewer.to_string());
            info!(task = %task_id, reviewer = %reviewer, "Task reviewed");
        })
    }

    /// Record a tester's sign-off without changing status.
    pub fn mark_tested(&self, task_id: &str, tester: &str) -> Result<Task> {
        self.with_task_mut(task_id, |task| {
            task.tested_by = Some(tester.to_string());
            info!(task = %task_id, tester = %tester, "Task tested");
        })
    }

    pub fn assign_task(&self, task_id: &str, assignee: &str) -> Result<Task> {
        self.with_task_mut(task_id, |task| {
            task.assignee = Some(assignee.to_string());
            info!(task = %task_id, assignee = %assignee, "Task assigned");
        })
    }

    /// Set a handoff target: the next agent that should pick the task up.
    pub fn set_handoff(&self, task_id: &str, target: &str, reason: &str) -> Result<Task> {
        self.with_task_mut(task_id, |task| {
            task.handoff_to = Some(target.to_string());
            task.handoff_reason = if reason.is_empty() {
                None
            } else {
                Some(reason.to_string())
            };
            info!(task = %task_id, target = %target, "Task handoff set");
        })
    }

    /// Clear a handoff after it has been picked up.
    pub fn clear_handoff(&self, task_id: &str) -> Result<Task> {
        self.with_task_mut(task_id, |task| {
            task.handoff_to = None;
            task.handoff_reason = None;
        })
    }

    /// Tasks being handed off TO the given agent.
    pub fn pending_handoffs(&self, agent_id: &str) -> Vec<Task> {
        self.collect(|t| t.handoff_to.as_deref() == Some(agent_id))
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.read().tasks.get(task_id).cloned()
    }

    pub fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        self.collect(|t| t.assignee.as_deref() == Some(agent_id))
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.collect(|t| t.status == status)
    }

    /// Tasks the agent can work on right now: assigned to it and either
    /// `Todo` or `InProgress`. This is the gate the agent loop polls.
    pub fn actionable_tasks(&self, agent_id: &str) -> Vec<Task> {
        self.collect(|t| {
            t.assignee.as_deref() == Some(agent_id)
                && matches!(t.status, TaskStatus::Todo | TaskStatus::InProgress)
        })
    }

    /// All blocked tasks with their unresolved dependency detail.
    pub fn blocked_tasks(&self) -> Vec<BlockedTask> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Blocked)
            .map(|t| BlockedTask {
                task: t.clone(),
                waiting_on: unresolved_deps(&state.tasks, &t.id)
                    .iter()
                    .filter_map(|d| state.tasks.get(d))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> TaskSummary {
        let state = self.state.read();
        let count = |s: TaskStatus| state.tasks.values().filter(|t| t.status == s).count();
        TaskSummary {
            total: state.tasks.len(),
            todo: count(TaskStatus::Todo),
            in_progress: count(TaskStatus::InProgress),
            in_review: count(TaskStatus::InReview),
            done: count(TaskStatus::Done),
            blocked: count(TaskStatus::Blocked),
        }
    }

    /// Export the dependency graph for visualization.
    pub fn dependency_graph(&self) -> HashMap<String, GraphNode> {
        let state = self.state.read();
        state
            .tasks
            .values()
            .map(|task| {
                let blocks = state
                    .tasks
                    .values()
                    .filter(|t| t.dependencies.contains(&task.id))
                    .map(|t| t.id.clone())
                    .collect();
                (
                    task.id.clone(),
                    GraphNode {
                        title: task.title.clone(),
                        status: task.status,
                        assignee: task.assignee.clone(),
                        depends_on: task.dependencies.clone(),
                        blocks,
                    },
                )
            })
            .collect()
    }

    pub fn has_tasks(&self) -> bool {
        !self.state.read().tasks.is_empty()
    }

    /// Called by the planner once the full initial task list exists; until
    /// then `all_done` always reports false.
    pub fn mark_planning_complete(&self) {
        self.state.write().planning_complete = true;
        info!("Planning phase complete, completion checks enabled");
    }

    pub fn planning_complete(&self) -> bool {
        self.state.read().planning_complete
    }

    /// True only when planning was finalized AND every task is done.
    pub fn all_done(&self) -> bool {
        let state = self.state.read();
        state.planning_complete
            && !state.tasks.is_empty()
            && state.tasks.values().all(|t| t.status == TaskStatus::Done)
    }

    /// Drop everything for a new mission.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tasks.clear();
        state.order.clear();
        state.planning_complete = false;
    }

    /// Add dependencies to an existing task. Ids that don't exist are
    /// dropped; a set that would close a cycle is discarded entirely and the
    /// task is left unchanged. A task left waiting on unresolved
    /// dependencies re-blocks.
    pub fn add_dependencies(&self, task_id: &str, new_deps: &[String]) -> Result<Task> {
        let mut state = self.state.write();
        if !state.tasks.contains_key(task_id) {
            return Err(SwarmError::TaskNotFound(task_id.to_string()));
        }

        let mut accepted: Vec<String> = new_deps
            .iter()
            .filter(|d| {
                let known = state.tasks.contains_key(d.as_str());
                if !known {
                    warn!(task = %task_id, dep = %d, "Dependency not found, skipping");
                }
                known && d.as_str() != task_id
            })
            .cloned()
            .collect();

        if !accepted.is_empty() && would_create_cycle(&state.tasks, task_id, &accepted) {
            error!(task = %task_id, "Dependency set would create a cycle, discarding it");
            accepted.clear();
        }

        let task = state.tasks.get_mut(task_id).expect("checked above");
        for dep in accepted {
            if !task.dependencies.contains(&dep) {
                task.dependencies.push(dep);
            }
        }
        task.touch();

        let has_unresolved = !unresolved_deps(&state.tasks, task_id).is_empty();
        let task = state.tasks.get_mut(task_id).expect("checked above");
        if has_unresolved && task.status == TaskStatus::Todo {
            task.status = TaskStatus::Blocked;
        }
        Ok(task.clone())
    }

    fn with_task_mut(&self, task_id: &str, f: impl FnOnce(&mut Task)) -> Result<Task> {
        let mut state = self.state.write();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;
        f(task);
        task.touch();
        Ok(task.clone())
    }

    fn collect(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|t| pred(t))
            .cloned()
            .collect()
    }

    fn fire_observers(&self, events: Vec<(Task, TaskStatus, TaskStatus)>) {
        if events.is_empty() {
            return;
        }
        // Snapshot so observers can call back into the graph freely.
        let observers: Vec<StatusObserver> = self.observers.lock().clone();
        for (task, old, new) in &events {
            for observer in &observers {
                observer(task, *old, *new);
            }
        }
    }
}

/// Dependency tasks of `task_id` that are not yet done.
fn unresolved_deps(tasks: &HashMap<String, Task>, task_id: &str) -> Vec<String> {
    tasks
        .get(task_id)
        .map(|task| {
            task.dependencies
                .iter()
                .filter(|d| {
                    tasks
                        .get(d.as_str())
                        .is_some_and(|t| t.status != TaskStatus::Done)
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// When a task completes, move any blocked dependent whose remaining
/// dependency set is now empty back to `Todo`. Returns the unblocked tasks.
fn resolve_dependents(tasks: &mut HashMap<String, Task>, completed_id: &str) -> Vec<Task> {
    let candidates: Vec<String> = tasks
        .values()
        .filter(|t| t.status == TaskStatus::Blocked && t.dependencies.iter().any(|d| d == completed_id))
        .map(|t| t.id.clone())
        .collect();

    let mut unblocked = Vec::new();
    for id in candidates {
        if unresolved_deps(tasks, &id).is_empty() {
            let task = tasks.get_mut(&id).expect("candidate exists");
            task.status = TaskStatus::Todo;
            task.touch();
            info!(task = %id, "Task unblocked, all dependencies resolved");
            unblocked.push(task.clone());
        }
    }
    if !unblocked.is_empty() {
        info!(
            count = unblocked.len(),
            completed = %completed_id,
            "Unblocked dependents after completion"
        );
    }
    unblocked
}

/// BFS from each proposed dependency: if `task_id` is reachable, accepting
/// the set would close a cycle.
fn would_create_cycle(tasks: &HashMap<String, Task>, task_id: &str, new_deps: &[String]) -> bool {
    for dep_id in new_deps {
        let mut visited = std::collections::HashSet::new();
        let mut queue = VecDeque::from([dep_id.clone()]);
        while let Some(current) = queue.pop_front() {
            if current == task_id {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(task) = tasks.get(&current) {
                queue.extend(task.dependencies.iter().cloned());
            }
        }
    }
    false
}
