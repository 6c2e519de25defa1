//! File activity tracking: which agents are touching which files.
//!
//! Gives the planner visibility into potential conflicts (two agents
//! writing the same file inside the activity window) without blocking
//! anyone.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// How long a touch counts as "recent".
const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchKind {
    Read,
    Write,
    Edit,
}

impl TouchKind {
    fn is_write(self) -> bool {
        matches!(self, TouchKind::Write | TouchKind::Edit)
    }
}

#[derive(Debug, Clone)]
struct FileTouch {
    agent_id: String,
    path: String,
    kind: TouchKind,
    at: Instant,
}

/// A file multiple agents are writing to inside the activity window.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileConflict {
    pub path: String,
    pub agents: Vec<String>,
}

#[derive(Debug)]
pub struct FileTracker {
    touches: Mutex<Vec<FileTouch>>,
    window: Duration,
}

impl Default for FileTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_WINDOW)
    }
}

impl FileTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            touches: Mutex::new(Vec::new()),
            window,
        }
    }

    pub fn record(&self, agent_id: &str, path: &str, kind: TouchKind) {
        let mut touches = self.touches.lock();
        touches.push(FileTouch {
            agent_id: agent_id.to_string(),
            path: path.to_string(),
            kind,
            at: Instant::now(),
        });
        let cutoff = self.window;
        touches.retain(|t| t.at.elapsed() <= cutoff);
    }

    /// Agents that recently wrote to `path`, excluding `exclude`.
    pub fn recent_writers(&self, path: &str, exclude: &str) -> Vec<String> {
        let touches = self.touches.lock();
        let mut agents = BTreeSet::new();
        for t in touches.iter() {
            if t.path == path
                && t.kind.is_write()
                && t.agent_id != exclude
                && t.at.elapsed() <= self.window
            {
                agents.insert(t.agent_id.clone());
            }
        }
        agents.into_iter().collect()
    }

    /// Files an agent touched inside the window.
    pub fn agent_files(&self, agent_id: &str) -> Vec<String> {
        let touches = self.touches.lock();
        let mut files = BTreeSet::new();
        for t in touches.iter() {
            if t.agent_id == agent_id && t.at.elapsed() <= self.window {
                files.insert(t.path.clone());
            }
        }
        files.into_iter().collect()
    }

    /// Files with two or more recent writers.
    pub fn conflicts(&self) -> Vec<FileConflict> {
        let touches = self.touches.lock();
        let mut by_file: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for t in touches.iter() {
            if t.kind.is_write() && t.at.elapsed() <= self.window {
                by_file
                    .entry(t.path.clone())
                    .or_default()
                    .insert(t.agent_id.clone());
            }
        }
        by_file
            .into_iter()
            .filter(|(_, agents)| agents.len() > 1)
            .map(|(path, agents)| FileConflict {
                path,
                agents: agents.into_iter().collect(),
            })
            .collect()
    }

    /// Human-readable summary of recent write activity, for injection into
    /// the planner's context.
    pub fn activity_summary(&self) -> String {
        let touches = self.touches.lock();
        let mut by_agent: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for t in touches.iter() {
            if t.kind.is_write() && t.at.elapsed() <= self.window {
                by_agent
                    .entry(t.agent_id.clone())
                    .or_default()
                    .insert(t.path.clone());
            }
        }
        drop(touches);

        if by_agent.is_empty() {
            return "No recent file activity.".to_string();
        }

        let mut lines: Vec<String> = by_agent
            .iter()
            .map(|(agent, files)| {
                format!(
                    "- {} modified: {}",
                    agent,
                    files.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            })
            .collect();

        let conflicts = self.conflicts();
        if !conflicts.is_empty() {
            lines.push("FILE CONFLICTS (multiple agents editing same file):".to_string());
            for c in conflicts {
                lines.push(format!("- {} edited by: {}", c.path, c.agents.join(", ")));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_writers_ignores_reads_and_self() {
        let tracker = FileTracker::default();
        tracker.record("dev-1", "app.py", TouchKind::Edit);
        tracker.record("dev-2", "app.py", TouchKind::Read);
        tracker.record("dev-3", "app.py", TouchKind::Write);

        let writers = tracker.recent_writers("app.py", "dev-1");
        assert_eq!(writers, vec!["dev-3"]);
    }

    #[test]
    fn conflicts_need_two_writers() {
        let tracker = FileTracker::default();
        tracker.record("dev-1", "app.py", TouchKind::Edit);
        assert!(tracker.conflicts().is_empty());

        tracker.record("dev-2", "app.py", TouchKind::Write);
        let conflicts = tracker.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].agents, vec!["dev-1", "dev-2"]);
    }

    #[test]
    fn touches_expire_after_window() {
        let tracker = FileTracker::new(Duration::from_millis(10));
        tracker.record("dev-1", "app.py", TouchKind::Write);
        std::thread::sleep(Duration::from_millis(25));
        assert!(tracker.recent_writers("app.py", "").is_empty());
        assert!(tracker.agent_files("dev-1").is_empty());
    }

    #[test]
    fn summary_mentions_conflicts() {
        let tracker = FileTracker::default();
        assert_eq!(tracker.activity_summary(), "No recent file activity.");

        tracker.record("dev-1", "app.py", TouchKind::Edit);
        tracker.record("dev-2", "app.py", TouchKind::Edit);
        let summary = tracker.activity_summary();
        assert!(summary.contains("dev-1 modified: app.py"));
        assert!(summary.contains("FILE CONFLICTS"));
    }
}
