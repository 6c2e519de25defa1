//! The shared file store.
//!
//! All mutations to one path are serialized through a per-path async lock.
//! On top of that, optimistic concurrency keeps agents honest: every read
//! records a content hash for (agent, path), and an edit is rejected as
//! stale when the on-disk hash no longer matches what that agent last saw,
//! or when the agent never read a pre-existing file at all.

use crate::diff::{generate_diff, FileDiff};
use crate::reservations::ReservationMap;
use crate::tracker::{FileTracker, TouchKind};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use swarm_common::{now_millis, Result, SwarmError};
use tracing::{debug, info, warn};

const BACKUP_DIR: &str = ".backups";
/// Directory names skipped by listings.
const NOISE_DIRS: &[&str] = &["__pycache__", "node_modules", ".git", "venv", ".venv", "target"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum WorkspaceEntry {
    File { name: String, path: String, size: u64 },
    Directory { name: String, path: String, children: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub ext: String,
}

#[derive(Default)]
struct HashState {
    /// path -> current on-disk content hash
    file_hashes: HashMap<String, String>,
    /// (agent_id, path) -> hash when the agent last read/wrote it
    agent_reads: HashMap<(String, String), String>,
}

pub struct WorkspaceStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    hashes: Mutex<HashState>,
    pub tracker: FileTracker,
    pub reservations: ReservationMap,
}

impl WorkspaceStore {
    /// Open (creating if needed) a workspace rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Workspace root set");
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
            hashes: Mutex::new(HashState::default()),
            tracker: FileTracker::default(),
            reservations: ReservationMap::default(),
        })
    }

    pub fn with_activity_window(mut self, window: Duration) -> Self {
        self.tracker = FileTracker::new(window);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the root, rejecting escapes.
    pub fn validate_path(&self, rel_path: &str) -> Result<PathBuf> {
        let rel = Path::new(rel_path);
        if rel.is_absolute() {
            return Err(SwarmError::PathEscape(rel_path.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(SwarmError::PathEscape(rel_path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    /// Whether a path already exists on disk (used by the runtime to steer
    /// the model from `write_file` to `edit_file`).
    pub fn exists(&self, rel_path: &str) -> bool {
        self.validate_path(rel_path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Read a file, recording its content hash for the reading agent.
    pub async fn read(&self, rel_path: &str, agent_id: &str) -> Result<String> {
        let full = self.validate_path(rel_path)?;
        if !full.exists() {
            return Err(SwarmError::FileNotFound(rel_path.to_string()));
        }
        let content = tokio::fs::read_to_string(&full).await?;

        let hash = content_hash(&content);
        let mut hashes = self.hashes.lock();
        hashes.file_hashes.insert(rel_path.to_string(), hash.clone());
        if !agent_id.is_empty() {
            hashes
                .agent_reads
                .insert((agent_id.to_string(), rel_path.to_string()), hash);
            self.tracker.record(agent_id, rel_path, TouchKind::Read);
        }
        Ok(content)
    }

    /// Full overwrite. Backs up existing content, updates hash tracking,
    /// and returns a line diff.
    pub async fn write(&self, rel_path: &str, content: &str, agent_id: &str) -> Result<FileDiff> {
        let full = self.validate_path(rel_path)?;
        let lock = self.path_lock(rel_path);
        let _guard = lock.lock().await;

        let old_content = if full.exists() {
            let old = tokio::fs::read_to_string(&full).await?;
            self.backup(rel_path, &old).await?;
            old
        } else {
            String::new()
        };

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;

        self.record_mutation(rel_path, content, agent_id, TouchKind::Write);
        info!(path = %rel_path, bytes = content.len(), "Wrote file");
        Ok(generate_diff(rel_path, &old_content, content))
    }

    /// Surgical inline edit: find `search` verbatim and replace its first
    /// occurrence. Rejects stale edits and missing patterns.
    pub async fn edit(
        &self,
        rel_path: &str,
        search: &str,
        replace: &str,
        agent_id: &str,
    ) -> Result<FileDiff> {
        let full = self.validate_path(rel_path)?;
        let lock = self.path_lock(rel_path);
        let _guard = lock.lock().await;

        if !full.exists() {
            return Err(SwarmError::FileNotFound(rel_path.to_string()));
        }
        let old_content = tokio::fs::read_to_string(&full).await?;

        self.check_stale(agent_id, rel_path)?;

        if !old_content.contains(search) {
            return Err(SwarmError::PatternNotFound {
                path: rel_path.to_string(),
            });
        }
        let occurrences = old_content.matches(search).count();
        if occurrences > 1 {
            warn!(
                path = %rel_path,
                occurrences,
                "Search text matches multiple times, replacing first occurrence"
            );
        }

        let recent_writers = self.tracker.recent_writers(rel_path, agent_id);
        if !recent_writers.is_empty() {
            warn!(
                path = %rel_path,
                agent = %agent_id,
                writers = ?recent_writers,
                "File conflict: editing a file recently modified by other agents"
            );
        }

        self.backup(rel_path, &old_content).await?;
        let new_content = old_content.replacen(search, replace, 1);
        tokio::fs::write(&full, &new_content).await?;

        self.record_mutation(rel_path, &new_content, agent_id, TouchKind::Edit);
        info!(
            path = %rel_path,
            removed = search.len(),
            inserted = replace.len(),
            "Edited file"
        );
        Ok(generate_diff(rel_path, &old_content, &new_content))
    }

    /// Delete a file. Returns false when it didn't exist.
    pub async fn delete(&self, rel_path: &str) -> Result<bool> {
        let full = self.validate_path(rel_path)?;
        let lock = self.path_lock(rel_path);
        let _guard = lock.lock().await;

        if !full.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&full).await?;
        let mut hashes = self.hashes.lock();
        hashes.file_hashes.remove(rel_path);
        info!(path = %rel_path, "Deleted file");
        Ok(true)
    }

    /// List one directory level, skipping hidden files and build noise.
    pub async fn list_files(&self, rel_path: &str) -> Result<Vec<WorkspaceEntry>> {
        let target = if rel_path.is_empty() {
            self.root.clone()
        } else {
            self.validate_path(rel_path)?
        };
        if !target.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_noise(&name) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(&entry.path())
                .to_string_lossy()
                .to_string();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                let children = std::fs::read_dir(entry.path())
                    .map(|d| d.count())
                    .unwrap_or(0);
                entries.push(WorkspaceEntry::Directory {
                    name,
                    path: rel,
                    children,
                });
            } else {
                entries.push(WorkspaceEntry::File {
                    name,
                    path: rel,
                    size: meta.len(),
                });
            }
        }
        entries.sort_by(|a, b| entry_path(a).cmp(entry_path(b)));
        Ok(entries)
    }

    /// Recursive listing for codebase scanning, depth-capped.
    pub fn list_files_recursive(&self, max_depth: usize) -> Vec<FileInfo> {
        let mut files = Vec::new();
        walk(&self.root, &self.root, 0, max_depth, &mut files);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    fn path_lock(&self, rel_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(rel_path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Stale when the agent never read a pre-existing file, or the on-disk
    /// hash moved since its last read.
    fn check_stale(&self, agent_id: &str, rel_path: &str) -> Result<()> {
        if agent_id.is_empty() {
            return Ok(());
        }
        let hashes = self.hashes.lock();
        let key = (agent_id.to_string(), rel_path.to_string());

        let Some(agent_hash) = hashes.agent_reads.get(&key) else {
            if hashes.file_hashes.contains_key(rel_path) {
                return Err(SwarmError::StaleRead {
                    path: rel_path.to_string(),
                    reason: "you haven't read this file yet; read it before modifying".into(),
                });
            }
            return Ok(());
        };

        match hashes.file_hashes.get(rel_path) {
            Some(current) if current != agent_hash => Err(SwarmError::StaleRead {
                path: rel_path.to_string(),
                reason: "modified by another agent since you last read it; read it again before editing"
                    .into(),
            }),
            _ => Ok(()),
        }
    }

    fn record_mutation(&self, rel_path: &str, content: &str, agent_id: &str, kind: TouchKind) {
        let hash = content_hash(content);
        let mut hashes = self.hashes.lock();
        hashes.file_hashes.insert(rel_path.to_string(), hash.clone());
        if !agent_id.is_empty() {
            hashes
                .agent_reads
                .insert((agent_id.to_string(), rel_path.to_string()), hash);
            self.tracker.record(agent_id, rel_path, kind);
        }
    }

    /// Save a timestamped backup before mutating. Path is flattened:
    /// `src/app.js` becomes `.backups/src__app.js.<ts>.bak`.
    async fn backup(&self, rel_path: &str, content: &str) -> Result<()> {
        let backup_dir = self.root.join(BACKUP_DIR);
        tokio::fs::create_dir_all(&backup_dir).await?;

        let flat = rel_path.replace(['/', '\\'], "__");
        let backup_path = backup_dir.join(format!("{flat}.{}.bak", now_millis()));
        tokio::fs::write(&backup_path, content).await?;
        debug!(backup = %backup_path.display(), "Backup saved");
        Ok(())
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn is_noise(name: &str) -> bool {
    (name.starts_with('.') && name != ".env") || NOISE_DIRS.contains(&name)
}

fn entry_path(entry: &WorkspaceEntry) -> &str {
    match entry {
        WorkspaceEntry::File { path, .. } | WorkspaceEntry::Directory { path, .. } => path,
    }
}

fn walk(root: &Path, dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<FileInfo>) {
    if depth >= max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "Permission denied or unreadable directory");
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if path.is_dir() {
            if !is_noise(&name) {
                walk(root, &path, depth + 1, max_depth, out);
            }
        } else if !is_noise(&name) {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            out.push(FileInfo { path: rel, size, ext });
        }
    }
}
