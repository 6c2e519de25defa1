//! Shared file workspace for the swarm.
//!
//! Three cooperating layers:
//! - a per-path async lock serializing concurrent mutations (the only true
//!   mutual exclusion in the system);
//! - optimistic concurrency via content hashes, rejecting edits based on
//!   stale reads;
//! - an advisory reservation layer agents use while planning to avoid
//!   stepping on each other, plus an activity tracker for conflict
//!   visibility.

pub mod diff;
pub mod reservations;
pub mod store;
pub mod tracker;

pub use diff::{ChangeKind, FileDiff};
pub use reservations::{ReservationInfo, ReservationMap};
pub use store::{FileInfo, WorkspaceEntry, WorkspaceStore};
pub use tracker::{FileConflict, FileTracker, TouchKind};
