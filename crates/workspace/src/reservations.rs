//! Advisory file reservations.
//!
//! A reservation is a soft, TTL-bounded exclusive claim on a path: it does
//! not gate the per-path write lock, but agents consult it while planning to
//! avoid scheduling conflicting work on the same file. At most one live
//! reservation exists per path; only the holder may refresh or release it,
//! and expired claims are pruned lazily.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_TTL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
struct Reservation {
    holder: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl Reservation {
    fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Snapshot of a live reservation, for UI/planner visibility.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReservationInfo {
    pub path: String,
    pub holder: String,
    pub remaining_secs: u64,
}

#[derive(Debug, Default)]
pub struct ReservationMap {
    inner: Mutex<HashMap<String, Reservation>>,
}

impl ReservationMap {
    /// Claim `path` for `agent_id`. Returns false when another agent holds a
    /// live reservation; re-reserving a path you already hold refreshes it.
    pub fn reserve(&self, path: &str, agent_id: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(DEFAULT_TTL);
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.get(path) {
            if !existing.is_expired() && existing.holder != agent_id {
                debug!(path = %path, holder = %existing.holder, requester = %agent_id, "Reservation denied");
                return false;
            }
        }

        inner.insert(
            path.to_string(),
            Reservation {
                holder: agent_id.to_string(),
                acquired_at: Instant::now(),
                ttl,
            },
        );
        info!(path = %path, agent = %agent_id, ttl_secs = ttl.as_secs(), "Path reserved");
        true
    }

    /// Extend a reservation the agent already holds. Returns false when the
    /// agent is not the (live) holder.
    pub fn refresh(&self, path: &str, agent_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get_mut(path) {
            Some(r) if r.holder == agent_id && !r.is_expired() => {
                r.acquired_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Release a reservation. Only the holder may release; returns false
    /// otherwise.
    pub fn release(&self, path: &str, agent_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(path) {
            Some(r) if r.holder == agent_id => {
                inner.remove(path);
                info!(path = %path, agent = %agent_id, "Reservation released");
                true
            }
            _ => false,
        }
    }

    /// Drop every reservation held by `agent_id` (agent stopped or paused).
    pub fn release_all(&self, agent_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, r| r.holder != agent_id);
        let released = before - inner.len();
        if released > 0 {
            info!(agent = %agent_id, count = released, "Released all reservations");
        }
        released
    }

    /// The live holder of `path`, if any.
    pub fn holder(&self, path: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        prune(&mut inner);
        inner.get(path).map(|r| r.holder.clone())
    }

    /// All live reservations.
    pub fn list(&self) -> Vec<ReservationInfo> {
        let mut inner = self.inner.lock();
        prune(&mut inner);
        let mut out: Vec<ReservationInfo> = inner
            .iter()
            .map(|(path, r)| ReservationInfo {
                path: path.clone(),
                holder: r.holder.clone(),
                remaining_secs: r.ttl.saturating_sub(r.acquired_at.elapsed()).as_secs(),
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

fn prune(inner: &mut HashMap<String, Reservation>) {
    inner.retain(|_, r| !r.is_expired());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_held_path_is_denied() {
        let map = ReservationMap::default();
        assert!(map.reserve("app.py", "dev-1", None));
        assert!(!map.reserve("app.py", "dev-2", None));
        assert_eq!(map.holder("app.py").as_deref(), Some("dev-1"));
    }

    #[test]
    fn release_then_reserve_succeeds() {
        let map = ReservationMap::default();
        assert!(map.reserve("app.py", "dev-1", None));
        assert!(map.release("app.py", "dev-1"));
        assert!(map.reserve("app.py", "dev-2", None));
    }

    #[test]
    fn only_holder_may_release_or_refresh() {
        let map = ReservationMap::default();
        map.reserve("app.py", "dev-1", None);
        assert!(!map.release("app.py", "dev-2"));
        assert!(!map.refresh("app.py", "dev-2"));
        assert!(map.refresh("app.py", "dev-1"));
    }

    #[test]
    fn expired_reservation_can_be_taken_over() {
        let map = ReservationMap::default();
        assert!(map.reserve("app.py", "dev-1", Some(Duration::from_millis(5))));
        std::thread::sleep(Duration::from_millis(20));
        assert!(map.reserve("app.py", "dev-2", None));
        assert_eq!(map.holder("app.py").as_deref(), Some("dev-2"));
    }

    #[test]
    fn holder_can_re_reserve_to_refresh() {
        let map = ReservationMap::default();
        assert!(map.reserve("app.py", "dev-1", None));
        assert!(map.reserve("app.py", "dev-1", None));
    }

    #[test]
    fn release_all_clears_only_that_agent() {
        let map = ReservationMap::default();
        map.reserve("a.py", "dev-1", None);
        map.reserve("b.py", "dev-1", None);
        map.reserve("c.py", "dev-2", None);

        assert_eq!(map.release_all("dev-1"), 2);
        assert!(map.holder("a.py").is_none());
        assert_eq!(map.holder("c.py").as_deref(), Some("dev-2"));
    }

    #[test]
    fn list_skips_expired() {
        let map = ReservationMap::default();
        map.reserve("a.py", "dev-1", Some(Duration::from_millis(5)));
        map.reserve("b.py", "dev-2", None);
        std::thread::sleep(Duration::from_millis(20));

        let live = map.list();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].path, "b.py");
    }
}
