//! Human-approval request/response plumbing.
//!
//! Each pending request is a oneshot channel keyed by approval id. The
//! requesting agent awaits the receiver under a timeout; timing out counts
//! as rejection and reclaims the entry. An external actor (API handler, UI)
//! resolves requests by id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ApprovalBroker {
    /// Register a pending request and get the receiver the requester will
    /// await.
    pub fn register(&self, approval_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(approval_id.to_string(), tx);
        rx
    }

    /// Resolve a pending request. Returns false when the id is unknown
    /// (already resolved, timed out, or never existed).
    pub fn resolve(&self, approval_id: &str, approved: bool) -> bool {
        match self.pending.lock().remove(approval_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Await a registered request for at most `timeout`. Timeout and a
    /// dropped sender both resolve to "not approved".
    pub async fn wait(
        &self,
        approval_id: &str,
        rx: oneshot::Receiver<bool>,
        timeout: Duration,
    ) -> bool {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => {
                warn!(approval = %approval_id, "Approval channel dropped, treating as rejected");
                false
            }
            Err(_) => {
                warn!(
                    approval = %approval_id,
                    timeout_secs = timeout.as_secs(),
                    "Approval timed out, treating as rejected"
                );
                self.pending.lock().remove(approval_id);
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn approve_resolves_waiter() {
        let broker = Arc::new(ApprovalBroker::default());
        let rx = broker.register("ap-1");

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait("ap-1", rx, Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        assert!(broker.resolve("ap-1", true));
        assert!(waiter.await.unwrap());
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn reject_resolves_false() {
        let broker = ApprovalBroker::default();
        let rx = broker.register("ap-2");
        broker.resolve("ap-2", false);
        assert!(!broker.wait("ap-2", rx, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn timeout_is_rejection_and_reclaims_entry() {
        let broker = ApprovalBroker::default();
        let rx = broker.register("ap-3");
        let approved = broker.wait("ap-3", rx, Duration::from_millis(20)).await;
        assert!(!approved);
        assert_eq!(broker.pending_count(), 0);
        // Late resolution finds nothing.
        assert!(!broker.resolve("ap-3", true));
    }

    #[tokio::test]
    async fn unknown_id_resolution_is_false() {
        let broker = ApprovalBroker::default();
        assert!(!broker.resolve("ghost", true));
    }
}
