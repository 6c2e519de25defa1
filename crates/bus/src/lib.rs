//! In-memory pub/sub for inter-agent communication.
//!
//! Every published message lands in a bounded rolling history and is
//! delivered to each subscribed agent's mailbox, except the sender's.
//! Messages carrying mentions only reach the mentioned agents, unless the
//! type is on the broadcast allowlist (system notices, agent status, task
//! assignments). Delivery never blocks the publisher: mailboxes are bounded
//! and overflow drops the message with a warning.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use swarm_common::{Message, MessageType};
use tracing::{debug, warn};

const DEFAULT_HISTORY: usize = 500;
const DEFAULT_MAILBOX: usize = 256;
/// Capacity of the external observer feed (UI relays etc).
const WATCH_CAPACITY: usize = 512;

/// Receiving half of an agent's mailbox.
pub type Mailbox = tokio::sync::mpsc::Receiver<Message>;

struct BusState {
    mailboxes: HashMap<String, tokio::sync::mpsc::Sender<Message>>,
    history: VecDeque<Message>,
}

/// The shared message bus. One instance per mission.
pub struct MessageBus {
    state: Mutex<BusState>,
    watchers: tokio::sync::broadcast::Sender<Message>,
    max_history: usize,
    mailbox_capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY, DEFAULT_MAILBOX)
    }
}

impl MessageBus {
    pub fn new(max_history: usize, mailbox_capacity: usize) -> Self {
        let (watchers, _) = tokio::sync::broadcast::channel(WATCH_CAPACITY);
        Self {
            state: Mutex::new(BusState {
                mailboxes: HashMap::new(),
                history: VecDeque::with_capacity(max_history),
            }),
            watchers,
            max_history,
            mailbox_capacity,
        }
    }

    /// Create a mailbox for an agent. A second subscribe for the same id
    /// replaces the previous mailbox.
    pub fn subscribe(&self, agent_id: impl Into<String>) -> Mailbox {
        let (tx, rx) = tokio::sync::mpsc::channel(self.mailbox_capacity);
        self.state.lock().mailboxes.insert(agent_id.into(), tx);
        rx
    }

    /// Remove an agent's mailbox.
    pub fn unsubscribe(&self, agent_id: &str) {
        self.state.lock().mailboxes.remove(agent_id);
    }

    /// Tap the full message stream, regardless of mentions. For observers
    /// outside the core (e.g. a UI relay); lagging receivers miss messages
    /// rather than slowing the bus down.
    pub fn watch_all(&self) -> tokio::sync::broadcast::Receiver<Message> {
        self.watchers.subscribe()
    }

    /// Publish a message: append to history, fan out to mailboxes (skipping
    /// the sender, honoring mentions), and feed external watchers.
    pub fn publish(&self, message: Message) -> Message {
        debug!(
            sender = %message.sender,
            msg_type = ?message.msg_type,
            "Publishing message"
        );

        {
            let mut state = self.state.lock();
            state.history.push_back(message.clone());
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }

            for (agent_id, tx) in &state.mailboxes {
                if agent_id == &message.sender {
                    continue;
                }
                if !message.mentions.is_empty()
                    && !message.mentions.iter().any(|m| m == agent_id)
                    && !message.msg_type.is_broadcast()
                {
                    continue;
                }
                if tx.try_send(message.clone()).is_err() {
                    warn!(agent = %agent_id, "Mailbox full, dropping message");
                }
            }
        }

        // No watchers is fine; broadcast::send errs only when empty.
        let _ = self.watchers.send(message.clone());
        message
    }

    /// Convenience: build and publish in one call.
    pub fn send(
        &self,
        sender: &str,
        sender_role: &str,
        msg_type: MessageType,
        content: impl Into<String>,
    ) -> Message {
        self.publish(Message::new(sender, sender_role, msg_type, content))
    }

    /// Recent history, optionally filtered by channel and/or type, newest
    /// last, capped at `limit`.
    pub fn history(
        &self,
        channel: Option<&str>,
        msg_type: Option<MessageType>,
        limit: usize,
    ) -> Vec<Message> {
        let state = self.state.lock();
        let filtered: Vec<&Message> = state
            .history
            .iter()
            .filter(|m| channel.is_none_or(|c| m.channel == c))
            .filter(|m| msg_type.is_none_or(|t| m.msg_type == t))
            .collect();
        filtered
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// History relevant to one agent: messages it sent, was mentioned in,
    /// or that were unaddressed.
    pub fn agent_messages(&self, agent_id: &str, limit: usize) -> Vec<Message> {
        let state = self.state.lock();
        let filtered: Vec<&Message> = state
            .history
            .iter()
            .filter(|m| {
                m.sender == agent_id
                    || m.mentions.iter().any(|x| x == agent_id)
                    || m.mentions.is_empty()
            })
            .collect();
        filtered
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().mailboxes.len()
    }

    /// Ids of all currently subscribed agents, sorted for stable output.
    pub fn subscribers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().mailboxes.keys().cloned().collect();
        ids.sort();
        ids
    }
}
