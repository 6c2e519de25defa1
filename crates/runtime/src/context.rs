//! Conversation window management.
//!
//! Keeps an agent's history inside the model's context budget: the first
//! entry (mission setup) always survives, the most recent entries fill the
//! remaining budget, and everything between is elided behind a marker.

use serde::{Deserialize, Serialize};

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Model,
            content: content.into(),
        }
    }
}

/// Rough token count estimation.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Trim history to fit `max_tokens`, keeping the head entry plus as many
/// recent entries as fit, with an elision marker in between.
pub fn trim_messages(messages: &[HistoryEntry], max_tokens: usize) -> Vec<HistoryEntry> {
    if messages.is_empty() {
        return Vec::new();
    }

    let total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if total <= max_tokens {
        return messages.to_vec();
    }

    let head = messages[0].clone();
    let mut budget = max_tokens.saturating_sub(estimate_tokens(&head.content));

    let mut recent_rev = Vec::new();
    for msg in messages[1..].iter().rev() {
        let cost = estimate_tokens(&msg.content);
        if cost > budget {
            break;
        }
        recent_rev.push(msg.clone());
        budget -= cost;
    }

    let trimmed_count = messages.len() - 1 - recent_rev.len();
    let mut result = vec![head];
    if trimmed_count > 0 {
        result.push(HistoryEntry::user(format!(
            "[System: {trimmed_count} earlier messages summarized, focus on recent context]"
        )));
    }
    result.extend(recent_rev.into_iter().rev());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(len: usize) -> HistoryEntry {
        HistoryEntry::user("x".repeat(len))
    }

    #[test]
    fn under_budget_is_untouched() {
        let messages = vec![entry(40), entry(40), entry(40)];
        let trimmed = trim_messages(&messages, 1000);
        assert_eq!(trimmed.len(), 3);
    }

    #[test]
    fn keeps_head_and_recent_tail() {
        // Each entry ~25 tokens; budget fits the head plus two more.
        let mut messages: Vec<HistoryEntry> = (0..10).map(|_| entry(100)).collect();
        messages[0].content = format!("HEAD {}", "x".repeat(95));
        messages[9].content = format!("TAIL {}", "x".repeat(95));

        let trimmed = trim_messages(&messages, 80);
        assert!(trimmed[0].content.starts_with("HEAD"));
        assert!(trimmed[1].content.contains("earlier messages summarized"));
        assert!(trimmed.last().unwrap().content.starts_with("TAIL"));
        assert!(trimmed.len() < messages.len());
    }

    #[test]
    fn ordering_of_survivors_is_preserved() {
        let messages: Vec<HistoryEntry> = (0..6)
            .map(|i| HistoryEntry::user(format!("m{i}-{}", "x".repeat(40))))
            .collect();
        let trimmed = trim_messages(&messages, 40);
        let tail: Vec<&str> = trimmed[2..]
            .iter()
            .map(|m| m.content.split('-').next().unwrap())
            .collect();
        let mut sorted = tail.clone();
        sorted.sort();
        assert_eq!(tail, sorted);
    }

    #[test]
    fn empty_history_stays_empty() {
        assert!(trim_messages(&[], 100).is_empty());
    }
}
