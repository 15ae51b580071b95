//! Bounded "go back" history of visited states.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity ring buffer of state ids. The oldest entry is dropped when
/// a push would exceed the capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HistoryRepr", into = "HistoryRepr")]
pub struct StateHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

#[derive(Serialize, Deserialize)]
struct HistoryRepr {
    #[serde(default)]
    entries: Vec<String>,
    #[serde(default = "default_capacity")]
    capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl From<HistoryRepr> for StateHistory {
    fn from(repr: HistoryRepr) -> Self {
        // Persisted data may come from an older, larger capacity.
        let mut history = StateHistory::with_capacity(repr.capacity);
        for entry in repr.entries {
            history.push(entry);
        }
        history
    }
}

impl From<StateHistory> for HistoryRepr {
    fn from(history: StateHistory) -> Self {
        HistoryRepr {
            entries: history.entries.into_iter().collect(),
            capacity: history.capacity,
        }
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl StateHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, state_id: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(state_id.into());
    }

    /// Remove and return the most recently vacated state.
    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop_back()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_beyond_capacity_drops_oldest() {
        let mut history = StateHistory::with_capacity(3);
        for id in ["a", "b", "c", "d", "e"] {
            history.push(id);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["c", "d", "e"]);
        assert_eq!(history.pop().as_deref(), Some("e"));
        assert_eq!(history.last(), Some("d"));
    }

    #[test]
    fn test_deserialize_enforces_capacity() {
        let json = r#"{"entries":["s1","s2","s3","s4"],"capacity":2}"#;
        let history: StateHistory = serde_json::from_str(json).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["s3", "s4"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = StateHistory::with_capacity(0);
        history.push("only");
        history.push("latest");
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.last(), Some("latest"));
    }
}
