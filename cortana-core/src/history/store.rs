//! Bounded, per-channel conversation history kept in memory

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One message of a channel's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Display name of the author
    pub user: String,
    /// Message text
    pub content: String,
}

impl HistoryItem {
    /// Create a new history item
    pub fn new(user: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            content: content.into(),
        }
    }

    /// Render as a `user: content` transcript line
    pub fn render(&self) -> String {
        format!("{}: {}", self.user, self.content)
    }
}

/// Render a history as a newline-separated transcript
pub fn render_history(items: &[HistoryItem]) -> String {
    items
        .iter()
        .map(HistoryItem::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Process-wide history keyed by channel id
///
/// Cloning the store shares the underlying map. Each channel keeps at most
/// `limit` items; the oldest item is evicted first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    limit: usize,
    channels: Arc<Mutex<HashMap<String, VecDeque<HistoryItem>>>>,
}

impl HistoryStore {
    /// Create a store keeping at most `limit` items per channel (minimum 1)
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Maximum items kept per channel
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append an item and return the channel history after the append
    pub fn append(&self, channel_id: &str, item: HistoryItem) -> Vec<HistoryItem> {
        let mut channels = self.channels.lock();
        let history = channels.entry(channel_id.to_string()).or_default();
        history.push_back(item);
        while history.len() > self.limit {
            history.pop_front();
        }
        history.iter().cloned().collect()
    }

    /// Current history of a channel, empty if nothing was recorded
    pub fn get(&self, channel_id: &str) -> Vec<HistoryItem> {
        self.channels
            .lock()
            .get(channel_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Reset a channel's history to empty
    pub fn clear(&self, channel_id: &str) {
        self.channels
            .lock()
            .insert(channel_id.to_string(), VecDeque::new());
    }

    /// Number of items recorded for a channel
    pub fn len(&self, channel_id: &str) -> usize {
        self.channels
            .lock()
            .get(channel_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}
