//! Conversation history
//!
//! Histories live only in memory and are lost on restart.

pub mod store;

pub use store::{render_history, HistoryItem, HistoryStore};
