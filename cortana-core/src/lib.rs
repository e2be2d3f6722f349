//! Core types and traits for cortana
//!
//! This crate provides the configuration, logging, message bus and
//! conversation history shared by every other cortana component.

pub mod bus;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod utils;

pub use error::{Error, Result};
pub use history::{HistoryItem, HistoryStore};
