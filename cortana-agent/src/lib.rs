//! Message routing for cortana
//!
//! The router classifies each inbound chat message, keeps the per-channel
//! history, runs `!` commands, and turns persona replies into outbound
//! messages with optional generated images.

pub mod commands;
pub mod router;

pub use commands::Command;
pub use router::{MessageRouter, Route, RouterError};
