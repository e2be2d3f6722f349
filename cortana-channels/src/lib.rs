//! Chat platform integration for cortana
//!
//! Discord is the only platform: inbound messages arrive over the Gateway
//! WebSocket, replies and typing indicators go out over the REST API.

pub mod base;
pub mod common;
pub mod discord;

pub use base::{ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
pub use discord::DiscordHandler;
