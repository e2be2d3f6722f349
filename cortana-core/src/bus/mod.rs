//! Message bus for decoupled communication
//!
//! The message bus provides a dual-queue system for inbound messages and
//! outbound events, decoupling the chat channel from the router.

pub mod events;
pub mod queue;

pub use events::{
    Attachment, Author, InboundMessage, OutboundEvent, OutboundMessage, ReferencedMessage,
};
pub use queue::MessageBus;
