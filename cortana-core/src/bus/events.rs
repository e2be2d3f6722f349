//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    /// Set for bot accounts, including this bot
    pub is_bot: bool,
}

/// The message an inbound message replies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedMessage {
    pub message_id: String,
    pub author_id: String,
    pub content: String,
}

/// Message received from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g. "discord")
    pub channel: String,
    /// Platform id of this message
    pub message_id: String,
    /// Chat/channel identifier
    pub chat_id: String,
    pub author: Author,
    /// Message text content
    pub content: String,
    /// Private one-to-one conversation
    pub is_direct: bool,
    /// User ids mentioned in the message
    pub mentions: Vec<String>,
    pub reference: Option<ReferencedMessage>,
    /// User id of the bot that received the message
    pub bot_id: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a new inbound message in a multi-party chat
    pub fn new(
        channel: impl Into<String>,
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        author: Author,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            author,
            content: content.into(),
            is_direct: false,
            mentions: Vec::new(),
            reference: None,
            bot_id: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Mark the message as coming from a direct-message chat
    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self
    }

    /// Set the receiving bot's user id
    pub fn with_bot_id(mut self, bot_id: impl Into<String>) -> Self {
        self.bot_id = bot_id.into();
        self
    }

    /// Add a mentioned user id
    pub fn with_mention(mut self, user_id: impl Into<String>) -> Self {
        self.mentions.push(user_id.into());
        self
    }

    /// Set the replied-to message
    pub fn with_reference(mut self, reference: ReferencedMessage) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// A file attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat/channel identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Optional message to reply to
    pub reply_to: Option<String>,
    /// Files to attach
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    /// Build a reply to an inbound message
    pub fn reply(to: &InboundMessage, content: impl Into<String>) -> Self {
        Self::new(to.channel.clone(), to.chat_id.clone(), content).reply_to(to.message_id.clone())
    }

    /// Set the reply-to message ID
    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Attach a file
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Nothing to send: no text and no files
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachments.is_empty()
    }
}

/// Anything the core asks a channel to do
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Show a typing indicator while `message_id` is being answered
    Typing {
        channel: String,
        chat_id: String,
        message_id: String,
    },
    /// Drop the typing indicator started for `message_id`
    StopTyping {
        channel: String,
        chat_id: String,
        message_id: String,
    },
    /// Deliver a message
    Message(OutboundMessage),
}

impl OutboundEvent {
    /// Typing indicator for the chat an inbound message came from
    pub fn typing_for(msg: &InboundMessage) -> Self {
        OutboundEvent::Typing {
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            message_id: msg.message_id.clone(),
        }
    }

    pub fn stop_typing_for(msg: &InboundMessage) -> Self {
        OutboundEvent::StopTyping {
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            message_id: msg.message_id.clone(),
        }
    }

    /// Name of the target channel
    pub fn channel(&self) -> &str {
        match self {
            OutboundEvent::Typing { channel, .. } | OutboundEvent::StopTyping { channel, .. } => {
                channel
            }
            OutboundEvent::Message(msg) => &msg.channel,
        }
    }

    /// Target chat within the channel
    pub fn chat_id(&self) -> &str {
        match self {
            OutboundEvent::Typing { chat_id, .. } | OutboundEvent::StopTyping { chat_id, .. } => {
                chat_id
            }
            OutboundEvent::Message(msg) => &msg.chat_id,
        }
    }
}

impl From<OutboundMessage> for OutboundEvent {
    fn from(msg: OutboundMessage) -> Self {
        OutboundEvent::Message(msg)
    }
}
