//! Shared provider types and the conversation-model trait

use async_trait::async_trait;
use cortana_core::HistoryItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The outer response envelope did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The model's own output could not be parsed as the requested JSON
    #[error("Malformed model output ({reason}): {content}")]
    MalformedContent { reason: String, content: String },

    #[error("API error: HTTP {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// A message in the chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Structured persona reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AIReply {
    /// Conversational reply text
    #[serde(alias = "caption", default)]
    pub message: String,
    /// Image prompt, present only when an image is warranted
    #[serde(default)]
    pub description: Option<String>,
}

impl AIReply {
    /// The image description, if present and not blank
    pub fn image_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Result of the image-intent classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResponse {
    pub image: bool,
    #[serde(default)]
    pub description: String,
}

/// API-key usage as reported by OpenRouter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub usage: f64,
    /// `None` means the key has no credit limit
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub is_free_tier: bool,
}

impl KeyInfo {
    /// Remaining credits, or `None` when unlimited
    pub fn remaining(&self) -> Option<f64> {
        self.limit.map(|limit| limit - self.usage)
    }
}

/// Conversation model used by the router
#[async_trait]
pub trait ConversationModel: Send + Sync {
    /// Persona reply to `prompt`, with `history` as context (oldest first,
    /// not including the current message)
    async fn reply(&self, history: &[HistoryItem], prompt: &str) -> ProviderResult<AIReply>;

    /// Classify whether `prompt` asks for an image
    async fn intent(&self, prompt: &str, history_text: &str) -> ProviderResult<IntentResponse>;

    /// Whether [`ConversationModel::intent`] should be consulted
    fn classifies_intent(&self) -> bool;

    /// Usage and limit of the API key
    async fn key_info(&self) -> ProviderResult<KeyInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_accepts_caption_alias() {
        let reply: AIReply =
            serde_json::from_str(r#"{"caption":"omg hi","description":"a selfie"}"#).unwrap();
        assert_eq!(reply.message, "omg hi");
        assert_eq!(reply.image_description(), Some("a selfie"));
    }

    #[test]
    fn test_reply_blank_description_is_absent() {
        let reply: AIReply =
            serde_json::from_str(r#"{"message":"sure","description":"   "}"#).unwrap();
        assert_eq!(reply.image_description(), None);

        let reply: AIReply = serde_json::from_str(r#"{"message":"sure"}"#).unwrap();
        assert_eq!(reply.image_description(), None);
    }

    #[test]
    fn test_key_info_remaining() {
        let limited = KeyInfo {
            label: "main".to_string(),
            usage: 2.5,
            limit: Some(10.0),
            is_free_tier: false,
        };
        assert_eq!(limited.remaining(), Some(7.5));

        let unlimited: KeyInfo =
            serde_json::from_str(r#"{"label":"x","usage":1,"limit":null,"is_free_tier":true}"#)
                .unwrap();
        assert_eq!(unlimited.remaining(), None);
    }

    #[test]
    fn test_message_roles() {
        assert_eq!(Message::system("s").role, "system");
        assert_eq!(Message::user("u").role, "user");
    }
}
