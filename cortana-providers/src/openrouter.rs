//! OpenRouter chat-completion client

use async_trait::async_trait;
use cortana_core::utils::preview;
use cortana_core::HistoryItem;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::base::{
    AIReply, ConversationModel, IntentResponse, KeyInfo, Message, ProviderError, ProviderResult,
};
use crate::persona::{intent_schema, reply_schema, Persona};

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    response_format: Value,
}

/// `GET /auth/key` response envelope
#[derive(Debug, Deserialize)]
struct KeyInfoEnvelope {
    data: KeyInfo,
}

/// OpenRouter provider client
pub struct OpenRouterClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    intent_model: Option<String>,
    persona: Persona,
}

impl OpenRouterClient {
    /// Create a new client
    ///
    /// No request timeout is configured; slow completions are awaited.
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        intent_model: Option<String>,
        persona: Persona,
    ) -> Self {
        Self {
            client: Client::builder()
                .http1_only()
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            intent_model: intent_model.filter(|m| !m.trim().is_empty()),
            persona,
        }
    }

    /// Build from the `openrouter` and `persona` config sections
    pub fn from_config(config: &cortana_core::config::Config) -> Self {
        Self::new(
            config.openrouter.api_key.clone(),
            config.openrouter.api_base.clone(),
            config.openrouter.model.clone(),
            config.openrouter.intent_model.clone(),
            Persona::from_config(&config.persona),
        )
    }

    /// Run a chat completion whose message content is JSON matching `T`
    async fn complete_json<T: DeserializeOwned>(
        &self,
        model: &str,
        messages: Vec<Message>,
        response_format: Value,
    ) -> ProviderResult<T> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatCompletionRequest {
            model,
            messages,
            response_format,
        };

        debug!("Sending chat completion to {} (model {})", url, model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let content = extract_content(&body)?;
        debug!("Model output: {}", preview(content, 200));

        serde_json::from_str(content).map_err(|e| ProviderError::MalformedContent {
            reason: e.to_string(),
            content: content.to_string(),
        })
    }
}

/// Pull `choices[0].message.content` out of a completion response
fn extract_content(body: &Value) -> ProviderResult<&str> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

    choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProviderError::InvalidResponse("choices[0].message.content is not a string".to_string())
        })
}

#[async_trait]
impl ConversationModel for OpenRouterClient {
    async fn reply(&self, history: &[HistoryItem], prompt: &str) -> ProviderResult<AIReply> {
        let messages = self.persona.build_messages(history, prompt);
        self.complete_json(&self.model, messages, reply_schema())
            .await
    }

    async fn intent(&self, prompt: &str, history_text: &str) -> ProviderResult<IntentResponse> {
        let model = self.intent_model.as_deref().ok_or_else(|| {
            ProviderError::ConfigError("no intent model configured".to_string())
        })?;
        let messages = self.persona.build_intent_messages(prompt, history_text);
        self.complete_json(model, messages, intent_schema()).await
    }

    fn classifies_intent(&self) -> bool {
        self.intent_model.is_some()
    }

    async fn key_info(&self) -> ProviderResult<KeyInfo> {
        let url = format!("{}/auth/key", self.api_base);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: KeyInfoEnvelope = response.json().await?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn completion(content: &str) -> String {
        json!({
            "id": "gen-1",
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    fn client(base: String, intent: Option<&str>) -> OpenRouterClient {
        OpenRouterClient::new(
            "sk-or-test",
            base,
            "meta-llama/llama-4-maverick",
            intent.map(str::to_string),
            Persona::default(),
        )
    }

    #[tokio::test]
    async fn test_reply_parses_structured_output() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-or-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "meta-llama/llama-4-maverick",
                "response_format": {"type": "json_schema"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(r#"{"message":"not much, you?"}"#))
            .create_async()
            .await;

        let reply = client(server.url(), None)
            .reply(&[], "hey, what's up")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.message, "not much, you?");
        assert_eq!(reply.image_description(), None);
    }

    #[tokio::test]
    async fn test_reply_sends_three_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": "No previous messages."},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .with_status(200)
            .with_body(completion(r#"{"message":"hi","description":"a wave"}"#))
            .create_async()
            .await;

        let reply = client(server.url(), None).reply(&[], "hello").await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply.image_description(), Some("a wave"));
    }

    #[tokio::test]
    async fn test_malformed_content_is_distinct() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion("sure! here you go"))
            .create_async()
            .await;

        let err = client(server.url(), None).reply(&[], "hi").await.unwrap_err();
        match err {
            ProviderError::MalformedContent { content, .. } => {
                assert_eq!(content, "sure! here you go")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":null}}]}"#)
            .create_async()
            .await;

        let err = client(server.url(), None).reply(&[], "hi").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_http_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(402)
            .with_body("insufficient credits")
            .create_async()
            .await;

        let err = client(server.url(), None).reply(&[], "hi").await.unwrap_err();
        match err {
            ProviderError::ApiError { status, body } => {
                assert_eq!(status, 402);
                assert_eq!(body, "insufficient credits");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_intent_uses_intent_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "model": "meta-llama/llama-4-scout"
            })))
            .with_status(200)
            .with_body(completion(r#"{"image":true,"description":"a red fox"}"#))
            .create_async()
            .await;

        let client = client(server.url(), Some("meta-llama/llama-4-scout"));
        assert!(client.classifies_intent());
        let intent = client.intent("draw me a fox", "").await.unwrap();

        mock.assert_async().await;
        assert!(intent.image);
        assert_eq!(intent.description, "a red fox");
    }

    #[tokio::test]
    async fn test_intent_without_model_is_config_error() {
        let client = client("http://127.0.0.1:9".to_string(), None);
        assert!(!client.classifies_intent());
        let err = client.intent("hi", "").await.unwrap_err();
        assert!(matches!(err, ProviderError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_key_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/auth/key")
            .match_header("authorization", "Bearer sk-or-test")
            .with_status(200)
            .with_body(
                r#"{"data":{"label":"sk-or-v1-abc","usage":1.25,"limit":5,"is_free_tier":false}}"#,
            )
            .create_async()
            .await;

        let info = client(server.url(), None).key_info().await.unwrap();
        assert_eq!(info.label, "sk-or-v1-abc");
        assert_eq!(info.remaining(), Some(3.75));
        assert!(!info.is_free_tier);
    }
}
