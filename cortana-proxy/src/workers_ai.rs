//! Cloudflare Workers AI text-to-image client

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cortana_core::config::ProxyConfig;
use cortana_providers::WorkerModel;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ProxyError, Result};

/// Runs a diffusion model and returns the image bytes
#[async_trait]
pub trait ImageModelRunner: Send + Sync {
    async fn run(&self, model: WorkerModel, prompt: &str) -> Result<Vec<u8>>;
}

/// Workers AI REST client
pub struct WorkersAiClient {
    client: Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

impl WorkersAiClient {
    pub fn new(
        api_base: impl Into<String>,
        account_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.api_base.clone(),
            config.account_id.clone(),
            config.api_token.clone(),
        )
    }

    fn run_url(&self, model: WorkerModel) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.api_base,
            self.account_id,
            model.workers_ai_id()
        )
    }
}

/// Image bytes from a JSON `{"result": {"image": "<base64>"}}` envelope
fn image_from_envelope(body: &Value) -> Result<Vec<u8>> {
    let encoded = body
        .pointer("/result/image")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::InvalidResponse("no image in JSON response".to_string()))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| ProxyError::InvalidResponse(format!("invalid base64 image: {}", e)))
}

#[async_trait]
impl ImageModelRunner for WorkersAiClient {
    async fn run(&self, model: WorkerModel, prompt: &str) -> Result<Vec<u8>> {
        let url = self.run_url(model);
        debug!("Running {} on Workers AI", model.workers_ai_id());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));

        if is_json {
            let body: Value = response.json().await?;
            return image_from_envelope(&body);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_run_returns_raw_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/accounts/acc-1/ai/run/@cf/bytedance/stable-diffusion-xl-lightning",
            )
            .match_header("authorization", "Bearer cf-token")
            .match_body(Matcher::Json(json!({"prompt": "a forest"})))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"PNGBYTES")
            .create_async()
            .await;

        let client = WorkersAiClient::new(server.url(), "acc-1", "cf-token");
        let bytes = client
            .run(WorkerModel::StableDiffusionXlLightning, "a forest")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, b"PNGBYTES");
    }

    #[tokio::test]
    async fn test_run_decodes_json_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/accounts/acc-1/ai/run/@cf/lykon/dreamshaper-8-lcm")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"result": {"image": STANDARD.encode(b"IMG")}, "success": true}).to_string())
            .create_async()
            .await;

        let client = WorkersAiClient::new(server.url(), "acc-1", "cf-token");
        let bytes = client
            .run(WorkerModel::Dreamshaper8Lcm, "x")
            .await
            .unwrap();
        assert_eq!(bytes, b"IMG");
    }

    #[tokio::test]
    async fn test_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(403)
            .with_body(r#"{"success":false,"errors":[{"message":"Authentication error"}]}"#)
            .create_async()
            .await;

        let client = WorkersAiClient::new(server.url(), "acc-1", "bad");
        let err = client
            .run(WorkerModel::Dreamshaper8Lcm, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Upstream { status: 403, .. }));
    }
}
