//! Fallback image backend talking to the diffusion-model worker

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::base::{ProviderError, ProviderResult};
use crate::images::{GeneratedImage, ImageBackend, WorkerModel};

/// Client for one model served by the image worker
pub struct WorkerImageClient {
    client: Client,
    endpoint: String,
    model: WorkerModel,
    name: String,
}

impl WorkerImageClient {
    /// `endpoint` is the worker's generate URL; the model slug is appended
    pub fn new(endpoint: impl Into<String>, model: WorkerModel) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model,
            name: format!("worker:{}", model.slug()),
        }
    }

    fn url(&self) -> String {
        format!("{}/{}", self.endpoint, self.model.slug())
    }
}

#[async_trait]
impl ImageBackend for WorkerImageClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> ProviderResult<GeneratedImage> {
        let url = self.url();
        debug!("Requesting image from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if status != reqwest::StatusCode::OK || !content_type.contains("image") {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                body: format!("unexpected worker response ({}): {}", content_type, body),
            });
        }

        let bytes = response.bytes().await?;
        Ok(GeneratedImage::png(bytes.to_vec(), "sd_image.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_generate_posts_prompt_to_model_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate/dreamshaper-8-lcm")
            .match_body(Matcher::Json(json!({"prompt": "a lighthouse"})))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"\x89PNGfake")
            .create_async()
            .await;

        let client = WorkerImageClient::new(
            format!("{}/generate/", server.url()),
            WorkerModel::Dreamshaper8Lcm,
        );
        let image = client.generate("a lighthouse").await.unwrap();

        mock.assert_async().await;
        assert_eq!(image.bytes, b"\x89PNGfake");
        assert_eq!(image.filename, "sd_image.png");
        assert_eq!(client.name(), "worker:dreamshaper-8-lcm");
    }

    #[tokio::test]
    async fn test_non_image_response_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/stable-diffusion-xl-lightning")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("Error processing request.")
            .create_async()
            .await;

        let client = WorkerImageClient::new(server.url(), WorkerModel::StableDiffusionXlLightning);
        assert!(client.generate("x").await.is_err());
    }

    #[tokio::test]
    async fn test_non_200_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/stable-diffusion-xl-lightning")
            .with_status(500)
            .with_header("content-type", "image/png")
            .with_body("oops")
            .create_async()
            .await;

        let client = WorkerImageClient::new(server.url(), WorkerModel::StableDiffusionXlLightning);
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 500, .. }));
    }
}
