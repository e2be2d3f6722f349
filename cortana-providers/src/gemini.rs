//! Gemini `generateContent` image backend

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cortana_core::utils::safe_filename;
use image::ImageFormat;
use reqwest::Client;
use serde_json::{json, Value};
use std::io::Cursor;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::base::{ProviderError, ProviderResult};
use crate::images::{GeneratedImage, ImageBackend};

/// Reference image sent alongside every prompt
#[derive(Debug, Clone)]
struct ReferenceImage {
    mime_type: String,
    data: String,
}

/// Primary image backend using Gemini's multimodal generation
pub struct GeminiImageClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    reference_url: Option<String>,
    reference: OnceCell<ReferenceImage>,
}

impl GeminiImageClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        reference_url: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            reference_url: reference_url.filter(|u| !u.trim().is_empty()),
            reference: OnceCell::new(),
        }
    }

    pub fn from_config(config: &cortana_core::config::Config) -> Self {
        Self::new(
            config.gemini.api_key.clone(),
            config.gemini.api_base.clone(),
            config.gemini.model.clone(),
            config.persona.reference_image_url.clone(),
        )
    }

    /// Download the reference image once; failures are retried on the next call
    async fn reference_image(&self) -> ProviderResult<Option<&ReferenceImage>> {
        let Some(url) = self.reference_url.as_deref() else {
            return Ok(None);
        };

        let image = self
            .reference
            .get_or_try_init(|| async {
                debug!("Downloading reference image from {}", url);
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ProviderError::ApiError {
                        status: status.as_u16(),
                        body: format!("reference image download from {} failed", url),
                    });
                }
                let mime_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| v.starts_with("image/"))
                    .unwrap_or("image/jpeg")
                    .to_string();
                let bytes = response.bytes().await?;
                Ok(ReferenceImage {
                    mime_type,
                    data: STANDARD.encode(&bytes),
                })
            })
            .await?;

        Ok(Some(image))
    }

    fn build_request(prompt: &str, reference: Option<&ReferenceImage>) -> Value {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(reference) = reference {
            parts.push(json!({
                "inlineData": {
                    "mimeType": reference.mime_type,
                    "data": reference.data,
                }
            }));
        }

        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"]
            }
        })
    }
}

/// First inline image payload among the response candidates
fn find_inline_data(body: &Value) -> Option<&str> {
    body.get("candidates")?
        .as_array()?
        .iter()
        .filter_map(|candidate| candidate.pointer("/content/parts")?.as_array())
        .flatten()
        .filter_map(|part| part.get("inlineData").or_else(|| part.get("inline_data")))
        .filter_map(|inline| inline.get("data")?.as_str())
        .find(|data| !data.is_empty())
}

/// Decode a base64 image of any supported format and re-encode it as PNG
fn to_png(data: &str) -> ProviderResult<Vec<u8>> {
    let raw = STANDARD
        .decode(data.trim())
        .map_err(|e| ProviderError::ImageError(format!("invalid base64 image data: {}", e)))?;
    let decoded = image::load_from_memory(&raw)
        .map_err(|e| ProviderError::ImageError(format!("undecodable image: {}", e)))?;

    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ProviderError::ImageError(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

fn filename_for(prompt: &str) -> String {
    let stem: String = prompt.trim().chars().take(48).collect();
    if stem.is_empty() {
        "image.png".to_string()
    } else {
        format!("{}.png", safe_filename(&stem))
    }
}

#[async_trait]
impl ImageBackend for GeminiImageClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> ProviderResult<GeneratedImage> {
        let reference = self.reference_image().await?;
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);

        debug!("Requesting image from {}", url);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(prompt, reference))
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
        let data = find_inline_data(&body).ok_or_else(|| {
            ProviderError::InvalidResponse("no inline image data in response".to_string())
        })?;

        Ok(GeneratedImage::png(to_png(data)?, filename_for(prompt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use mockito::Matcher;

    const MODEL: &str = "gemini-2.0-flash-preview-image-generation";

    fn encoded_image(format: ImageFormat) -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        STANDARD.encode(buf.into_inner())
    }

    fn response_with(part: Value) -> String {
        json!({
            "candidates": [{
                "content": {"parts": [{"text": "here you go"}, part]}
            }]
        })
        .to_string()
    }

    #[test]
    fn test_find_inline_data_accepts_both_casings() {
        let camel: Value = serde_json::from_str(&response_with(
            json!({"inlineData": {"mimeType": "image/png", "data": "abc"}}),
        ))
        .unwrap();
        assert_eq!(find_inline_data(&camel), Some("abc"));

        let snake: Value =
            serde_json::from_str(&response_with(json!({"inline_data": {"data": "xyz"}}))).unwrap();
        assert_eq!(find_inline_data(&snake), Some("xyz"));

        let none: Value = serde_json::from_str(&response_with(json!({"text": "no"}))).unwrap();
        assert_eq!(find_inline_data(&none), None);
    }

    #[test]
    fn test_filename_for() {
        assert_eq!(filename_for("a cat on a roof"), "a_cat_on_a_roof.png");
        assert_eq!(filename_for("   "), "image.png");
        let long = "x".repeat(100);
        assert_eq!(filename_for(&long), format!("{}.png", "x".repeat(48)));
    }

    #[test]
    fn test_to_png_rejects_garbage() {
        assert!(matches!(to_png("%%%"), Err(ProviderError::ImageError(_))));
        assert!(matches!(
            to_png(&STANDARD.encode(b"not an image")),
            Err(ProviderError::ImageError(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_reencodes_to_png() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("/models/{}:generateContent", MODEL).as_str())
            .match_header("x-goog-api-key", "g-key")
            .match_body(Matcher::PartialJson(json!({
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            })))
            .with_status(200)
            .with_body(response_with(json!({
                "inlineData": {"mimeType": "image/jpeg", "data": encoded_image(ImageFormat::Jpeg)}
            })))
            .create_async()
            .await;

        let client = GeminiImageClient::new("g-key", server.url(), MODEL, None);
        let image = client.generate("a sunset").await.unwrap();

        mock.assert_async().await;
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.filename, "a_sunset.png");
        assert_eq!(
            image::guess_format(&image.bytes).unwrap(),
            ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn test_reference_image_downloaded_once() {
        let mut server = mockito::Server::new_async().await;
        let reference = server
            .mock("GET", "/ref.jpg")
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(b"jpegbytes")
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", format!("/models/{}:generateContent", MODEL).as_str())
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"parts": [
                    {"text": "me"},
                    {"inlineData": {"mimeType": "image/jpeg", "data": STANDARD.encode(b"jpegbytes")}}
                ]}]
            })))
            .with_status(200)
            .with_body(response_with(json!({
                "inlineData": {"data": encoded_image(ImageFormat::Png)}
            })))
            .expect(2)
            .create_async()
            .await;

        let client = GeminiImageClient::new(
            "g-key",
            server.url(),
            MODEL,
            Some(format!("{}/ref.jpg", server.url())),
        );
        client.generate("me").await.unwrap();
        client.generate("me").await.unwrap();

        reference.assert_async().await;
    }

    #[tokio::test]
    async fn test_response_without_image_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(response_with(json!({"text": "I can't draw that"})))
            .create_async()
            .await;

        let client = GeminiImageClient::new("g-key", server.url(), MODEL, None);
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Any)
            .with_status(400)
            .with_body("bad key")
            .create_async()
            .await;

        let client = GeminiImageClient::new("g-key", server.url(), MODEL, None);
        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status: 400, .. }));
    }
}
