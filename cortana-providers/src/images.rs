//! Image backends and the primary-then-fallback pipeline

use async_trait::async_trait;
use cortana_core::bus::Attachment;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::base::ProviderResult;

/// Image produced by any backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn png(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            mime_type: "image/png".to_string(),
        }
    }

    /// Convert into a chat attachment
    pub fn into_attachment(self) -> Attachment {
        Attachment::new(self.filename, self.mime_type, self.bytes)
    }
}

/// A service that turns a text prompt into an image
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> ProviderResult<GeneratedImage>;
}

/// Diffusion models served by the image worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerModel {
    StableDiffusionXlLightning,
    Dreamshaper8Lcm,
}

impl WorkerModel {
    /// Path segment understood by the worker
    pub fn slug(&self) -> &'static str {
        match self {
            Self::StableDiffusionXlLightning => "stable-diffusion-xl-lightning",
            Self::Dreamshaper8Lcm => "dreamshaper-8-lcm",
        }
    }

    /// Workers AI model identifier
    pub fn workers_ai_id(&self) -> &'static str {
        match self {
            Self::StableDiffusionXlLightning => "@cf/bytedance/stable-diffusion-xl-lightning",
            Self::Dreamshaper8Lcm => "@cf/lykon/dreamshaper-8-lcm",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::all().into_iter().find(|m| m.slug() == slug)
    }

    pub fn all() -> [Self; 2] {
        [Self::StableDiffusionXlLightning, Self::Dreamshaper8Lcm]
    }
}

impl fmt::Display for WorkerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Which backend an explicit request should use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Primary,
    Worker(WorkerModel),
}

/// Primary backend plus worker models, with a configured fallback
pub struct ImagePipeline {
    primary: Arc<dyn ImageBackend>,
    workers: HashMap<WorkerModel, Arc<dyn ImageBackend>>,
    fallback: WorkerModel,
}

impl ImagePipeline {
    pub fn new(primary: Arc<dyn ImageBackend>, fallback: WorkerModel) -> Self {
        Self {
            primary,
            workers: HashMap::new(),
            fallback,
        }
    }

    /// Register the backend serving `model`
    pub fn with_worker(mut self, model: WorkerModel, backend: Arc<dyn ImageBackend>) -> Self {
        self.workers.insert(model, backend);
        self
    }

    pub fn fallback(&self) -> WorkerModel {
        self.fallback
    }

    /// Try the primary backend, then the fallback worker model
    ///
    /// Returns `None` when both fail. The fallback is not called when the
    /// primary succeeds.
    pub async fn generate(&self, prompt: &str) -> Option<GeneratedImage> {
        if let Some(image) = self.generate_with(ImageSource::Primary, prompt).await {
            return Some(image);
        }
        info!("Falling back to worker model {}", self.fallback);
        self.generate_with(ImageSource::Worker(self.fallback), prompt)
            .await
    }

    /// Run a single backend
    pub async fn generate_with(&self, source: ImageSource, prompt: &str) -> Option<GeneratedImage> {
        let backend = match source {
            ImageSource::Primary => &self.primary,
            ImageSource::Worker(model) => match self.workers.get(&model) {
                Some(backend) => backend,
                None => {
                    warn!("No image backend registered for worker model {}", model);
                    return None;
                }
            },
        };

        match backend.generate(prompt).await {
            Ok(image) => {
                info!(
                    "Generated image via {} ({} bytes)",
                    backend.name(),
                    image.bytes.len()
                );
                Some(image)
            }
            Err(e) => {
                warn!("Image generation via {} failed: {}", backend.name(), e);
                None
            }
        }
    }
}
