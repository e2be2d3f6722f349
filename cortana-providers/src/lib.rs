//! Upstream service clients for cortana
//!
//! The conversation model (OpenRouter chat completions) and the two image
//! backends (Gemini and the diffusion worker) live here, behind the
//! [`ConversationModel`] and [`ImageBackend`] traits.

pub mod base;
pub mod gemini;
pub mod images;
pub mod openrouter;
pub mod persona;
pub mod worker;

pub use base::{
    AIReply, ConversationModel, IntentResponse, KeyInfo, Message, ProviderError, ProviderResult,
};
pub use gemini::GeminiImageClient;
pub use images::{GeneratedImage, ImageBackend, ImagePipeline, ImageSource, WorkerModel};
pub use openrouter::OpenRouterClient;
pub use persona::Persona;
pub use worker::WorkerImageClient;
