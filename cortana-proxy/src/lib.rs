//! Image proxy for the fallback worker
//!
//! Exposes `POST /generate/<model>` taking `{"prompt": "..."}` and answering
//! with raw PNG bytes produced by Cloudflare Workers AI.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod workers_ai;

pub use error::{ProxyError, Result};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use workers_ai::{ImageModelRunner, WorkersAiClient};
