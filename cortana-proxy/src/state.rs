use crate::workers_ai::ImageModelRunner;
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn ImageModelRunner>,
}

impl AppState {
    pub fn new(runner: Arc<dyn ImageModelRunner>) -> Self {
        Self { runner }
    }
}
