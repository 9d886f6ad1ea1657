use roleplay_core::{SessionRegistry, SpeechClient};
use std::sync::Arc;

/// Shared by every handler; cloning only bumps the reference counts.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub speech: Arc<SpeechClient>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, speech: SpeechClient) -> Self {
        Self {
            registry,
            speech: Arc::new(speech),
        }
    }
}
