use std::sync::Arc;

use crate::runtime::RuntimeRegistry;
use crate::training::TrainingDriver;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RuntimeRegistry>,
    pub driver: Arc<TrainingDriver>,
    /// Which provider backs the chat slot, for the health report.
    pub chat_provider: String,
}

impl AppState {
    pub fn new(registry: Arc<RuntimeRegistry>, chat_provider: String) -> Self {
        let driver = Arc::new(TrainingDriver::new(Arc::clone(&registry)));
        Self {
            registry,
            driver,
            chat_provider,
        }
    }
}
