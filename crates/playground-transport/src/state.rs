//! Shared state handed to every HTTP and websocket handler.

use std::sync::Arc;

use playground_core::DatasetStore;
use playground_session::{ModelService, Orchestrator};

/// Application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub models: ModelService,
    pub datasets: Arc<dyn DatasetStore>,
}

impl AppState {
    #[must_use]
    pub fn new(
        orchestrator: Orchestrator,
        models: ModelService,
        datasets: Arc<dyn DatasetStore>,
    ) -> Self {
        Self {
            orchestrator,
            models,
            datasets,
        }
    }
}
