//! Application State

use std::sync::Arc;

use research_core::Researcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Research orchestrator with the model backend and registered tools
    pub researcher: Arc<Researcher>,
}

impl AppState {
    pub fn new(researcher: Researcher) -> Self {
        Self {
            researcher: Arc::new(researcher),
        }
    }
}
