use std::sync::Arc;

use reelswap_pipeline::orchestrator::Orchestrator;
use reelswap_pipeline::services::PipelineServices;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Run registry and the stage actions that drive it.
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: ServerConfig, services: PipelineServices) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(Orchestrator::new(services)),
        }
    }

    /// Collaborators for the stateless stage endpoints.
    pub fn services(&self) -> &PipelineServices {
        self.orchestrator.services()
    }
}
