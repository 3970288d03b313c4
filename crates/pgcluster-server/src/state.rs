use pgcluster_core::config::Config;
use pgcluster_core::process::CommandRunner;
use pgcluster_core::Orchestrator;
use std::sync::Arc;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            orchestrator: Orchestrator::new(config),
        }
    }

    /// State backed by a custom process runner instead of real binaries.
    pub fn with_runner(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            orchestrator: Orchestrator::with_runner(config, runner),
        }
    }
}
