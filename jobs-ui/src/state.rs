//! Shared application state for the UI server.

use std::path::PathBuf;
use std::sync::Arc;

use jobs::io::config::JobsConfig;
use jobs::io::process::ProcessLauncher;
use jobs::orchestrator::Orchestrator;
use jobs::registry::RunRegistry;

/// Launcher shared by every run the server starts.
pub type SharedLauncher = Arc<dyn ProcessLauncher>;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<SharedLauncher>>,
}

impl AppState {
    pub fn new(config: JobsConfig, launcher: SharedLauncher) -> Self {
        let orchestrator = Orchestrator::new(Arc::new(config), launcher, RunRegistry::new());
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn config(&self) -> &JobsConfig {
        self.orchestrator.config()
    }

    pub fn registry(&self) -> &RunRegistry {
        self.orchestrator.registry()
    }

    /// Directory holding one log per run.
    pub fn log_dir(&self) -> PathBuf {
        self.config().log_dir()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use jobs::test_support::{Script, ScriptedLauncher, TestProject};

    /// State over a temp project whose runs replay `scripts`.
    pub fn scripted_state(scripts: Vec<Script>) -> (TestProject, AppState) {
        let project = TestProject::new().expect("project");
        let launcher: SharedLauncher = Arc::new(ScriptedLauncher::new(scripts));
        let state = AppState::new(project.config(), launcher);
        (project, state)
    }
}
