pub mod autoupdate;
pub mod error;
pub mod fetch;
pub mod plan;
pub mod playbook;
pub mod preflight;
pub mod runner;
pub mod upgrade;
pub mod verify;

use std::sync::Arc;

use updater_config::Settings;
use updater_db::DbBackupTool;
use updater_docker::{ContainerDriver, PortIdentifier};
use updater_store::StateStore;

pub use error::RunnerError;
pub use fetch::Fetcher;
pub use plan::{effective_mode, PlanOutcome, PlanRequest};
pub use playbook::{render_playbook, PlaybookContext};
pub use runner::Runner;
pub use verify::Verifier;

/// Shared dependencies of every upgrade phase. Capability sets (container
/// runtime, database tooling, persistence) are explicit trait objects so
/// tests substitute recorders and fakes; there is no global runtime.
pub struct Orchestrator {
    pub settings: Settings,
    pub driver: Arc<dyn ContainerDriver>,
    pub store: Arc<dyn StateStore>,
    pub tool: Arc<dyn DbBackupTool>,
    pub fetcher: Fetcher,
    pub ports: PortIdentifier,
    pub verifier: Verifier,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        driver: Arc<dyn ContainerDriver>,
        store: Arc<dyn StateStore>,
        tool: Arc<dyn DbBackupTool>,
    ) -> Self {
        let fetcher = Fetcher::new(
            settings.policy_url.clone(),
            settings.manifest_url.clone(),
            settings.fetch_timeout(),
        );
        Orchestrator {
            settings,
            driver,
            store,
            tool,
            fetcher,
            ports: PortIdentifier::new(),
            verifier: Verifier::new(),
        }
    }
}
