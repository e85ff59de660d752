/// Orchestrator module - runs test cycles end to end
///
/// A cycle takes the run lock, then for every enabled address family:
/// - Reloads the configuration and builds fresh collaborators from it
/// - Runs the probe up to the attempt limit, combining results per policy
/// - Ranks and truncates the results and publishes them
/// - On an empty outcome, notifies and optionally arms a delayed retry
///
/// Nothing here is global: the lock, the retry tickets and the factory that
/// builds collaborators are all owned by the [`RunCoordinator`].
pub mod attempts;
pub mod coordinator;
pub mod lock;
pub mod ranking;
pub mod retry;
pub mod scheduler;


pub use attempts::{AttemptController, AttemptPlan, AttemptReport, CombinePolicy};
pub use coordinator::{CycleOutcome, FamilyOutcome, FamilyReport, RunCoordinator};
pub use lock::{RunGuard, RunLock};
pub use ranking::rank;
pub use retry::RetryTickets;
pub use scheduler::{CycleSchedule, CycleScheduler, ScheduleError};

use crate::config::{self, Config};
use crate::notify::Notify;
use crate::probe::ProbeRunner;
use crate::publish::Publisher;

/// Collaborators for one family pass, built fresh from that pass's config
pub struct CycleDeps {
    pub runner: Box<dyn ProbeRunner>,
    pub publisher: Box<dyn Publisher>,
    pub notifier: Box<dyn Notify>,
}

/// Source of configuration and collaborators for the coordinator
#[async_trait::async_trait]
pub trait CycleFactory: Send + Sync + 'static {
    /// Read the current configuration from durable storage
    fn load_config(&self) -> Result<Config, config::Error>;

    /// Build the collaborators a family pass uses
    fn build(&self, config: &Config) -> anyhow::Result<CycleDeps>;

    /// Work done once per cycle before any family runs (binary updates)
    async fn prepare(&self, _config: &Config) {}
}
