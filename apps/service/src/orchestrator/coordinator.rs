use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::attempts::{AttemptController, AttemptPlan};
use super::lock::RunLock;
use super::ranking::rank;
use super::retry::RetryTickets;
use super::{CycleDeps, CycleFactory};
use crate::config::Config;
use crate::probe::{AddressFamily, ProbeJob};
use crate::publish::ResultDocument;

/// How one family pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyOutcome {
    Published { count: usize },
    /// Every attempt failed or came back empty
    NoResults { retry_armed: bool },
    PublishFailed { permanent: bool },
    /// The pass could not start (config unreadable, family disabled, ...)
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyReport {
    pub family: AddressFamily,
    pub outcome: FamilyOutcome,
}

/// How a triggered cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle held the run lock
    Busy,
    ConfigUnavailable,
    Completed(Vec<FamilyReport>),
}

struct Shared<F> {
    factory: F,
    lock: RunLock,
    tickets: RetryTickets,
}

/// Owns the run lock and the delayed-retry tickets and runs cycles
pub struct RunCoordinator<F> {
    inner: Arc<Shared<F>>,
}

impl<F> Clone for RunCoordinator<F> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<F: CycleFactory> RunCoordinator<F> {
    pub fn new(factory: F, lock: RunLock) -> Self {
        Self { inner: Arc::new(Shared { factory, lock, tickets: RetryTickets::new() }) }
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    pub fn lock(&self) -> &RunLock {
        &self.inner.lock
    }

    pub fn tickets(&self) -> &RetryTickets {
        &self.inner.tickets
    }

    /// Run a cycle in its own task
    pub fn trigger(&self) -> JoinHandle<CycleOutcome> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_cycle().await })
    }

    /// Run one full cycle over every enabled family, unless one is already running
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = self.inner.lock.try_acquire() else {
            info!("A test is already in progress. Skipping this run.");
            return CycleOutcome::Busy;
        };

        let config = match self.inner.factory.load_config() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to reload config: {}. Skipping this run.", e);
                return CycleOutcome::ConfigUnavailable;
            }
        };

        info!("--- Starting all tests with latest configuration ---");
        self.inner.factory.prepare(&config).await;

        if !config.ipv6_enabled {
            info!("IPv6 test is disabled, skipping.");
        }

        let mut reports = Vec::new();
        for family in config.families() {
            info!("--- Starting test for {} ---", family);
            let outcome = self.family_pass(family).await;
            reports.push(FamilyReport { family, outcome });
        }

        info!("--- All tests done ---");
        CycleOutcome::Completed(reports)
    }

    /// Deferred single-family pass armed after an empty outcome
    fn retry_family(&self, family: AddressFamily) -> BoxFuture<'static, ()> {
        let coordinator = self.clone();
        async move {
            let Some(_guard) = coordinator.inner.lock.try_acquire() else {
                info!(
                    "DELAYED RETRY [{}]: Another test is already in progress. Skipping delayed retry.",
                    family
                );
                return;
            };

            let outcome = coordinator.family_pass(family).await;
            info!("DELAYED RETRY [{}]: finished with {:?}", family, outcome);
        }
        .boxed()
    }

    /// Test and publish one family. Callers must hold the run lock.
    async fn family_pass(&self, family: AddressFamily) -> FamilyOutcome {
        let config = match self.inner.factory.load_config() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to reload config for {}: {}. Skipping.", family, e);
                return FamilyOutcome::Skipped;
            }
        };
        if !config.family_enabled(family) {
            info!("{} test is disabled, skipping.", family);
            return FamilyOutcome::Skipped;
        }

        let deps = match self.inner.factory.build(&config) {
            Ok(deps) => deps,
            Err(e) => {
                error!("Failed to set up {} test: {:#}", family, e);
                return FamilyOutcome::Skipped;
            }
        };

        let job = probe_job(&config, family);
        let plan = AttemptPlan {
            max_attempts: config.attempts.max_attempts,
            min_results: config.attempts.min_results,
            policy: config.attempts.policy,
            delay: config.attempt_delay(),
        };
        let report = AttemptController::new(deps.runner.as_ref(), plan).run(&job).await;

        if report.measurements.is_empty() {
            return self.handle_no_results(&config, &deps, family, report.attempts).await;
        }

        let total = report.measurements.len();
        let limit = config.publish.limit;
        info!("Sorting {} results...", total);
        let ranked = rank(report.measurements, limit);
        if total > limit {
            info!(
                "Total result count ({}) exceeds the limit ({}). Truncating to the top {} best results.",
                total, limit, limit
            );
        }

        let count = ranked.len();
        let filename = config.document_name(family);
        let document = ResultDocument::new(&config.device_name, &config.line_operator, ranked);

        info!("Uploading {} results as {}", count, filename);
        match deps.publisher.publish(&filename, &document).await {
            Ok(()) => {
                info!("--- Test for {} completed successfully ---", family);
                FamilyOutcome::Published { count }
            }
            Err(e) => {
                let permanent = e.is_permanent();
                if permanent {
                    error!("FATAL: Update of {} failed: {}", filename, e);
                } else {
                    error!("Update of {} failed: {}", filename, e);
                }
                deps.notifier
                    .notify(
                        &format!("{} results not published", family),
                        &format!(
                            "{} ({}) measured {} endpoints but uploading {} failed: {}",
                            config.device_name, config.line_operator, count, filename, e
                        ),
                    )
                    .await;
                FamilyOutcome::PublishFailed { permanent }
            }
        }
    }

    async fn handle_no_results(
        &self,
        config: &Config,
        deps: &CycleDeps,
        family: AddressFamily,
        attempts: u32,
    ) -> FamilyOutcome {
        error!("FATAL: Speed test for {} failed after {} immediate attempts.", family, attempts);

        let retry_delay = config.delayed_retry_delay();
        let retry_note = match retry_delay {
            Some(delay) => format!(" A retry is scheduled in {} minutes.", delay.as_secs() / 60),
            None => String::new(),
        };
        deps.notifier
            .notify(
                &format!("{} speed test failed", family),
                &format!(
                    "{} ({}) got no usable results after {} attempts.{}",
                    config.device_name, config.line_operator, attempts, retry_note
                ),
            )
            .await;

        let retry_armed = match retry_delay {
            Some(delay) => self.inner.tickets.arm(family, delay, self.retry_family(family)).is_some(),
            None => {
                warn!("Delayed retry is disabled; {} stays without fresh results", family);
                false
            }
        };

        FamilyOutcome::NoResults { retry_armed }
    }
}

/// Probe invocation for a family: configured args plus the endpoint list
fn probe_job(config: &Config, family: AddressFamily) -> ProbeJob {
    let settings = config.probe_settings(family);
    let data_dir = config.data_dir();

    let mut args = settings.args.clone();
    args.push("-f".to_string());
    args.push(data_dir.join(&settings.endpoints_file).to_string_lossy().into_owned());

    ProbeJob {
        family,
        binary: settings.binary.clone(),
        args,
        output: data_dir.join(&settings.output_file),
    }
}
