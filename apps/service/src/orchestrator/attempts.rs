use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::probe::{Measurement, ProbeJob, ProbeRunner};

/// How results from successive attempts are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinePolicy {
    /// Keep only the latest non-empty attempt; stop once it is large enough
    #[default]
    Replace,
    /// Concatenate every non-empty attempt; always run all attempts
    Accumulate,
}

impl std::fmt::Display for CombinePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CombinePolicy::Replace => write!(f, "replace"),
            CombinePolicy::Accumulate => write!(f, "accumulate"),
        }
    }
}

/// Attempt loop parameters for one family pass
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub max_attempts: u32,
    pub min_results: usize,
    pub policy: CombinePolicy,
    pub delay: Duration,
}

/// What the attempt loop produced
#[derive(Debug, Clone, Default)]
pub struct AttemptReport {
    pub measurements: Vec<Measurement>,
    /// Attempts actually started
    pub attempts: u32,
    /// Attempts that ended in an error
    pub failures: u32,
}

/// Repeats probe attempts and merges their outcomes
pub struct AttemptController<'a> {
    runner: &'a dyn ProbeRunner,
    plan: AttemptPlan,
}

impl<'a> AttemptController<'a> {
    pub fn new(runner: &'a dyn ProbeRunner, plan: AttemptPlan) -> Self {
        Self { runner, plan }
    }

    /// Run up to `max_attempts` attempts. An empty report means every attempt
    /// failed or returned nothing; that is not an error.
    pub async fn run(&self, job: &ProbeJob) -> AttemptReport {
        let plan = &self.plan;
        let mut report = AttemptReport::default();

        for attempt in 1..=plan.max_attempts {
            info!(
                "--- Starting speed test for {} (Attempt {}/{}) ---",
                job.family, attempt, plan.max_attempts
            );
            report.attempts = attempt;

            match self.runner.run(job).await {
                Err(e) => {
                    warn!("Speed test for {} failed on attempt {}: {}", job.family, attempt, e);
                    report.failures += 1;
                }
                Ok(results) if results.is_empty() => {
                    info!("Attempt {} for {} returned no results", attempt, job.family);
                }
                Ok(results) => {
                    info!("Got {} results in attempt {}", results.len(), attempt);
                    match plan.policy {
                        CombinePolicy::Replace => report.measurements = results,
                        CombinePolicy::Accumulate => report.measurements.extend(results),
                    }
                }
            }

            // Accumulate never stops early: later attempts still add endpoints
            if plan.policy == CombinePolicy::Replace
                && report.measurements.len() >= plan.min_results
            {
                info!("Got enough results ({}), stopping attempts", report.measurements.len());
                break;
            }

            if attempt < plan.max_attempts {
                info!("Waiting for {:?} before next attempt...", plan.delay);
                tokio::time::sleep(plan.delay).await;
            }
        }

        report
    }
}
