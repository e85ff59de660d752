use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::error::ProbeError;
use super::parser::read_results;
use super::types::{Measurement, ProbeJob};

/// Runs one probe attempt and returns its measurements
#[async_trait::async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, job: &ProbeJob) -> Result<Vec<Measurement>, ProbeError>;
}

/// Runs the probe binary as a child process and parses its result file
pub struct ProcessRunner {
    timeout_duration: Duration,
}

impl ProcessRunner {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }
}

#[async_trait::async_trait]
impl ProbeRunner for ProcessRunner {
    async fn run(&self, job: &ProbeJob) -> Result<Vec<Measurement>, ProbeError> {
        // A result left over from an earlier attempt must not be mistaken for this one
        match tokio::fs::remove_file(&job.output).await {
            Ok(()) => debug!("Removed stale result file {}", job.output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Could not remove stale result file {}: {}", job.output.display(), e),
        }

        let args = job.command_args();
        info!("Executing command: {} {}", job.binary.display(), args.join(" "));

        let mut child = Command::new(&job.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Launch { binary: job.binary.clone(), source })?;

        let status = match timeout(self.timeout_duration, child.wait()).await {
            Ok(status) => {
                status.map_err(|source| ProbeError::Launch { binary: job.binary.clone(), source })?
            }
            Err(_) => {
                // kill_on_drop covers the case where this fails
                let _ = child.kill().await;
                return Err(ProbeError::Timeout(self.timeout_duration));
            }
        };

        if !status.success() {
            return Err(ProbeError::Exit { code: status.code() });
        }
        info!("{} probe finished successfully", job.family);

        read_results(&job.output).await
    }
}
