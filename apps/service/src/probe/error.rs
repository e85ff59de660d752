use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single probe attempt produced no measurements.
///
/// Every variant is retryable from the attempt controller's point of view.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch {}: {source}", binary.display())]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("probe exited unsuccessfully (code {code:?})")]
    Exit { code: Option<i32> },

    #[error("probe did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to read result file '{}': {source}", path.display())]
    ResultFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result file is empty or missing header: {}", .0.display())]
    EmptyResultFile(PathBuf),

    #[error("malformed row {line} in result file: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("no valid results parsed from {}", .0.display())]
    NoRows(PathBuf),
}
