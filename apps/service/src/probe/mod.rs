/// Probe module - drives the external speed-test binary
///
/// This module is responsible for:
/// - Launching the probe process for one address family
/// - Bounding its runtime
/// - Parsing the CSV it leaves behind into measurements
pub mod error;
pub mod parser;
pub mod runner;
pub mod types;

pub use error::ProbeError;
pub use runner::{ProbeRunner, ProcessRunner};
pub use types::{AddressFamily, Measurement, ProbeJob};
