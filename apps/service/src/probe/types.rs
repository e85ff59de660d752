use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// IP family a probe run targets. Each family is configured and run on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Families in the order a cycle visits them.
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    /// Base name of the published document for this family
    pub fn document_stem(self) -> &'static str {
        match self {
            AddressFamily::V4 => "results",
            AddressFamily::V6 => "results6",
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// One endpoint's probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Endpoint address as reported by the probe tool
    #[serde(rename = "ip")]
    pub address: String,

    /// Packet loss as a fraction between 0.0 and 1.0
    pub loss: f64,

    /// Average latency in milliseconds
    pub latency_ms: u64,

    /// Download throughput in Mbit/s
    #[serde(rename = "dl_mbps")]
    pub download_mbps: f64,

    /// Data-centre / region code, when the tool reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Measurement {
    pub fn new(address: impl Into<String>, loss: f64, latency_ms: u64, download_mbps: f64) -> Self {
        Self { address: address.into(), loss, latency_ms, download_mbps, region: None }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Everything the runner needs for one invocation of the probe binary
#[derive(Debug, Clone)]
pub struct ProbeJob {
    pub family: AddressFamily,
    pub binary: PathBuf,
    /// Arguments passed before the output flag
    pub args: Vec<String>,
    /// Where the tool writes its CSV result
    pub output: PathBuf,
}

impl ProbeJob {
    /// Full argument list, with the output flag appended
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-o".to_string());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}
