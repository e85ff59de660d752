/// Publishing layer - uploads ranked results to the remote document store
pub mod gist;

pub use gist::GistClient;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Measurement;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Wrong gist id, or a token that cannot see the gist
    #[error("gist not found (404): check the gist id and token permissions")]
    NotFound,
    #[error("gist update rejected ({0}): check the token")]
    Unauthorized(u16),
    #[error("gist update failed with status {0}")]
    Status(u16),
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("failed to encode result document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl PublishError {
    /// Failures an operator has to fix before publishing can succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, PublishError::NotFound | PublishError::Unauthorized(_))
    }
}

/// One published entry: a measurement stamped with where it was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedResult {
    pub device: String,
    pub operator: String,
    #[serde(flatten)]
    pub measurement: Measurement,
}

/// The JSON document stored per family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// RFC 3339 time the document was produced
    pub timestamp: String,
    pub results: Vec<PublishedResult>,
}

impl ResultDocument {
    pub fn new(device: &str, operator: &str, ranked: Vec<Measurement>) -> Self {
        let results = ranked
            .into_iter()
            .map(|measurement| PublishedResult {
                device: device.to_string(),
                operator: operator.to_string(),
                measurement,
            })
            .collect();

        Self { timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true), results }
    }
}

/// Destination for ranked results
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, filename: &str, document: &ResultDocument) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_shape() {
        let doc = ResultDocument::new(
            "nas",
            "cmcc",
            vec![Measurement::new("1.1.1.1", 0.0, 42, 88.0).with_region("HKG")],
        );

        let json = serde_json::to_value(&doc).unwrap();
        let entry = &json["results"][0];

        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(entry["device"], "nas");
        assert_eq!(entry["operator"], "cmcc");
        assert_eq!(entry["ip"], "1.1.1.1");
        assert_eq!(entry["latency_ms"], 42);
        assert_eq!(entry["dl_mbps"], 88.0);
        assert_eq!(entry["region"], "HKG");
    }

    #[test]
    fn permanent_errors() {
        assert!(PublishError::NotFound.is_permanent());
        assert!(PublishError::Unauthorized(401).is_permanent());
        assert!(!PublishError::Status(422).is_permanent());
        assert!(!PublishError::Exhausted { attempts: 3, last: "503".into() }.is_permanent());
    }
}
