use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use tracing::{info, warn};

use super::{PublishError, Publisher, ResultDocument};

const GITHUB_API: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Updates one file of a GitHub Gist
pub struct GistClient {
    client: reqwest::Client,
    token: String,
    url: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl GistClient {
    /// `proxy_prefix` is prepended verbatim to the API URL
    pub fn new(
        token: impl Into<String>,
        gist_id: &str,
        proxy_prefix: &str,
        max_attempts: u32,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("speedgist/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PublishError::Client)?;

        Ok(Self {
            client,
            token: token.into(),
            url: format!("{proxy_prefix}{GITHUB_API}/gists/{gist_id}"),
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
        })
    }

    /// Point the client at another API root (GitHub Enterprise, tests)
    pub fn with_api_base(mut self, api_base: &str, gist_id: &str) -> Self {
        self.url = format!("{}/gists/{gist_id}", api_base.trim_end_matches('/'));
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Send the PATCH, retrying transport errors and 5xx with exponential backoff
    async fn patch_with_retry(&self, body: &serde_json::Value) -> Result<StatusCode, PublishError> {
        let mut delay = self.base_delay;
        let mut last = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            let response = self
                .client
                .patch(&self.url)
                .header("Authorization", format!("token {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) if !resp.status().is_server_error() => return Ok(resp.status()),
                Ok(resp) => last = resp.status().to_string(),
                Err(e) => last = e.to_string(),
            }

            warn!(
                "Request to {} failed (attempt {}/{}): {}",
                self.url, attempt, self.max_attempts, last
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }

        Err(PublishError::Exhausted { attempts: self.max_attempts, last })
    }
}

#[async_trait::async_trait]
impl Publisher for GistClient {
    async fn publish(&self, filename: &str, document: &ResultDocument) -> Result<(), PublishError> {
        let content = serde_json::to_string_pretty(document)?;
        let mut files = serde_json::Map::new();
        files.insert(filename.to_string(), json!({ "content": content }));
        let body = json!({ "files": files });

        let status = self.patch_with_retry(&body).await?;
        match status {
            s if s.is_success() => {
                info!("Updated {} with {} results", filename, document.results.len());
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(PublishError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PublishError::Unauthorized(status.as_u16()))
            }
            s => Err(PublishError::Status(s.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Measurement;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GistClient {
        GistClient::new("tok", "abc", "", 3)
            .unwrap()
            .with_api_base(&server.url(), "abc")
            .with_base_delay(Duration::from_millis(1))
    }

    fn document() -> ResultDocument {
        ResultDocument::new("nas", "cmcc", vec![Measurement::new("1.1.1.1", 0.0, 40, 90.0)])
    }

    #[test]
    fn proxy_prefix_is_prepended() {
        let client = GistClient::new("tok", "abc", "https://mirror.example/", 3).unwrap();
        assert_eq!(client.url, "https://mirror.example/https://api.github.com/gists/abc");
    }

    #[tokio::test]
    async fn patches_named_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/gists/abc")
            .match_header("authorization", "token tok")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("results-cmcc.json".into()),
                Matcher::Regex("1.1.1.1".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        client(&server).publish("results-cmcc.json", &document()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_reported_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("PATCH", "/gists/abc").with_status(404).expect(1).create_async().await;

        let err = client(&server).publish("results-cmcc.json", &document()).await.unwrap_err();

        assert!(matches!(err, PublishError::NotFound));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server.mock("PATCH", "/gists/abc").with_status(502).expect(2).create_async().await;
        let ok = server.mock("PATCH", "/gists/abc").with_status(200).expect(1).create_async().await;

        client(&server).publish("results-cmcc.json", &document()).await.unwrap();

        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("PATCH", "/gists/abc").with_status(503).expect(3).create_async().await;

        let err = client(&server).publish("results-cmcc.json", &document()).await.unwrap_err();

        assert!(matches!(err, PublishError::Exhausted { attempts: 3, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn forbidden_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("PATCH", "/gists/abc").with_status(403).create_async().await;

        let err = client(&server).publish("results-cmcc.json", &document()).await.unwrap_err();
        assert!(matches!(err, PublishError::Unauthorized(403)));
    }
}
