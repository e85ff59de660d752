use serde::Deserialize;
use serde_json::json;

use super::{NotifyError, REQUEST_TIMEOUT};

const PUSHPLUS_ENDPOINT: &str = "http://www.pushplus.plus/send";

/// PushPlus keyed-token callback
pub struct PushPlusChannel {
    client: reqwest::Client,
    token: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct Reply {
    code: i64,
    #[serde(default)]
    msg: String,
}

impl PushPlusChannel {
    pub fn new(token: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, token: token.to_string(), endpoint: PUSHPLUS_ENDPOINT.to_string() })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let reply: Reply = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "token": self.token, "title": title, "content": message }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // PushPlus answers 200 OK and reports failures in the body
        if reply.code != 200 {
            return Err(NotifyError::Rejected(format!("code {}: {}", reply.code, reply.msg)));
        }
        Ok(())
    }
}
