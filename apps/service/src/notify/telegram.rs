use serde::Deserialize;
use serde_json::json;

use super::{NotifyError, REQUEST_TIMEOUT};
use crate::config::Telegram;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage`, optionally through an outbound proxy
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn from_config(config: &Telegram) -> Result<Self, NotifyError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

        if config.proxy.enabled {
            let scheme = match config.proxy.kind.to_ascii_lowercase().as_str() {
                "http" | "" => "http",
                "https" => "https",
                "socks5" | "socks" => "socks5h",
                other => return Err(NotifyError::ProxyKind(other.to_string())),
            };
            let address = format!("{scheme}://{}", config.proxy.address);
            let proxy = reqwest::Proxy::all(&address)
                .map_err(|source| NotifyError::Proxy { address: address.clone(), source })?;
            builder = builder.proxy(proxy);
        }

        let api_base = if config.api_url.is_empty() {
            TELEGRAM_API.to_string()
        } else {
            config.api_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            client: builder.build()?,
            api_base,
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    pub async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let text = format!("{title}\n\n{message}");

        let reply: Reply = self
            .client
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?
            .json()
            .await?;

        if !reply.ok {
            return Err(NotifyError::Rejected(
                reply.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}
