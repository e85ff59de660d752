/// Notification channels
///
/// The set of channels is closed: each is a [`Channel`] variant chosen from the
/// configuration when a cycle starts. Delivery problems are logged and never
/// fail the caller.
pub mod pushplus;
pub mod telegram;

pub use pushplus::PushPlusChannel;
pub use telegram::TelegramChannel;

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Notifications;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid proxy '{address}': {source}")]
    Proxy {
        address: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unsupported proxy kind '{0}'")]
    ProxyKind(String),
    #[error("rejected by service: {0}")]
    Rejected(String),
}

/// Anything that can tell an operator something happened
#[async_trait::async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, title: &str, message: &str);
}

pub enum Channel {
    PushPlus(PushPlusChannel),
    Telegram(TelegramChannel),
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::PushPlus(_) => "PushPlus",
            Channel::Telegram(_) => "Telegram",
        }
    }

    pub async fn deliver(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        match self {
            Channel::PushPlus(channel) => channel.send(title, message).await,
            Channel::Telegram(channel) => channel.send(title, message).await,
        }
    }
}

/// The channels configured for one cycle
#[derive(Default)]
pub struct Notifiers {
    channels: Vec<Channel>,
}

impl Notifiers {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    /// Build the enabled channels. A channel that cannot be built is skipped.
    pub fn from_config(config: &Notifications) -> Self {
        let mut channels = Vec::new();
        if !config.enabled {
            return Self { channels };
        }

        if !config.pushplus.token.is_empty() {
            match PushPlusChannel::new(&config.pushplus.token) {
                Ok(channel) => channels.push(Channel::PushPlus(channel)),
                Err(e) => warn!("Failed to initialize PushPlus notifier: {}", e),
            }
        }

        let telegram = &config.telegram;
        if !telegram.bot_token.is_empty() && !telegram.chat_id.is_empty() {
            match TelegramChannel::from_config(telegram) {
                Ok(channel) => channels.push(Channel::Telegram(channel)),
                Err(e) => warn!("Failed to initialize Telegram notifier: {}", e),
            }
        }

        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait::async_trait]
impl Notify for Notifiers {
    async fn notify(&self, title: &str, message: &str) {
        if self.channels.is_empty() {
            debug!("No notification channels configured, dropping '{}'", title);
            return;
        }

        for channel in &self.channels {
            match channel.deliver(title, message).await {
                Ok(()) => info!("{} notification sent: {}", channel.name(), title),
                Err(e) => warn!("{} notification failed: {}", channel.name(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PushPlus, Telegram, TelegramProxy};

    #[test]
    fn disabled_builds_nothing() {
        let config = Notifications {
            enabled: false,
            pushplus: PushPlus { token: "t".into() },
            ..Notifications::default()
        };
        assert!(Notifiers::from_config(&config).is_empty());
    }

    #[test]
    fn builds_configured_channels() {
        let config = Notifications {
            enabled: true,
            pushplus: PushPlus { token: "t".into() },
            telegram: Telegram { bot_token: "b".into(), chat_id: "42".into(), ..Telegram::default() },
        };
        assert_eq!(Notifiers::from_config(&config).len(), 2);
    }

    #[test]
    fn telegram_needs_chat_id_and_valid_proxy() {
        let mut config = Notifications {
            enabled: true,
            telegram: Telegram { bot_token: "b".into(), ..Telegram::default() },
            ..Notifications::default()
        };
        assert!(Notifiers::from_config(&config).is_empty());

        config.telegram.chat_id = "42".into();
        config.telegram.proxy =
            TelegramProxy { enabled: true, kind: "carrier-pigeon".into(), address: "x:1".into() };
        assert!(Notifiers::from_config(&config).is_empty());
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/send").with_status(500).create_async().await;

        let channel = PushPlusChannel::new("t").unwrap().with_endpoint(&format!("{}/send", server.url()));
        Notifiers::new(vec![Channel::PushPlus(channel)]).notify("title", "body").await;

        mock.assert_async().await;
    }
}
