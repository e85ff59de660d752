use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use crate::config::{self, Config};
use crate::installer::Installer;
use crate::notify::Notifiers;
use crate::orchestrator::{CycleDeps, CycleFactory};
use crate::probe::{AddressFamily, ProcessRunner};
use crate::publish::GistClient;

/// Builds real collaborators from the config file on disk
pub struct LiveFactory {
    config_path: PathBuf,
}

impl LiveFactory {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl CycleFactory for LiveFactory {
    fn load_config(&self) -> Result<Config, config::Error> {
        Config::load(&self.config_path)
    }

    fn build(&self, config: &Config) -> anyhow::Result<CycleDeps> {
        let publisher = GistClient::new(
            config.publish.token.clone(),
            &config.publish.gist_id,
            &config.proxy_prefix,
            config.publish.max_retries,
        )
        .context("create gist client")?;

        Ok(CycleDeps {
            runner: Box::new(ProcessRunner::new(config.probe_timeout())),
            publisher: Box::new(publisher),
            notifier: Box::new(Notifiers::from_config(&config.notifications)),
        })
    }

    async fn prepare(&self, config: &Config) {
        if !config.update.check {
            return;
        }

        let binary = &config.probe_settings(AddressFamily::V4).binary;
        let result = match Installer::new(
            &config.proxy_prefix,
            &config.update.manifest_url,
            binary,
            &config.data_dir(),
        ) {
            Ok(installer) => installer.install_or_update().await.map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("CloudflareSpeedTest update check failed, using the installed binary: {:#}", e);
        }
    }
}
