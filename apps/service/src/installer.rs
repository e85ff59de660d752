//! Keeps the CloudflareSpeedTest binary up to date.
//!
//! The installed release tag is cached next to the binary in `<binary>.version`.
//! When the release manifest reports another tag, the matching archive for this
//! platform is downloaded and `cfst`, `ip.txt` and `ipv6.txt` are extracted.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::info;

const EXECUTABLE_NAME: &str = "cfst";
const ENDPOINT_LISTS: [&str; 2] = ["ip.txt", "ipv6.txt"];
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// What an update check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    UpToDate(String),
    Installed(String),
}

pub struct Installer {
    client: reqwest::Client,
    proxy_prefix: String,
    manifest_url: String,
    binary_path: PathBuf,
    data_dir: PathBuf,
    platform: String,
}

impl Installer {
    pub fn new(
        proxy_prefix: &str,
        manifest_url: &str,
        binary_path: &Path,
        data_dir: &Path,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("speedgist/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            client,
            proxy_prefix: proxy_prefix.to_string(),
            manifest_url: manifest_url.to_string(),
            binary_path: binary_path.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            platform: platform_identifier(),
        })
    }

    /// Override the `<os>_<arch>` asset identifier
    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    fn version_marker(&self) -> PathBuf {
        let mut marker = self.binary_path.clone().into_os_string();
        marker.push(".version");
        PathBuf::from(marker)
    }

    pub async fn install_or_update(&self) -> Result<InstallOutcome> {
        let manifest_url = format!("{}{}", self.proxy_prefix, self.manifest_url);
        let info: ReleaseInfo = self
            .client
            .get(&manifest_url)
            .send()
            .await
            .context("fetch release info")?
            .error_for_status()
            .context("fetch release info")?
            .json()
            .await
            .context("decode release")?;

        let cached = tokio::fs::read_to_string(self.version_marker()).await.unwrap_or_default();
        if cached.trim() == info.tag_name && self.binary_path.exists() {
            info!("CloudflareSpeedTest is already the latest version: {}", info.tag_name);
            return Ok(InstallOutcome::UpToDate(info.tag_name));
        }
        info!("New CloudflareSpeedTest version found: {}", info.tag_name);

        let asset = info
            .assets
            .iter()
            .find(|a| a.name.contains(&self.platform) && a.name.ends_with(".tar.gz"))
            .ok_or_else(|| anyhow!("asset for {} not found in release assets", self.platform))?;
        info!("Found matching asset: {}", asset.name);

        let download_url = format!("{}{}", self.proxy_prefix, asset.browser_download_url);
        info!("Downloading from: {}", download_url);
        let archive = self
            .client
            .get(&download_url)
            .send()
            .await
            .context("download asset")?
            .error_for_status()
            .context("download asset")?
            .bytes()
            .await
            .context("save asset")?;

        info!("Unpacking archive...");
        let binary_path = self.binary_path.clone();
        let data_dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || unpack(&archive, &binary_path, &data_dir))
            .await
            .context("unpack task")?
            .context("unpack")?;

        tokio::fs::write(self.version_marker(), &info.tag_name)
            .await
            .context("write version marker")?;
        info!("Version cache updated to {}", info.tag_name);

        Ok(InstallOutcome::Installed(info.tag_name))
    }
}

/// Extract the executable and endpoint lists from a `.tar.gz`. Every other
/// entry (including the wrapper script shipped next to the binary) is ignored.
pub fn unpack(archive: &[u8], binary_path: &Path, data_dir: &Path) -> Result<()> {
    if let Some(parent) = binary_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(data_dir)?;

    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut executable_found = false;

    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (dest, executable) = if name == EXECUTABLE_NAME {
            (binary_path.to_path_buf(), true)
        } else if ENDPOINT_LISTS.contains(&name) {
            (data_dir.join(name), false)
        } else {
            continue;
        };

        info!("Extracting '{}' to '{}'", path.display(), dest.display());
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        std::fs::write(&dest, contents).with_context(|| format!("write {}", dest.display()))?;

        if executable {
            set_executable(&dest)?;
            executable_found = true;
        }
    }

    if !executable_found {
        bail!("executable '{}' not found in archive", EXECUTABLE_NAME);
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Release assets use Go's `GOOS_GOARCH` naming
pub fn platform_identifier() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "armv7",
        "mips64" => "mips64",
        other => other,
    };
    format!("{}_{}", std::env::consts::OS, arch)
}
