use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::CombinePolicy;
use crate::probe::AddressFamily;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {}: {source}", path.display())]
    ReadFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {}: {source}", path.display())]
    WriteFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no config path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of this probing device, stamped on every published result
    pub device_name: String,
    /// Network operator of the line under test; part of the document filename
    pub line_operator: String,
    pub ipv6_enabled: bool,
    /// Prefix prepended to GitHub URLs (e.g. a download mirror)
    pub proxy_prefix: String,
    /// Cron expression; empty runs once and exits
    pub schedule: String,
    /// Directory holding endpoint lists and result files. Defaults to the
    /// directory the config file lives in.
    pub data_dir: Option<path::PathBuf>,
    pub publish: Publish,
    pub attempts: Attempts,
    pub delayed_retry: DelayedRetry,
    pub notifications: Notifications,
    pub probe: Probes,
    pub update: Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Publish {
    pub token: String,
    pub gist_id: String,
    /// Maximum number of ranked results uploaded per family
    pub limit: usize,
    /// Total HTTP attempts for one upload
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Attempts {
    pub max_attempts: u32,
    pub min_results: usize,
    pub delay_seconds: u64,
    pub policy: CombinePolicy,
    /// Hard limit on a single probe process
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedRetry {
    pub enabled: bool,
    pub delay_minutes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub enabled: bool,
    pub pushplus: PushPlus,
    pub telegram: Telegram,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPlus {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Telegram {
    pub bot_token: String,
    pub chat_id: String,
    /// Alternative Bot API base URL (self-hosted or reverse proxy)
    pub api_url: String,
    pub proxy: TelegramProxy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramProxy {
    pub enabled: bool,
    /// `http`, `https` or `socks5`
    pub kind: String,
    /// `host:port`
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Probes {
    pub v4: ProbeSettings,
    pub v6: ProbeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub binary: path::PathBuf,
    pub args: Vec<String>,
    pub output_file: String,
    /// Endpoint list passed to the probe with `-f`
    pub endpoints_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Update {
    pub check: bool,
    pub manifest_url: String,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/speedgist/config.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("speedgist/config.toml"))
}

/// Resolve the config path the same way `from_config` does
pub fn resolve_config_path(optional_path: Option<&path::Path>) -> Result<path::PathBuf, Error> {
    match optional_path {
        Some(path) => Ok(normalize_toml_path(path)),
        None => default_config_path(),
    }
}

/// Expand `$VAR` and `${VAR}` references. Unset variables expand to "".
pub fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            name
        };
        out.push_str(&env::var(&name).unwrap_or_default());
    }
    out
}

fn redact(secret: &str) -> &str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            line_operator: String::new(),
            ipv6_enabled: false,
            proxy_prefix: String::new(),
            schedule: "0 */6 * * *".into(),
            data_dir: None,
            publish: Publish::default(),
            attempts: Attempts::default(),
            delayed_retry: DelayedRetry::default(),
            notifications: Notifications::default(),
            probe: Probes {
                v4: ProbeSettings::default(),
                v6: ProbeSettings {
                    output_file: "result6.csv".into(),
                    endpoints_file: "ipv6.txt".into(),
                    ..ProbeSettings::default()
                },
            },
            update: Update::default(),
        }
    }
}

impl Default for Publish {
    fn default() -> Self {
        Self { token: "${GITHUB_TOKEN}".into(), gist_id: String::new(), limit: 10, max_retries: 3 }
    }
}

impl Default for Attempts {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_results: 10,
            delay_seconds: 5,
            policy: CombinePolicy::Replace,
            timeout_seconds: 600,
        }
    }
}

impl Default for DelayedRetry {
    fn default() -> Self {
        Self { enabled: false, delay_minutes: 30 }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            binary: "/app/config/cfst".into(),
            args: Vec::new(),
            output_file: "result.csv".into(),
            endpoints_file: "ip.txt".into(),
        }
    }
}

impl Default for Update {
    fn default() -> Self {
        Self {
            check: false,
            manifest_url: "https://api.github.com/repos/XIU2/CloudflareSpeedTest/releases/latest"
                .into(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration State:")?;
        write_1(f, "Device", &self.device_name)?;
        write_1(f, "Line Operator", &self.line_operator)?;
        write_1(f, "IPv6", &self.ipv6_enabled)?;
        write_1(f, "Schedule", &self.schedule)?;
        write_title_1(f, "Attempts")?;
        write_1(f, "Max Attempts", &self.attempts.max_attempts)?;
        write_1(f, "Min Results", &self.attempts.min_results)?;
        write_1(f, "Delay (s)", &self.attempts.delay_seconds)?;
        write_1(f, "Policy", &self.attempts.policy)?;
        write_1(f, "Probe Timeout (s)", &self.attempts.timeout_seconds)?;
        write_title_1(f, "Publish")?;
        write_1(f, "Gist", &self.publish.gist_id)?;
        write_1(f, "Token", &redact(&self.publish.token))?;
        write_1(f, "Limit", &self.publish.limit)?;
        write_title_1(f, "Delayed Retry")?;
        write_1(f, "Enabled", &self.delayed_retry.enabled)?;
        write_1(f, "Delay (min)", &self.delayed_retry.delay_minutes)?;
        write_title_1(f, "Notifications")?;
        write_1(f, "Enabled", &self.notifications.enabled)?;
        write_1(f, "PushPlus", &redact(&self.notifications.pushplus.token))?;
        write_1(f, "Telegram", &redact(&self.notifications.telegram.bot_token))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/speedgist/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// # use speedgist::config::Config;
    /// let cfg = Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), speedgist::config::Error>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path = resolve_config_path(optional_path.as_ref().map(|p| p.as_ref()))?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            // The default has no device name, so this reports what to fill in
            Self::load(&config_path)
        }
    }

    /// Read, expand and validate an existing config file. Used on every cycle.
    pub fn load(config_path: &path::Path) -> Result<Self, Error> {
        let raw_string = fs::read_to_string(config_path)
            .map_err(|source| Error::ReadFailed { path: config_path.to_path_buf(), source })?;
        let mut config = Self::parse(&raw_string)?;

        if config.data_dir.is_none() {
            config.data_dir = config_path.parent().map(path::Path::to_path_buf);
        }
        Ok(config)
    }

    /// Parse, expand environment references and validate
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut config: Self = toml::from_str(raw)?;
        config.expand_secrets();
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    fn expand_secrets(&mut self) {
        self.proxy_prefix = expand_env(&self.proxy_prefix);
        self.publish.token = expand_env(&self.publish.token);
        self.notifications.pushplus.token = expand_env(&self.notifications.pushplus.token);
        self.notifications.telegram.bot_token = expand_env(&self.notifications.telegram.bot_token);
        self.notifications.telegram.chat_id = expand_env(&self.notifications.telegram.chat_id);
    }

    fn validate(&self) -> Result<(), Error> {
        if self.device_name.trim().is_empty() || self.line_operator.trim().is_empty() {
            return Err(Error::Invalid("'device_name' and 'line_operator' must not be empty".into()));
        }
        if self.attempts.max_attempts == 0 {
            return Err(Error::Invalid("'attempts.max_attempts' must be at least 1".into()));
        }
        if self.attempts.min_results == 0 {
            return Err(Error::Invalid("'attempts.min_results' must be at least 1".into()));
        }
        if self.publish.limit == 0 {
            return Err(Error::Invalid("'publish.limit' must be at least 1".into()));
        }
        Ok(())
    }

    /// Families a cycle should test, in order
    pub fn families(&self) -> Vec<AddressFamily> {
        AddressFamily::ALL.into_iter().filter(|f| self.family_enabled(*f)).collect()
    }

    pub fn family_enabled(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::V4 => true,
            AddressFamily::V6 => self.ipv6_enabled,
        }
    }

    pub fn probe_settings(&self, family: AddressFamily) -> &ProbeSettings {
        match family {
            AddressFamily::V4 => &self.probe.v4,
            AddressFamily::V6 => &self.probe.v6,
        }
    }

    pub fn data_dir(&self) -> path::PathBuf {
        self.data_dir.clone().unwrap_or_else(|| path::PathBuf::from("."))
    }

    /// Document filename for a family, e.g. `results6-cmcc.json`
    pub fn document_name(&self, family: AddressFamily) -> String {
        format!("{}-{}.json", family.document_stem(), self.line_operator)
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_secs(self.attempts.delay_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.attempts.timeout_seconds)
    }

    /// Delay before a delayed retry, if that feature is on
    pub fn delayed_retry_delay(&self) -> Option<Duration> {
        (self.delayed_retry.enabled && self.delayed_retry.delay_minutes > 0)
            .then(|| Duration::from_secs(self.delayed_retry.delay_minutes * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
device_name = "nas"
line_operator = "cmcc"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::parse(MINIMAL).unwrap();

        assert_eq!(cfg.attempts.max_attempts, 3);
        assert_eq!(cfg.attempts.min_results, 10);
        assert_eq!(cfg.attempts.policy, CombinePolicy::Replace);
        assert_eq!(cfg.publish.limit, 10);
        assert_eq!(cfg.probe.v6.endpoints_file, "ipv6.txt");
        assert_eq!(cfg.families(), vec![AddressFamily::V4]);
        assert_eq!(cfg.delayed_retry_delay(), None);
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
device_name = "nas"
line_operator = "cu"
ipv6_enabled = true
schedule = "*/30 * * * *"

[publish]
gist_id = "abc123"
limit = 5

[attempts]
max_attempts = 4
min_results = 2
policy = "accumulate"

[delayed_retry]
enabled = true
delay_minutes = 15

[probe.v6]
binary = "/opt/cfst"
args = ["-n", "200", "-tl", "250"]
"#;
        let cfg = Config::parse(raw).unwrap();

        assert_eq!(cfg.attempts.policy, CombinePolicy::Accumulate);
        assert_eq!(cfg.families(), vec![AddressFamily::V4, AddressFamily::V6]);
        assert_eq!(cfg.probe.v6.args.len(), 4);
        assert_eq!(cfg.document_name(AddressFamily::V6), "results6-cu.json");
        assert_eq!(cfg.document_name(AddressFamily::V4), "results-cu.json");
        assert_eq!(cfg.delayed_retry_delay(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn rejects_missing_identity_and_zero_limits() {
        assert!(matches!(Config::parse(""), Err(Error::Invalid(_))));

        let zero_limit = format!("{MINIMAL}\n[publish]\nlimit = 0\n");
        assert!(matches!(Config::parse(&zero_limit), Err(Error::Invalid(_))));

        let zero_attempts = format!("{MINIMAL}\n[attempts]\nmax_attempts = 0\n");
        assert!(matches!(Config::parse(&zero_attempts), Err(Error::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_policy() {
        let raw = format!("{MINIMAL}\n[attempts]\npolicy = \"merge\"\n");
        assert!(matches!(Config::parse(&raw), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn expands_environment_references() {
        // SAFETY: the variable name is unique to this test
        unsafe { env::set_var("SPEEDGIST_TEST_TOKEN", "ghp_secret") };

        assert_eq!(expand_env("${SPEEDGIST_TEST_TOKEN}"), "ghp_secret");
        assert_eq!(expand_env("token $SPEEDGIST_TEST_TOKEN!"), "token ghp_secret!");
        assert_eq!(expand_env("${SPEEDGIST_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_env("cost: 5$"), "cost: 5$");

        let raw = format!("{MINIMAL}\n[publish]\ntoken = \"${{SPEEDGIST_TEST_TOKEN}}\"\n");
        assert_eq!(Config::parse(&raw).unwrap().publish.token, "ghp_secret");
    }

    #[test]
    fn display_redacts_secrets() {
        let mut cfg = Config::parse(MINIMAL).unwrap();
        cfg.publish.token = "ghp_secret".into();

        let dump = cfg.to_string();
        assert!(dump.contains("<redacted>"));
        assert!(!dump.contains("ghp_secret"));
    }

    #[test]
    fn missing_file_writes_default_and_reports_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speedgist/config");

        let result = Config::from_config(Some(&path));

        assert!(matches!(result, Err(Error::Invalid(_))));
        assert!(dir.path().join("speedgist/config.toml").exists());
    }

    #[test]
    fn load_defaults_data_dir_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, MINIMAL).unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.data_dir(), dir.path());
        assert!(matches!(Config::load(&dir.path().join("gone.toml")), Err(Error::ReadFailed { .. })));
    }
}
