use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use quotabot_crypto::keys::is_valid_key;
use quotabot_irc::{ChannelKeys, LinkConfig};
use quotabot_ledger::{ImportOptions, LedgerConfig, QuotaPolicy, TrialPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing or invalid configuration: {0}")]
    Missing(&'static str),
    #[error("{field}: key must be 4-56 bytes, got {len}")]
    KeyLength { field: String, len: usize },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub staff: StaffConfig,
    #[serde(default)]
    pub daily_report: DailyReportConfig,
    #[serde(default)]
    pub trial: TrialPolicy,
    #[serde(default)]
    pub quota: QuotaPolicy,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub nickname: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelBinding>,
    #[serde(default = "default_reconnect")]
    pub reconnect_secs: u64,
}

/// A monitored channel and the key its traffic is encrypted with.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelBinding {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaffConfig {
    /// Nicks allowed to issue control commands.
    pub users: Vec<String>,
    pub channels: Vec<String>,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DailyReportConfig {
    pub enabled: bool,
    pub channels: Vec<String>,
    pub key: Option<String>,
    pub interval_secs: u64,
    pub limit: u32,
}

impl Default for DailyReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            key: None,
            interval_secs: 86_400,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub status_trigger: String,
    pub control_trigger: String,
    /// Rows per block in the status report.
    pub top_limit: u32,
    pub delete_flag: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            status_trigger: "!top".into(),
            control_trigger: "!ft".into(),
            top_limit: 25,
            delete_flag: "6".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub database: PathBuf,
    pub users_dir: PathBuf,
    pub bye_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: "quotabot.db".into(),
            users_dir: "/glftpd/ftp-data/users".into(),
            bye_dir: "/glftpd/ftp-data/byefiles".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub user_skip: Vec<String>,
    pub excluded_groups: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            user_skip: vec!["default.user".into()],
            excluded_groups: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    6697
}

fn default_true() -> bool {
    true
}

fn default_reconnect() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    300
}

impl Config {
    /// Read, parse and validate the JSON config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Missing("server.host"));
        }
        if self.server.nickname.trim().is_empty() {
            return Err(ConfigError::Missing("server.nickname"));
        }
        if self.server.channels.is_empty() {
            return Err(ConfigError::Missing("server.channels"));
        }
        for channel in &self.server.channels {
            if channel.name.trim().is_empty() {
                return Err(ConfigError::Missing("server.channels[].name"));
            }
            check_key(&format!("server.channels[{}].key", channel.name), &channel.key)?;
        }

        if self.staff.users.is_empty() {
            return Err(ConfigError::Missing("staff.users"));
        }
        if self.staff.channels.is_empty() {
            return Err(ConfigError::Missing("staff.channels"));
        }
        if self.staff.key.is_empty() {
            return Err(ConfigError::Missing("staff.key"));
        }
        check_key("staff.key", &self.staff.key)?;

        if self.daily_report.enabled {
            let key = self
                .daily_report
                .key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or(ConfigError::Missing("daily_report.key"))?;
            check_key("daily_report.key", key)?;
            if self.daily_report.interval_secs == 0 {
                return Err(ConfigError::Zero("daily_report.interval_secs"));
            }
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Zero("sweep_interval_secs"));
        }
        if self.commands.top_limit == 0 {
            return Err(ConfigError::Zero("commands.top_limit"));
        }

        Ok(())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            trial: self.trial.clone(),
            quota: self.quota.clone(),
            delete_flag: self.commands.delete_flag.clone(),
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            user_skip: self.import.user_skip.iter().cloned().collect(),
            excluded_groups: self.import.excluded_groups.iter().cloned().collect(),
            delete_flag: self.commands.delete_flag.clone(),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            tls: self.server.tls,
            accept_invalid_certs: self.server.accept_invalid_certs,
            nickname: self.server.nickname.clone(),
            password: self.server.password.clone(),
        }
    }

    pub fn channel_keys(&self) -> ChannelKeys {
        let mut keys = self
            .server
            .channels
            .iter()
            .fold(ChannelKeys::new(), |keys, c| keys.bind(&c.name, &c.key))
            .staff(&self.staff.channels, &self.staff.key);
        if let Some(key) = &self.daily_report.key {
            keys = keys.report(&self.daily_report.channels, key);
        }
        keys
    }

    /// Monitored, staff and announce channels, each once, in that order.
    pub fn join_channels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.server
            .channels
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.staff.channels.iter().map(String::as_str))
            .chain(self.daily_report.channels.iter().map(String::as_str))
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

fn check_key(field: &str, key: &str) -> Result<(), ConfigError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(ConfigError::KeyLength {
            field: field.to_string(),
            len: key.len(),
        })
    }
}
