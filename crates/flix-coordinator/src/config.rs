use flix_core::ProviderId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COORDINATOR_ID: &str = "plugin.video.flix";
pub const DEFAULT_PROVIDER_PREFIX: &str = "script.flix.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read failed ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse failed ({path}): {message}")]
    Parse { path: PathBuf, message: String },
}

/// On-disk settings, `config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlixConfig {
    pub coordinator_id: String,
    pub provider_prefix: String,
    pub registry_dir: String,
    pub bus_socket: String,
    pub state_db: String,
    pub log_dir: String,
    /// Zero waits until every provider answered.
    pub providers_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub auto_choose: bool,
    pub replay_enabled: bool,
}

impl Default for FlixConfig {
    fn default() -> Self {
        Self {
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
            provider_prefix: DEFAULT_PROVIDER_PREFIX.to_string(),
            registry_dir: String::new(),
            bus_socket: String::new(),
            state_db: String::new(),
            log_dir: String::new(),
            providers_timeout_secs: 15,
            resolve_timeout_secs: 10,
            poll_interval_ms: 200,
            auto_choose: false,
            replay_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub coordinator_id: ProviderId,
    pub provider_prefix: String,
    pub providers_timeout: Duration,
    pub resolve_timeout: Duration,
    pub poll_interval: Duration,
    pub auto_choose: bool,
    pub replay_enabled: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        FlixConfig::default().protocol()
    }
}

impl FlixConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overrides keys from `FLIX_*` variables. Unparseable values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = text("FLIX_COORDINATOR_ID") {
            self.coordinator_id = value;
        }
        if let Some(value) = text("FLIX_PROVIDER_PREFIX") {
            self.provider_prefix = value;
        }
        if let Some(value) = text("FLIX_REGISTRY_DIR") {
            self.registry_dir = value;
        }
        if let Some(value) = text("FLIX_BUS_SOCKET") {
            self.bus_socket = value;
        }
        if let Some(value) = text("FLIX_STATE_DB") {
            self.state_db = value;
        }
        if let Some(value) = text("FLIX_LOG_DIR") {
            self.log_dir = value;
        }
        if let Some(value) = text("FLIX_PROVIDERS_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.providers_timeout_secs = value;
        }
        if let Some(value) = text("FLIX_RESOLVE_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            self.resolve_timeout_secs = value;
        }
        if let Some(value) = text("FLIX_POLL_INTERVAL_MS").and_then(|v| v.trim().parse().ok()) {
            self.poll_interval_ms = value;
        }
        if let Some(value) = text("FLIX_AUTO_CHOOSE") {
            self.auto_choose = parse_bool(&value, self.auto_choose);
        }
        if let Some(value) = text("FLIX_REPLAY") {
            self.replay_enabled = parse_bool(&value, self.replay_enabled);
        }
    }

    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            coordinator_id: ProviderId::new(self.coordinator_id.clone()),
            provider_prefix: self.provider_prefix.clone(),
            providers_timeout: Duration::from_secs(self.providers_timeout_secs),
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            auto_choose: self.auto_choose,
            replay_enabled: self.replay_enabled,
        }
    }

    pub fn registry_dir(&self) -> PathBuf {
        if !self.registry_dir.trim().is_empty() {
            return PathBuf::from(&self.registry_dir);
        }
        data_dir().join("flix").join("providers")
    }

    pub fn state_db(&self) -> PathBuf {
        if !self.state_db.trim().is_empty() {
            return PathBuf::from(&self.state_db);
        }
        state_dir().join("flix").join("state.sqlite")
    }
}

fn parse_bool(value: &str, fallback: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

pub fn config_path(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Ok(path) = std::env::var("FLIX_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    config_dir().join("flix").join("config.toml")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    fallback
        .iter()
        .fold(home_dir(), |path, part| path.join(part))
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"])
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"])
}

fn state_dir() -> PathBuf {
    xdg_dir("XDG_STATE_HOME", &[".local", "state"])
}
