use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported settings_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("engine.worker_threads must be at least 1")]
    NoWorkerThreads,
    #[error("fees.url must not be empty")]
    EmptyFeeUrl,
    #[error("background.task_id must not be empty")]
    EmptyTaskId,
    #[error("unknown engine backend '{0}', expected 'launcher' or 'preview'")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub settings_version: u32,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub background: BackgroundSection,
    #[serde(default)]
    pub fees: FeesSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: SETTINGS_VERSION,
            network: NetworkSection::default(),
            engine: EngineSection::default(),
            background: BackgroundSection::default(),
            fees: FeesSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Main,
    #[default]
    Testnet,
}

impl std::fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkKind::Main => write!(f, "main"),
            NetworkKind::Testnet => write!(f, "testnet"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default)]
    pub kind: NetworkKind,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            worker_threads: default_worker_threads(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Platform background-execution scheduling.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackgroundSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_task_id")]
    pub task_id: String,
    #[serde(default = "default_earliest_begin_secs")]
    pub earliest_begin_secs: u64,
    /// Grace period between a background stop and reporting the platform task as completed.
    #[serde(default = "default_completion_delay_secs")]
    pub completion_delay_secs: u64,
}

impl Default for BackgroundSection {
    fn default() -> Self {
        Self {
            enabled: false,
            task_id: default_task_id(),
            earliest_begin_secs: default_earliest_begin_secs(),
            completion_delay_secs: default_completion_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FeesSection {
    #[serde(default = "default_fee_url")]
    pub url: String,
    #[serde(default = "default_fee_retries")]
    pub retries: u32,
    #[serde(default = "default_fee_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FeesSection {
    fn default() -> Self {
        Self {
            url: default_fee_url(),
            retries: default_fee_retries(),
            retry_delay_ms: default_fee_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_backend() -> String {
    "launcher".to_owned()
}

fn default_worker_threads() -> usize {
    2
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

fn default_task_id() -> String {
    "app.fltr.Node".to_owned()
}

fn default_earliest_begin_secs() -> u64 {
    30
}

fn default_completion_delay_secs() -> u64 {
    10
}

fn default_fee_url() -> String {
    "https://mempool.space/api/v1/fees/recommended".to_owned()
}

fn default_fee_retries() -> u32 {
    3
}

fn default_fee_retry_delay_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.settings_version != SETTINGS_VERSION {
            return Err(SettingsError::UnsupportedVersion(self.settings_version));
        }
        if self.engine.worker_threads == 0 {
            return Err(SettingsError::NoWorkerThreads);
        }
        if !matches!(self.engine.backend.as_str(), "launcher" | "preview") {
            return Err(SettingsError::UnknownBackend(self.engine.backend.clone()));
        }
        if self.fees.url.trim().is_empty() {
            return Err(SettingsError::EmptyFeeUrl);
        }
        if self.background.task_id.trim().is_empty() {
            return Err(SettingsError::EmptyTaskId);
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine.shutdown_timeout_ms)
    }
}

pub fn parse_settings_str(input: &str) -> Result<Settings, SettingsError> {
    let settings: Settings = toml::from_str(input)?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`; a missing file yields the defaults.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    parse_settings_str(&content)
}
