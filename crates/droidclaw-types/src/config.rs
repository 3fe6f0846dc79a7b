//! Agent configuration, loaded from a TOML file with environment overrides.
//!
//! Every field has a built-in default, so an empty file (or no file at all)
//! yields a usable configuration pointing at a local control server. After
//! the file is parsed, `DROIDCLAW_SERVER_URL` and `DROIDCLAW_BACKEND` override
//! the corresponding fields. The bearer token is never stored in the file:
//! `server.token_env` only names the environment variable that holds it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Config files larger than this are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Environment variable overriding `server.url`.
pub const ENV_SERVER_URL: &str = "DROIDCLAW_SERVER_URL";

/// Environment variable overriding `backend.kind`.
pub const ENV_BACKEND: &str = "DROIDCLAW_BACKEND";

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Control server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// PEM file of extra CA certificates trusted for `wss://` endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    /// Interval between WebSocket keepalive pings. A connection that stays
    /// silent for two intervals is treated as dead.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Capacity of the outbound frame queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            token_env: None,
            ca_cert: None,
            keepalive_secs: default_keepalive_secs(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl ServerConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|token| !token.is_empty())
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction of it (0.0..=1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Action executor timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound for any single backend call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Duration of a synthetic tap stroke.
    #[serde(default = "default_tap_duration_ms")]
    pub tap_duration_ms: u64,
    /// Duration of the held stroke used when long-click is unavailable.
    #[serde(default = "default_long_press_duration_ms")]
    pub long_press_duration_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            tap_duration_ms: default_tap_duration_ms(),
            long_press_duration_ms: default_long_press_duration_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Which device backend the binary binds at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// No backend; every action reports `backend not running` until a
    /// platform integration binds one.
    #[default]
    None,
    /// In-memory backend that logs every call and succeeds.
    DryRun,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(BackendKind::None),
            "dry_run" | "dry-run" => Ok(BackendKind::DryRun),
            other => Err(ConfigError::Invalid(format!("unknown backend kind `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

fn default_server_url() -> String {
    "ws://localhost:8080/ws/device".to_string()
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_tap_duration_ms() -> u64 {
    50
}

fn default_long_press_duration_ms() -> u64 {
    1_000
}

impl AgentConfig {
    /// Load configuration from `path`, or use defaults when `path` is `None`,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without env overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: display,
                size: metadata.len(),
                max: MAX_CONFIG_FILE_SIZE,
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display,
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply overrides looked up through `lookup` (the process environment in
    /// production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.is_empty()) {
            self.server.url = url;
        }
        if let Some(kind) = lookup(ENV_BACKEND).filter(|v| !v.is_empty()) {
            self.backend.kind = kind.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.server.url).map_err(|e| {
            ConfigError::Invalid(format!("server.url `{}`: {e}", self.server.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "server.url must use ws:// or wss://, got `{}`",
                url.scheme()
            )));
        }
        if self.server.ca_cert.is_some() && url.scheme() != "wss" {
            return Err(ConfigError::Invalid(
                "server.ca_cert requires a wss:// server.url".into(),
            ));
        }
        if self.server.outbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "server.outbound_capacity must be at least 1".into(),
            ));
        }
        if self.server.keepalive_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.keepalive_secs must be at least 1".into(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms
        {
            return Err(ConfigError::Invalid(
                "reconnect.initial_delay_ms must be in 1..=max_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid(
                "reconnect.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        if self.executor.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "executor.call_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
