use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{
    DEFAULT_PROVIDER, ProviderConfig, ProviderTableError, builtin_providers, validate_providers,
};
use crate::session::SessionSettings;
use crate::stream::StreamSettings;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Address labels that take precedence over the label file.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Replaces the built-in provider table when set.
    #[serde(default)]
    pub providers: Option<Vec<ProviderConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sessions: SessionsConfig::default(),
            stream: StreamConfig::default(),
            default_provider: default_provider(),
            system_prompt: default_system_prompt(),
            log_dir: default_log_dir(),
            labels: HashMap::new(),
            providers: None,
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: Self = serde_saphyr::from_str(&contents)?;
        if let Some(providers) = &config.providers {
            validate_providers(providers)?;
        }
        Ok(config)
    }

    /// The provider table in effect: the configured one, else the built-in one.
    pub fn provider_table(&self) -> Vec<ProviderConfig> {
        self.providers.clone().unwrap_or_else(builtin_providers)
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_system_prompt() -> String {
    "You are an AI assistant. Answer concisely and clearly.".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5005
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_reuse_window")]
    pub reuse_window_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            reuse_window_seconds: default_reuse_window(),
            idle_timeout_seconds: default_idle_timeout(),
            reap_interval_seconds: default_reap_interval(),
        }
    }
}

impl SessionsConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            reuse_window: Duration::from_secs(self.reuse_window_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds.max(1))
    }
}

fn default_reuse_window() -> u64 {
    30 * 60
}

fn default_idle_timeout() -> u64 {
    60 * 60
}

fn default_reap_interval() -> u64 {
    5 * 60
}

// ============================================================================
// StreamConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_stream_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_first_fragment_timeout")]
    pub first_fragment_timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            request_timeout_seconds: default_stream_timeout(),
            first_fragment_timeout_seconds: default_first_fragment_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_seconds: default_backoff_base(),
        }
    }
}

impl StreamConfig {
    pub fn settings(&self) -> StreamSettings {
        StreamSettings {
            temperature: self.temperature,
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            first_fragment_timeout: Duration::from_secs(self.first_fragment_timeout_seconds),
            max_attempts: self.max_attempts,
            backoff_base_seconds: self.backoff_base_seconds,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_stream_timeout() -> u64 {
    30
}

fn default_first_fragment_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    2
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid provider table: {0}")]
    InvalidProvider(#[from] ProviderTableError),
}

// ============================================================================
// Tests
// ============================================================================
