//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::{GatewayError, Result, DEFAULT_HOST, DEFAULT_PORT};

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Path of the knowledge-store database
    pub database_path: String,

    /// Shared secret the scheduler presents on heartbeat calls.
    /// When unset, heartbeat is open (local development only).
    pub scheduler_secret: Option<String>,

    /// LLM collaborator settings
    pub llm: LlmSettings,

    /// Embedding provider settings
    pub embedding: EmbeddingSettings,

    /// Business backend settings
    pub backend: BackendSettings,

    /// Heartbeat maintenance settings
    pub heartbeat: HeartbeatSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: ".steward/steward.db".to_string(),
            scheduler_secret: None,
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            backend: BackendSettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database path
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("bad listen address: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| GatewayError::InvalidConfig(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// LLM collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat-completions endpoint (OpenAI-compatible)
    pub endpoint: String,

    /// API key, if the endpoint requires one
    pub api_key: Option<String>,

    /// Model name sent with each request
    pub model: String,

    /// Per-response token ceiling
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    pub retry: RetrySettings,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1/chat/completions".to_string(),
            api_key: None,
            model: "steward-agent".to_string(),
            max_tokens: 1024,
            timeout_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

/// Exponential backoff retry policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum retry attempts after the first failure
    pub max_retries: u32,

    /// First backoff delay in milliseconds; doubles each attempt
    pub initial_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding endpoint; the deterministic local embedder when unset
    pub endpoint: Option<String>,
}

/// Business backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the property-management backend; when unset the
    /// gateway runs with an empty fixture feed and a no-op executor
    pub base_url: Option<String>,

    /// Service credential presented to the backend
    pub service_token: Option<String>,
}

/// Heartbeat maintenance settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Days without reinforcement before a rule decays
    pub decay_days: i64,

    /// Confidence removed per decay pass
    pub decay_amount: f32,

    /// Learning-data retention window in days
    pub retention_days: i64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            decay_days: 30,
            decay_amount: 0.05,
            retention_days: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = GatewayConfig::new()
            .with_host("0.0.0.0")
            .with_port(8080)
            .with_database_path("/tmp/steward.db");

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_path, "/tmp/steward.db");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = GatewayConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.heartbeat.decay_days, parsed.heartbeat.decay_days);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: GatewayConfig = toml::from_str("port = 9999").unwrap();
        assert_eq!(parsed.port, 9999);
        assert_eq!(parsed.host, DEFAULT_HOST);
        assert_eq!(parsed.llm.retry.max_retries, 3);
    }
}
