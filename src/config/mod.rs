//! Configuration management for the Qianfan client
//!
//! Supports configuration via:
//! 1. Config file (~/.config/qianfan/config.toml)
//! 2. Environment variables (QIANFAN_AK, QIANFAN_ACCESS_KEY, etc.)
//! 3. CLI arguments (override file/env settings)

use crate::auth::Credential;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Credentials for either auth scheme
    pub credentials: CredentialSettings,

    /// Service endpoints
    pub endpoint: EndpointSettings,

    /// HTTP transport settings
    pub http: HttpSettings,

    /// Chat defaults
    pub chat: ChatSettings,
}

/// Credential settings
///
/// When both pairs are present the access key pair wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Legacy API key (can also use QIANFAN_AK env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Legacy secret key (can also use QIANFAN_SK env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// IAM access key (can also use QIANFAN_ACCESS_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// IAM secret key (can also use QIANFAN_SECRET_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_secret_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Base URL for model APIs
    pub base_url: String,

    /// Base URL for the access token endpoint
    pub auth_base_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            base_url: "https://qianfan.baidubce.com".to_string(),
            auth_base_url: "https://aip.baidubce.com".to_string(),
        }
    }
}

/// HTTP transport settings; a timeout of 0 disables it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Deadline for connection setup
    pub connect_timeout_secs: u64,

    /// Deadline for a non-streaming call, and for the head of a streaming one
    pub request_timeout_secs: u64,

    /// Longest silence tolerated between bytes of a stream
    pub stream_idle_timeout_secs: u64,

    /// Refresh an access token this long before it expires
    pub token_refresh_margin_secs: u64,

    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 60,
            token_refresh_margin_secs: 3600,
            user_agent: format!("qianfan-rust/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Model used when a request names none
    pub model: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "ernie-4.0-8k".to_string(),
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("qianfan")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Credentials
        if let Some(key) = lookup("QIANFAN_AK") {
            self.credentials.api_key = Some(key);
        }
        if let Some(key) = lookup("QIANFAN_SK") {
            self.credentials.secret_key = Some(key);
        }
        if let Some(key) = lookup("QIANFAN_ACCESS_KEY") {
            self.credentials.access_key = Some(key);
        }
        if let Some(key) = lookup("QIANFAN_SECRET_KEY") {
            self.credentials.access_secret_key = Some(key);
        }

        // Endpoints
        if let Some(url) = lookup("QIANFAN_BASE_URL") {
            self.endpoint.base_url = url;
        }
        if let Some(url) = lookup("QIANFAN_AUTH_BASE_URL") {
            self.endpoint.auth_base_url = url;
        }

        // HTTP
        if let Some(secs) = lookup("QIANFAN_LLM_API_RETRY_TIMEOUT").and_then(|s| parse_secs(&s)) {
            self.http.request_timeout_secs = secs;
        }
        if let Some(secs) =
            lookup("QIANFAN_ACCESS_TOKEN_REFRESH_MIN_INTERVAL").and_then(|s| parse_secs(&s))
        {
            self.http.token_refresh_margin_secs = secs;
        }

        // Chat
        if let Some(model) = lookup("QIANFAN_MODEL") {
            self.chat.model = model;
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Credential to authenticate with; the IAM pair is preferred
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let creds = &self.credentials;
        if let (Some(access_key), Some(secret_key)) = (&creds.access_key, &creds.access_secret_key) {
            return Ok(Credential::AccessKey {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            });
        }
        if let (Some(api_key), Some(secret_key)) = (&creds.api_key, &creds.secret_key) {
            return Ok(Credential::ApiKey {
                api_key: api_key.clone(),
                secret_key: secret_key.clone(),
            });
        }
        Err(ConfigError::MissingRequired(
            "QIANFAN_ACCESS_KEY/QIANFAN_SECRET_KEY or QIANFAN_AK/QIANFAN_SK".to_string(),
        ))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credential()?;
        if self.endpoint.base_url.is_empty() {
            return Err(ConfigError::MissingRequired("endpoint.base_url".to_string()));
        }
        Ok(())
    }

    /// Generate example config content
    pub fn example() -> String {
        let mut example = Config::default();
        example.credentials.access_key = Some("your-access-key".to_string());
        example.credentials.access_secret_key = Some("your-secret-key".to_string());
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

/// Accepts whole or fractional seconds, as the environment variables allow
fn parse_secs(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs >= 0.0).then(|| secs.ceil() as u64)
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.config.credentials.api_key = Some(api_key.into());
        self.config.credentials.secret_key = Some(secret_key.into());
        self
    }

    pub fn access_key(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.config.credentials.access_key = Some(access_key.into());
        self.config.credentials.access_secret_key = Some(secret_key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.base_url = url.into();
        self
    }

    pub fn auth_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.auth_base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.chat.model = model.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.request_timeout_secs = secs;
        self
    }

    pub fn stream_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.stream_idle_timeout_secs = secs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint.base_url, "https://qianfan.baidubce.com");
        assert_eq!(config.chat.model, "ernie-4.0-8k");
        assert_eq!(config.http.request_timeout_secs, 60);
        assert!(config.credential().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .api_key("key", "secret")
            .model("ernie-speed-8k")
            .request_timeout_secs(5)
            .build();

        assert_eq!(config.chat.model, "ernie-speed-8k");
        assert_eq!(config.http.request_timeout_secs, 5);
        assert_eq!(
            config.credential().unwrap(),
            Credential::ApiKey {
                api_key: "key".into(),
                secret_key: "secret".into()
            }
        );
    }

    #[test]
    fn test_access_key_preferred() {
        let config = ConfigBuilder::new()
            .api_key("key", "secret")
            .access_key("ak", "sk")
            .build();
        assert_eq!(config.credential().unwrap().scheme(), "access_key");
    }

    #[test]
    fn test_half_configured_pair_is_missing() {
        let config = Config::default().with_overrides_from(lookup(&[("QIANFAN_AK", "key")]));
        assert!(matches!(config.credential(), Err(ConfigError::MissingRequired(_))));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides_from(lookup(&[
            ("QIANFAN_ACCESS_KEY", "ak"),
            ("QIANFAN_SECRET_KEY", "sk"),
            ("QIANFAN_BASE_URL", "http://localhost:8080"),
            ("QIANFAN_LLM_API_RETRY_TIMEOUT", "2.5"),
            ("QIANFAN_ACCESS_TOKEN_REFRESH_MIN_INTERVAL", "bogus"),
        ]));

        assert_eq!(config.endpoint.base_url, "http://localhost:8080");
        assert_eq!(config.http.request_timeout_secs, 3);
        assert_eq!(config.http.token_refresh_margin_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("qianfan-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let config = ConfigBuilder::new().access_key("ak", "sk").model("ernie-lite-8k").build();

        config.save_to(path.clone()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Config = toml::from_str(&content).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[chat]\nmodel = \"ernie-speed-8k\"\n").unwrap();
        assert_eq!(config.chat.model, "ernie-speed-8k");
        assert_eq!(config.endpoint, EndpointSettings::default());
    }

    #[test]
    fn test_example_config() {
        let example = Config::example();
        assert!(example.contains("[credentials]"));
        assert!(example.contains("[endpoint]"));
        assert!(example.contains("[http]"));
    }
}
