// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::cache::CacheConfig;
use crate::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Jankins Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub logs: LogLimitsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JenkinsConfig {
    /// Jenkins base URL (e.g., "https://ci.example.com")
    pub url: String,
    pub user: String,
    pub api_token: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            api_token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for JenkinsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JenkinsConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("api_token", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Http,
    Sse,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            "sse" => Ok(TransportMode::Sse),
            other => Err(ConfigError::Invalid(format!(
                "unknown transport '{}', expected stdio, http or sse",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Listen address for http/sse (e.g., "127.0.0.1:8080")
    pub bind: String,
    /// Reject requests whose Origin differs from `origin_expected`
    pub origin_enforce: bool,
    pub origin_expected: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            bind: "127.0.0.1:8080".to_string(),
            origin_enforce: false,
            origin_expected: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Log every Jenkins request and response status
    pub debug_http: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            debug_http: false,
        }
    }
}

/// Default truncation limits for log tools
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogLimitsConfig {
    pub max_lines_default: usize,
    pub max_bytes_default: usize,
}

impl Default for LogLimitsConfig {
    fn default() -> Self {
        Self {
            max_lines_default: 2000,
            max_bytes_default: 262_144,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: 60,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            max_entries: 1000,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - JENKINS_URL, JENKINS_USER, JENKINS_API_TOKEN
    /// - JENKINS_TIMEOUT: Request timeout in seconds (default: 30)
    /// - MCP_TRANSPORT: stdio, http or sse (default: stdio)
    /// - MCP_BIND: Listen address for http/sse (default: 127.0.0.1:8080)
    /// - ORIGIN_ENFORCE, ORIGIN_EXPECTED
    /// - LOG_LEVEL (default: info), LOG_JSON, DEBUG_HTTP
    /// - LOG_MAX_LINES_DEFAULT (default: 2000), LOG_MAX_BYTES_DEFAULT (default: 262144)
    /// - RATE_LIMIT_ENABLED (default: true), RATE_LIMIT_PER_MINUTE (default: 60), RATE_LIMIT_BURST (default: 10)
    /// - CACHE_ENABLED (default: false), CACHE_TTL (default: 300), CACHE_MAX_ENTRIES (default: 1000)
    pub fn from_env() -> Self {
        Self::merge_with_env(Self::default(), |key| std::env::var(key).ok())
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        Ok(Self::merge_with_env(config, |key| std::env::var(key).ok()))
    }

    /// Overlay variables present in `lookup`; unset variables keep the current value.
    pub fn merge_with_env<F>(mut config: Self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).and_then(|v| parse_bool(&v));

        if let Some(url) = lookup("JENKINS_URL") {
            config.jenkins.url = url;
        }
        if let Some(user) = lookup("JENKINS_USER") {
            config.jenkins.user = user;
        }
        if let Some(token) = lookup("JENKINS_API_TOKEN") {
            config.jenkins.api_token = token;
        }
        if let Some(timeout) = parsed(&lookup, "JENKINS_TIMEOUT") {
            config.jenkins.timeout_secs = timeout;
        }

        if let Some(mode) = lookup("MCP_TRANSPORT").and_then(|v| v.parse().ok()) {
            config.transport.mode = mode;
        }
        if let Some(bind) = lookup("MCP_BIND") {
            config.transport.bind = bind;
        }
        if let Some(enforce) = flag("ORIGIN_ENFORCE") {
            config.transport.origin_enforce = enforce;
        }
        if let Some(origin) = lookup("ORIGIN_EXPECTED") {
            config.transport.origin_expected = Some(origin);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level.to_ascii_lowercase();
        }
        if let Some(json) = flag("LOG_JSON") {
            config.logging.json = json;
        }
        if let Some(debug_http) = flag("DEBUG_HTTP") {
            config.logging.debug_http = debug_http;
        }

        if let Some(lines) = parsed(&lookup, "LOG_MAX_LINES_DEFAULT") {
            config.logs.max_lines_default = lines;
        }
        if let Some(bytes) = parsed(&lookup, "LOG_MAX_BYTES_DEFAULT") {
            config.logs.max_bytes_default = bytes;
        }

        if let Some(enabled) = flag("RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = enabled;
        }
        if let Some(per_minute) = parsed(&lookup, "RATE_LIMIT_PER_MINUTE") {
            config.rate_limit.per_minute = per_minute;
        }
        if let Some(burst) = parsed(&lookup, "RATE_LIMIT_BURST") {
            config.rate_limit.burst = burst;
        }

        if let Some(enabled) = flag("CACHE_ENABLED") {
            config.cache.enabled = enabled;
        }
        if let Some(ttl) = parsed(&lookup, "CACHE_TTL") {
            config.cache.ttl_secs = ttl;
        }
        if let Some(max_entries) = parsed(&lookup, "CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max_entries;
        }

        config
    }

    /// Parse bind address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.transport.bind.parse().map_err(|_| {
            ConfigError::Invalid(format!("invalid bind address '{}'", self.transport.bind))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.jenkins.timeout_secs)
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: self.rate_limit.per_minute,
            burst: self.rate_limit.burst,
            ..RateLimitConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache.max_entries,
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jenkins.url.trim().is_empty() {
            return Err(ConfigError::Invalid("JENKINS_URL is required".into()));
        }
        url::Url::parse(&self.jenkins.url).map_err(|e| {
            ConfigError::Invalid(format!("invalid JENKINS_URL '{}': {}", self.jenkins.url, e))
        })?;

        if self.jenkins.timeout_secs == 0 {
            return Err(ConfigError::Invalid("JENKINS_TIMEOUT must be positive".into()));
        }

        if self.rate_limit.enabled && (self.rate_limit.per_minute == 0 || self.rate_limit.burst == 0) {
            return Err(ConfigError::Invalid(
                "rate limiting requires positive RATE_LIMIT_PER_MINUTE and RATE_LIMIT_BURST".into(),
            ));
        }

        if self.cache.enabled && (self.cache.ttl_secs == 0 || self.cache.max_entries == 0) {
            return Err(ConfigError::Invalid(
                "caching requires positive CACHE_TTL and CACHE_MAX_ENTRIES".into(),
            ));
        }

        if self.transport.mode != TransportMode::Stdio {
            self.socket_addr()?;
        }

        Ok(())
    }
}
