use crate::utils::error::{ProxyPoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Global cap across all routes
    #[serde(default = "default_max_connections", alias = "maxConnections")]
    pub max_connections: usize,
    /// Per-route cap unless overridden
    #[serde(
        default = "default_connections_per_route",
        alias = "defaultConnectionsPerRoute"
    )]
    pub default_connections_per_route: usize,
    /// Idle threshold used by the reaper
    #[serde(
        default = "default_idle_timeout_secs",
        alias = "idleConnectionsTimeoutInSeconds"
    )]
    pub idle_connections_timeout_secs: u64,
    #[serde(default)]
    pub repositories: Vec<RepositoryLimit>,
}

/// Per-repository connection cap applied at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryLimit {
    pub url: String,
    #[serde(alias = "maxConnections")]
    pub max_connections: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 0 waits for a free connection indefinitely
    #[serde(default)]
    pub lease_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_bind_port")]
    pub bind_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

// Default values
fn default_max_connections() -> usize {
    crate::pool::DEFAULT_MAX_TOTAL
}

fn default_connections_per_route() -> usize {
    crate::pool::DEFAULT_MAX_PER_ROUTE
}

fn default_idle_timeout_secs() -> u64 {
    crate::pool::DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_api_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_bind_port() -> u16 {
    9180
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            default_connections_per_route: default_connections_per_route(),
            idle_connections_timeout_secs: default_idle_timeout_secs(),
            repositories: Vec::new(),
        }
    }
}

impl PoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connections_timeout_secs)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            lease_timeout_ms: 0,
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn lease_timeout(&self) -> Option<Duration> {
        (self.lease_timeout_ms > 0).then(|| Duration::from_millis(self.lease_timeout_ms))
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_api_bind_address(),
            bind_port: default_api_bind_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ProxyPoolError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ProxyPoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(ProxyPoolError::Config(
                "pool.max_connections must be greater than 0".to_string(),
            ));
        }

        if self.pool.default_connections_per_route == 0 {
            return Err(ProxyPoolError::Config(
                "pool.default_connections_per_route must be greater than 0".to_string(),
            ));
        }

        if self.pool.idle_connections_timeout_secs == 0 {
            return Err(ProxyPoolError::Config(
                "pool.idle_connections_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for repository in &self.pool.repositories {
            if repository.url.trim().is_empty() {
                return Err(ProxyPoolError::Config(
                    "pool.repositories entries require a url".to_string(),
                ));
            }

            if repository.max_connections <= 0 {
                return Err(ProxyPoolError::Config(format!(
                    "Invalid max_connections {} for repository {}. Must be positive",
                    repository.max_connections, repository.url
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ProxyPoolError::Config(format!(
                "Invalid logging format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
max_connections = 200
default_connections_per_route = 5
idle_connections_timeout_secs = 60

# Per-repository caps:
# [[pool.repositories]]
# url = "https://repo.example.com/maven"
# max_connections = 10

[client]
connect_timeout_ms = 10000
lease_timeout_ms = 0  # 0 = wait for a free connection indefinitely

[api]
enabled = false
bind_address = "127.0.0.1"
bind_port = 9180

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"
"#;

        std::fs::write(path.as_ref(), example).map_err(|e| {
            ProxyPoolError::Config(format!("Failed to write example config: {}", e))
        })?;

        Ok(())
    }
}
