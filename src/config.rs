use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_LISTEN_PORT: &str = "3000";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

fn default_listen_port() -> String {
    DEFAULT_LISTEN_PORT.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

/// The single username/password pair accepted by the proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved proxy configuration.
///
/// Built once at startup and shared read-only with every request. A value of
/// this type always satisfies the credential pairing rule: either both a
/// username and a password are configured, or authentication is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProxyConfigFile", into = "ProxyConfigFile")]
pub struct ProxyConfig {
    pub listen_port: String,
    pub credentials: Option<Credentials>,
    pub connect_timeout_secs: u64,
    pub logging: LoggingConfig,
}

/// On-disk shape of the configuration, before the pairing check.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProxyConfigFile {
    #[serde(default = "default_listen_port")]
    listen_port: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default)]
    logging: LoggingConfig,
}

impl TryFrom<ProxyConfigFile> for ProxyConfig {
    type Error = ProxyError;

    fn try_from(file: ProxyConfigFile) -> Result<Self, Self::Error> {
        let config = ProxyConfig::new(
            file.listen_port,
            file.username.unwrap_or_default(),
            file.password.unwrap_or_default(),
        )?;
        Ok(config
            .with_connect_timeout(file.connect_timeout_secs)
            .with_logging(file.logging))
    }
}

impl From<ProxyConfig> for ProxyConfigFile {
    fn from(config: ProxyConfig) -> Self {
        let (username, password) = match config.credentials {
            Some(c) => (Some(c.username), Some(c.password)),
            None => (None, None),
        };
        Self {
            listen_port: config.listen_port,
            username,
            password,
            connect_timeout_secs: config.connect_timeout_secs,
            logging: config.logging,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            credentials: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            logging: LoggingConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Builds a configuration from raw startup values. Empty strings count as
    /// absent; setting exactly one of username/password is rejected.
    pub fn new(
        listen_port: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProxyError> {
        let username = username.into();
        let password = password.into();

        let credentials = match (username.is_empty(), password.is_empty()) {
            (true, true) => None,
            (false, false) => Some(Credentials { username, password }),
            _ => {
                return Err(ProxyError::Config(
                    "Both username and password must be provided, or neither should be.".to_string(),
                ));
            }
        };

        Ok(Self {
            listen_port: listen_port.into(),
            credentials,
            ..Self::default()
        })
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn auth_required(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Address the listener binds: every interface on the configured port.
    pub fn listen_addr(&self) -> Result<SocketAddr, ProxyError> {
        let port: u16 = self.listen_port.trim().parse().map_err(|e| {
            ProxyError::Config(format!("Invalid listen port '{}': {}", self.listen_port, e))
        })?;
        Ok(SocketAddr::from(([0, 0, 0, 0], port)))
    }

    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file {}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config file {}: {}", path, e)))
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProxyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
