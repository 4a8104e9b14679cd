//! Configuration types for the inquiry relay.
//!
//! Everything that used to be a process-wide constant lives here:
//! - Relay endpoint, transport security and optional credentials
//! - Sender identity and internal mailboxes
//! - HTTP listen address and allowed CORS origins
//!
//! Defaults reproduce the production deployment: an IP-authenticated relay
//! that needs no credentials.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{AuthMethod, Credentials};

/// Default relay host.
pub const DEFAULT_HOST: &str = "smtp-relay.gmail.com";

/// Default relay port (plain SMTP, upgraded with STARTTLS when offered).
pub const DEFAULT_PORT: u16 = 25;

/// Default timeout for connections and TLS handshakes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single command round-trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "GATHER_CONFIG";

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// An environment override has an unusable value.
    #[error("invalid value for {key}: {message}")]
    Environment {
        /// Variable name.
        key: &'static str,
        /// What was wrong with it.
        message: String,
    },
    /// The assembled configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport security policy for the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Never upgrade, even when STARTTLS is offered.
    None,
    /// Upgrade with STARTTLS when the relay offers it (default).
    #[default]
    Opportunistic,
    /// Fail the send when STARTTLS is not offered.
    Required,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(TlsMode::None),
            "opportunistic" | "starttls" => Ok(TlsMode::Opportunistic),
            "required" => Ok(TlsMode::Required),
            other => Err(format!("unknown TLS mode '{}'", other)),
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// TLS mode.
    #[serde(default)]
    pub mode: TlsMode,
    /// PEM file with additional trusted CA certificates.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// Name to verify the relay certificate against, instead of the host.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Relay connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay hostname.
    #[serde(default = "default_host")]
    pub host: String,
    /// Relay port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Authentication username; absent for network-trusted relays.
    #[serde(default)]
    pub username: Option<String>,
    /// Authentication password (never serialized).
    #[serde(skip)]
    pub password: Option<SecretString>,
    /// Preferred authentication method.
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,
    /// Connect and TLS handshake timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_host() -> String { DEFAULT_HOST.to_string() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            tls: TlsConfig::default(),
            username: None,
            password: None,
            auth_method: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            client_id: None,
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("auth_method", &self.auth_method)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl RelayConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("relay host is required".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("relay port must be non-zero".into()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::Invalid(
                "relay username and password must be set together".into(),
            ));
        }
        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(ConfigError::Invalid("relay timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Returns the full relay address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the name the relay certificate is verified against.
    pub fn tls_server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }

    /// Returns credentials when the relay requires authentication.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials::new(
                username.clone(),
                password.expose_secret().clone(),
            )),
            _ => None,
        }
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for relay configuration.
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    tls: TlsConfig,
    username: Option<String>,
    password: Option<SecretString>,
    auth_method: Option<AuthMethod>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    client_id: Option<String>,
}

impl RelayConfigBuilder {
    /// Sets the relay host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the relay port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets credentials for an authenticated relay.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the preferred authentication method.
    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls.mode = mode;
        self
    }

    /// Sets the TLS configuration.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    /// Disables STARTTLS.
    pub fn no_tls(mut self) -> Self {
        self.tls.mode = TlsMode::None;
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<RelayConfig, ConfigError> {
        let config = RelayConfig {
            host: self.host.unwrap_or_else(default_host),
            port: self.port.unwrap_or(DEFAULT_PORT),
            tls: self.tls,
            username: self.username,
            password: self.password,
            auth_method: self.auth_method,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Sender identity and internal mailboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Envelope sender and `From` address.
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Display name in the `From` header.
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Where lead notifications are delivered.
    #[serde(default = "default_team_address")]
    pub notification_address: String,
    /// Reply-To of the submitter confirmation.
    #[serde(default = "default_team_address")]
    pub reply_to: String,
}

fn default_from_address() -> String { "web-inquiry@gathercateringandevents.com".to_string() }
fn default_from_name() -> String { "Gather Catering and Events".to_string() }
fn default_team_address() -> String { "catering@gathercateringandevents.com".to_string() }

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            from_name: default_from_name(),
            notification_address: default_team_address(),
            reply_to: default_team_address(),
        }
    }
}

impl MailboxConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("from_address", &self.from_address),
            ("notification_address", &self.notification_address),
            ("reply_to", &self.reply_to),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} is required", name)));
            }
        }
        Ok(())
    }
}

/// HTTP boundary configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Origins allowed by the CORS policy.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_listen_addr() -> String { "0.0.0.0:8000".to_string() }

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://gathercateringandevents.com".to_string(),
        "https://gathercafeandevents.com".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServerConfig {
    /// Parses the listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("listen_addr '{}': {}", self.listen_addr, e)))
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InquiryConfig {
    /// Relay connection.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Sender identity and mailboxes.
    #[serde(default)]
    pub mailboxes: MailboxConfig,
    /// HTTP boundary.
    #[serde(default)]
    pub server: ServerConfig,
}

impl InquiryConfig {
    /// Loads configuration: the JSON file named by `GATHER_CONFIG` if set,
    /// then `GATHER_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file; missing sections take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `GATHER_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GATHER_SMTP_HOST") {
            self.relay.host = host;
        }
        if let Some(port) = lookup("GATHER_SMTP_PORT") {
            self.relay.port = port.trim().parse().map_err(|_| ConfigError::Environment {
                key: "GATHER_SMTP_PORT",
                message: format!("'{}' is not a port number", port),
            })?;
        }
        if let Some(mode) = lookup("GATHER_SMTP_TLS") {
            self.relay.tls.mode = mode
                .parse()
                .map_err(|message| ConfigError::Environment { key: "GATHER_SMTP_TLS", message })?;
        }
        if let Some(username) = lookup("GATHER_SMTP_USERNAME") {
            self.relay.username = Some(username);
        }
        if let Some(password) = lookup("GATHER_SMTP_PASSWORD") {
            self.relay.password = Some(SecretString::new(password));
        }
        if let Some(from) = lookup("GATHER_FROM_ADDRESS") {
            self.mailboxes.from_address = from;
        }
        if let Some(name) = lookup("GATHER_FROM_NAME") {
            self.mailboxes.from_name = name;
        }
        if let Some(address) = lookup("GATHER_NOTIFICATION_EMAIL") {
            self.mailboxes.notification_address = address;
        }
        if let Some(address) = lookup("GATHER_REPLY_TO") {
            self.mailboxes.reply_to = address;
        }
        if let Some(addr) = lookup("GATHER_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(origins) = lookup("GATHER_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;
        self.mailboxes.validate()?;
        self.server.socket_addr()?;
        Ok(())
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
