//! Connection and scanner configuration types.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_USERNAME_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 256;

/// How to authenticate against the device.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Plain password authentication.
    Password(String),
    /// Private key file with optional passphrase.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Keys held by a running ssh-agent.
    Agent,
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// A resolved SSH endpoint plus credentials.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ConnectionConfig {
    /// Hostname or IP address of the device.
    pub host: String,

    /// SSH port.
    #[builder(default = "DEFAULT_SSH_PORT")]
    pub port: u16,

    /// Login name.
    pub username: String,

    /// Credential used to authenticate.
    pub auth: AuthMethod,

    /// TCP connect and SSH I/O timeout.
    #[builder(default = "Duration::from_secs(10)")]
    pub timeout: Duration,
}

impl ConnectionConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.host {
            Some(ref host) => validate_hostname(host)?,
            None => return Err("Host is required".to_string()),
        }
        match self.username {
            Some(ref username) => validate_username(username)?,
            None => return Err("Username is required".to_string()),
        }
        if let Some(AuthMethod::Password(ref password)) = self.auth {
            validate_password(password)?;
        }
        if self.port == Some(0) {
            return Err("Port cannot be 0".to_string());
        }
        Ok(())
    }
}

impl ConnectionConfig {
    /// Create a new connection config builder.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// `host:port` for display and socket resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for sweeping a network range for SSH endpoints.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScannerConfig {
    /// IPv4 network in CIDR notation, e.g. `192.168.1.0/24`.
    pub network_range: String,

    /// Number of probes in flight per batch.
    #[builder(default = "50")]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-host TCP connect timeout in milliseconds.
    #[builder(default = "500")]
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Port probed on every host.
    #[builder(default = "DEFAULT_SSH_PORT")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Attempt reverse DNS for each host.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,

    /// Case-insensitive hostname substrings that mark a likely device.
    #[builder(default = "default_target_hints()")]
    #[serde(default = "default_target_hints")]
    pub target_hints: Vec<String>,

    /// Report every open port, not only hosts that look like a device.
    #[builder(default = "false")]
    #[serde(default)]
    pub include_all_hosts: bool,
}

fn default_concurrency() -> usize {
    50
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_true() -> bool {
    true
}

fn default_target_hints() -> Vec<String> {
    vec!["raspberry".to_string()]
}

impl ScannerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.network_range {
            Some(ref range) => {
                parse_network_range(range).map_err(|e| e.to_string())?;
            }
            None => return Err("Network range is required".to_string()),
        }
        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScannerConfig {
    /// Create a new scanner config builder.
    pub fn builder() -> ScannerConfigBuilder {
        ScannerConfigBuilder::default()
    }

    /// Create a config with defaults for the given range.
    pub fn new(network_range: impl Into<String>) -> Self {
        Self {
            network_range: network_range.into(),
            concurrency: default_concurrency(),
            connect_timeout_ms: default_connect_timeout_ms(),
            port: DEFAULT_SSH_PORT,
            resolve_hostnames: true,
            target_hints: default_target_hints(),
            include_all_hosts: false,
        }
    }

    /// Per-host connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parse and validate the configured network range.
    pub fn network(&self) -> Result<Ipv4Net, SyncError> {
        parse_network_range(&self.network_range)
    }

    /// Whether a resolved hostname looks like one of our devices.
    ///
    /// Hosts without a resolvable name count as plausible.
    pub fn looks_like_target(&self, hostname: &str) -> bool {
        if hostname.is_empty() {
            return true;
        }
        let lower = hostname.to_lowercase();
        self.target_hints
            .iter()
            .any(|hint| lower.contains(&hint.to_lowercase()))
    }
}

/// Parse a CIDR range into an IPv4 network that has host addresses.
pub fn parse_network_range(range: &str) -> Result<Ipv4Net, SyncError> {
    let trimmed = range.trim();
    let invalid = |message: String| SyncError::InvalidNetwork {
        range: range.to_string(),
        message,
    };

    if trimmed.is_empty() {
        return Err(invalid("range cannot be empty".to_string()));
    }

    let net: Ipv4Net = trimmed.parse().map_err(|e| invalid(format!("{e}")))?;
    if net.trunc() != net {
        return Err(invalid(format!("has host bits set (did you mean {}?)", net.trunc())));
    }
    if net.hosts().next().is_none() {
        return Err(invalid("contains no host addresses".to_string()));
    }

    Ok(net)
}

/// Validate a hostname or IP address.
pub fn validate_hostname(host: &str) -> Result<(), String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("Hostname cannot be empty".to_string());
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(format!("Invalid hostname: {host}"));
    }

    let labels = host.strip_suffix('.').unwrap_or(host);
    let valid = labels.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    if valid {
        Ok(())
    } else {
        Err(format!("Invalid hostname: {host}"))
    }
}

/// Validate an SSH login name.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.trim().is_empty() {
        return Err("Username cannot be empty".to_string());
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(format!("Username too long (max {MAX_USERNAME_LEN} characters)"));
    }
    Ok(())
}

/// Validate a password credential.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password cannot be empty".to_string());
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(format!("Password too long (max {MAX_PASSWORD_LEN} characters)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_builder() {
        let config = ConnectionConfig::builder()
            .host("192.168.1.40")
            .username("pi")
            .auth(AuthMethod::Password("raspberry".to_string()))
            .build()
            .unwrap();

        assert_eq!(config.port, 22);
        assert_eq!(config.endpoint(), "192.168.1.40:22");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_connection_builder_rejects_bad_input() {
        let err = ConnectionConfig::builder()
            .host("bad host!")
            .username("pi")
            .auth(AuthMethod::Agent)
            .build();
        assert!(err.is_err());

        let err = ConnectionConfig::builder()
            .host("pi.local")
            .username("a".repeat(33))
            .auth(AuthMethod::Agent)
            .build();
        assert!(err.is_err());

        let err = ConnectionConfig::builder()
            .host("pi.local")
            .username("pi")
            .auth(AuthMethod::Password(String::new()))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_auth_debug_redacts_password() {
        let auth = AuthMethod::Password("hunter2".to_string());
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn test_validate_hostname() {
        assert!(validate_hostname("10.0.0.1").is_ok());
        assert!(validate_hostname("raspberrypi.local").is_ok());
        assert!(validate_hostname("raspberrypi.local.").is_ok());
        assert!(validate_hostname("-pi").is_err());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("a..b").is_err());
    }

    #[test]
    fn test_parse_network_range() {
        let net = parse_network_range("10.0.0.0/30").unwrap();
        assert_eq!(net.hosts().count(), 2);

        assert!(parse_network_range("10.0.0.1/30").is_err());
        assert!(parse_network_range("not-a-network").is_err());
        assert!(parse_network_range("").is_err());
        assert!(parse_network_range("fe80::/64").is_err());
    }

    #[test]
    fn test_scanner_builder_defaults() {
        let config = ScannerConfig::builder()
            .network_range("192.168.1.0/24")
            .build()
            .unwrap();

        assert_eq!(config.concurrency, 50);
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.port, 22);
        assert!(!config.include_all_hosts);

        assert!(ScannerConfig::builder()
            .network_range("192.168.1.0/24")
            .concurrency(0usize)
            .build()
            .is_err());
    }

    #[test]
    fn test_looks_like_target() {
        let config = ScannerConfig::new("192.168.1.0/24");
        assert!(config.looks_like_target(""));
        assert!(config.looks_like_target("RaspberryPi.lan"));
        assert!(!config.looks_like_target("printer.lan"));
    }
}
