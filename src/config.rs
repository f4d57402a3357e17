//! Configuration management

use std::{env, fs, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// TLS configuration
    pub tls: TlsConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `TLS_GATEWAY_` prefix with `__` as the
    /// nesting separator, e.g. `TLS_GATEWAY_TLS__ENABLED=true`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("TLS_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that can never start.
    pub fn validate(&self) -> Result<()> {
        if !self.tls.enabled {
            return Ok(());
        }
        if self.tls.identity.path.trim().is_empty() {
            return Err(Error::Config(
                "tls.identity.path is required when tls.enabled is true".to_string(),
            ));
        }
        if self.tls.client_auth_required && self.tls.trust_anchors.is_none() {
            return Err(Error::Config(
                "tls.trust_anchors is required when tls.client_auth_required is true".to_string(),
            ));
        }
        for (name, timeout) in [
            ("server.hello_timeout", self.server.hello_timeout),
            ("server.client_certificate_timeout", self.server.client_certificate_timeout),
            ("server.handshake_timeout", self.server.handshake_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deadline for the client's first flight (ClientHello)
    #[serde(with = "humantime_serde")]
    pub hello_timeout: Duration,
    /// Deadline for the client certificate flight in mutual mode
    #[serde(with = "humantime_serde")]
    pub client_certificate_timeout: Duration,
    /// Deadline for key exchange completion
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Graceful shutdown timeout for in-flight connections
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            hello_timeout: Duration::from_secs(10),
            client_certificate_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS configuration
///
/// `enabled: false` serves plaintext; `enabled: true` with
/// `client_auth_required: false` serves server-authenticated TLS; both true
/// enforces mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Negotiate TLS on accepted connections
    pub enabled: bool,
    /// Require and verify client certificates
    pub client_auth_required: bool,
    /// Server identity: PEM bundle with certificate chain and private key
    pub identity: KeySourceConfig,
    /// Trust anchors for client certificates: PEM bundle of CA certificates
    pub trust_anchors: Option<KeySourceConfig>,
    /// Names (DNS or IP) a client certificate must carry in its SANs.
    /// Empty disables the check.
    pub client_names: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_auth_required: true,
            identity: KeySourceConfig::default(),
            trust_anchors: None,
            client_names: Vec::new(),
        }
    }
}

/// A key material file plus its optional password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySourceConfig {
    /// Path to the PEM file
    pub path: String,
    /// Password (supports `env:VAR_NAME`)
    pub password: Option<String>,
}

impl KeySourceConfig {
    /// Source at `path` without a password.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: None,
        }
    }

    /// Resolve the password, following `env:VAR_NAME` indirection.
    ///
    /// An unset variable resolves to no password, so the keystore reports
    /// `PasswordRequired` instead of trying the literal reference.
    pub fn resolve_password(&self) -> Option<String> {
        let password = self.password.as_deref()?;
        if let Some(var_name) = password.strip_prefix("env:") {
            env::var(var_name).ok()
        } else {
            Some(password.to_string())
        }
    }

    /// Read the raw bytes of the source.
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path)
            .map_err(|e| Error::Config(format!("Cannot read key material '{}': {e}", self.path)))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
