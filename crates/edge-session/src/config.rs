//! Session tunables shared by the Ghost client and the Mirage listener.
//!
//! Durations are stored as integer milliseconds so the structs map directly
//! onto `*_ms` keys in TOML. A zero value means "use the default"; call
//! [`SessionConfig::with_defaults`] before use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::security::SecurityError;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SESSION_DEAD_AFTER_MS: u64 = 15_000;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 250;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub session_dead_after_ms: u64,
    pub ack_timeout_ms: u64,
    pub backoff: BackoffConfig,
    pub security_mode: SecurityMode,
    pub tls: TlsConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            session_dead_after_ms: DEFAULT_SESSION_DEAD_AFTER_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            backoff: BackoffConfig::default(),
            security_mode: SecurityMode::Development,
            tls: TlsConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Replaces every zero duration (and a non-positive multiplier) with its
    /// default. TLS settings are left untouched.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        fill(&mut self.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        fill(&mut self.handshake_timeout_ms, DEFAULT_HANDSHAKE_TIMEOUT_MS);
        fill(&mut self.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
        fill(&mut self.write_timeout_ms, DEFAULT_WRITE_TIMEOUT_MS);
        fill(&mut self.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        fill(&mut self.session_dead_after_ms, DEFAULT_SESSION_DEAD_AFTER_MS);
        fill(&mut self.ack_timeout_ms, DEFAULT_ACK_TIMEOUT_MS);
        fill(&mut self.backoff.initial_delay_ms, DEFAULT_BACKOFF_INITIAL_MS);
        fill(&mut self.backoff.max_delay_ms, DEFAULT_BACKOFF_MAX_MS);
        if self.backoff.multiplier <= 0.0 || !self.backoff.multiplier.is_finite() {
            self.backoff.multiplier = DEFAULT_BACKOFF_MULTIPLIER;
        }
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn fill(slot: &mut u64, default: u64) {
    if *slot == 0 {
        *slot = default;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    /// Zero disables the cap.
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_BACKOFF_INITIAL_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_BACKOFF_MAX_MS,
            jitter: true,
        }
    }
}

/// Transport policy. Production forbids plaintext and one-way TLS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SecurityMode {
    #[default]
    Development,
    Production,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Development => "development",
            SecurityMode::Production => "production",
        }
    }

    /// Blank input means development; matching is case-insensitive.
    pub fn parse(raw: &str) -> Result<Self, SecurityError> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "development" => Ok(SecurityMode::Development),
            "production" => Ok(SecurityMode::Production),
            _ => Err(SecurityError::InvalidSecurityMode {
                mode: raw.trim().to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SecurityMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SecurityMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SecurityMode::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// PEM file locations and TLS switches. Blank paths count as unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub mutual: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Defaults to the host part of the dial address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn ca_path(&self) -> Option<&Path> {
        present(&self.ca_file)
    }

    pub fn cert_path(&self) -> Option<&Path> {
        present(&self.cert_file)
    }

    pub fn key_path(&self) -> Option<&Path> {
        present(&self.key_file)
    }
}

fn present(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref()
        .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
}
