//! `edgectl` configuration: one TOML file with `[ghost]`, `[mirage]` and
//! `[logging]` tables, then `EDGE_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use edge_ghost::GhostConfig;
use edge_mirage::MirageConfig;
use edge_session::SecurityMode;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ghost: GhostConfig,
    pub mirage: MirageConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    /// `EnvFilter` directives used when `LOG` is unset.
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Pretty,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    /// Defaults to `logs` under the working directory.
    pub dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

/// Reads `path` (a missing file means defaults) and applies environment
/// overrides. `None` skips the file entirely.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_env_overrides_from<F>(config: &mut Config, mut lookup: F)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut text = |key: &str, target: &mut String| {
        if let Some(raw) = lookup(key) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                tracing::warn!("empty {key}, ignoring");
            } else {
                *target = trimmed.to_string();
            }
        }
    };
    text("EDGE_GHOST_ID", &mut config.ghost.id);
    text("EDGE_GHOST_ADMIN_LISTEN", &mut config.ghost.admin_listen);
    text("EDGE_MIRAGE_ADDRESS", &mut config.ghost.mirage.address);
    text("EDGE_MIRAGE_LISTEN", &mut config.mirage.listen_addr);
    text("EDGE_MIRAGE_ADMIN_LISTEN", &mut config.mirage.admin_listen_addr);

    if let Some(raw) = lookup("EDGE_SECURITY_MODE") {
        match SecurityMode::parse(&raw) {
            Ok(mode) => {
                config.ghost.mirage.session.security_mode = mode;
                config.mirage.session.security_mode = mode;
            }
            Err(err) => tracing::warn!("invalid EDGE_SECURITY_MODE, ignoring: {err}"),
        }
    }

    if let Some(raw) = lookup("EDGE_LOG_STDOUT_FORMAT") {
        if let Some(format) = parse_log_format(&raw) {
            config.logging.stdout_format = format;
        } else {
            tracing::warn!("invalid EDGE_LOG_STDOUT_FORMAT, ignoring: {raw}");
        }
    }

    if let Some(raw) = lookup("EDGE_LOG_FILTER") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.logging.filter = Some(trimmed.to_string());
        }
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_ghost::MiragePolicy;

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ghost.id, "ghost.local");
        assert_eq!(config.mirage.listen_addr, "127.0.0.1:9000");
        assert!(config.logging.stdout);
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.toml");
        fs::write(
            &path,
            r#"
[ghost]
id = "ghost.edge"
heartbeat_interval_ms = 250

[ghost.mirage]
policy = "auto"
address = "10.0.0.1:9000"

[ghost.mirage.session]
security_mode = "production"
ack_timeout_ms = 1000

[ghost.mirage.session.tls]
enabled = true
mutual = true
ca_file = "ca.pem"

[mirage]
local_ghost_id = "ghost.edge"
local_ghost_admin_addr = "127.0.0.1:7011"

[logging]
stdout_format = "json"

[logging.file]
enabled = true
rotation = "hourly"
"#,
        )
        .unwrap();

        let config = load_file(&path).unwrap();
        assert_eq!(config.ghost.id, "ghost.edge");
        assert_eq!(config.ghost.heartbeat_interval_ms, 250);
        assert_eq!(config.ghost.seeds, vec!["seed.flow", "seed.kv"]);
        assert_eq!(config.ghost.mirage.policy, MiragePolicy::Auto);
        let session = &config.ghost.mirage.session;
        assert_eq!(session.security_mode, SecurityMode::Production);
        assert_eq!(session.ack_timeout_ms, 1000);
        assert_eq!(session.connect_timeout_ms, 5_000);
        assert_eq!(session.tls.ca_file.as_deref(), Some(Path::new("ca.pem")));
        assert_eq!(config.mirage.id, "mirage.local");
        config.mirage.validate().unwrap();
        assert_eq!(config.logging.stdout_format, LogFormat::Json);
        assert_eq!(config.logging.file.rotation, LogRotation::Hourly);
        assert!(config.logging.file.enabled);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.toml");
        fs::write(&path, "[ghost\nid = 1").unwrap();
        assert!(matches!(load_file(&path), Err(ConfigError::Parse { .. })));

        fs::write(&path, "[ghost.mirage]\npolicy = \"sometimes\"\n").unwrap();
        assert!(matches!(load_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let lookup = |key: &str| -> Option<String> {
            match key {
                "EDGE_GHOST_ID" => Some(" ghost.env ".to_string()),
                "EDGE_GHOST_ADMIN_LISTEN" => Some("0.0.0.0:7111".to_string()),
                "EDGE_MIRAGE_ADDRESS" => Some("mirage:9000".to_string()),
                "EDGE_MIRAGE_LISTEN" => Some("0.0.0.0:9100".to_string()),
                "EDGE_MIRAGE_ADMIN_LISTEN" => Some("0.0.0.0:7110".to_string()),
                "EDGE_SECURITY_MODE" => Some("Production".to_string()),
                "EDGE_LOG_STDOUT_FORMAT" => Some("compact".to_string()),
                "EDGE_LOG_FILTER" => Some("edge_mirage=debug".to_string()),
                _ => None,
            }
        };
        let mut config = Config::default();
        apply_env_overrides_from(&mut config, lookup);

        assert_eq!(config.ghost.id, "ghost.env");
        assert_eq!(config.ghost.admin_listen, "0.0.0.0:7111");
        assert_eq!(config.ghost.mirage.address, "mirage:9000");
        assert_eq!(config.mirage.listen_addr, "0.0.0.0:9100");
        assert_eq!(config.mirage.admin_listen_addr, "0.0.0.0:7110");
        assert_eq!(
            config.ghost.mirage.session.security_mode,
            SecurityMode::Production
        );
        assert_eq!(config.mirage.session.security_mode, SecurityMode::Production);
        assert_eq!(config.logging.stdout_format, LogFormat::Compact);
        assert_eq!(config.logging.filter.as_deref(), Some("edge_mirage=debug"));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let lookup = |key: &str| -> Option<String> {
            match key {
                "EDGE_GHOST_ID" => Some("   ".to_string()),
                "EDGE_SECURITY_MODE" => Some("staging".to_string()),
                "EDGE_LOG_STDOUT_FORMAT" => Some("tree".to_string()),
                _ => None,
            }
        };
        let mut config = Config::default();
        apply_env_overrides_from(&mut config, lookup);
        assert_eq!(config, Config::default());
    }
}
