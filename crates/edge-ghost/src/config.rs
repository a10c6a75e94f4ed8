use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use edge_core::enum_str;
use edge_session::SessionConfig;

pub const DEFAULT_GHOST_ID: &str = "ghost.local";
pub const DEFAULT_ADMIN_LISTEN: &str = "127.0.0.1:7011";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SEED_IDS: &[&str] = &["seed.flow", "seed.kv"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    pub id: String,
    pub seeds: Vec<String>,
    /// Root for `seed.fs`; empty uses the seed's own default.
    pub fs_root: PathBuf,
    pub heartbeat_interval_ms: u64,
    /// Empty disables the admin listener.
    pub admin_listen: String,
    pub enable_cluster_host: bool,
    pub mirage: MirageLinkConfig,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_GHOST_ID.to_string(),
            seeds: DEFAULT_SEED_IDS.iter().map(|s| s.to_string()).collect(),
            fs_root: PathBuf::new(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            admin_listen: DEFAULT_ADMIN_LISTEN.to_string(),
            enable_cluster_host: false,
            mirage: MirageLinkConfig::default(),
        }
    }
}

impl GhostConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// How hard a Ghost tries to keep a Mirage session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiragePolicy {
    /// Never connect.
    #[default]
    Headless,
    /// Connect when possible; keep serving without a session.
    Auto,
    /// Refuse to run without an initial session.
    Required,
}

enum_str! {
    impl MiragePolicy {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Headless => ["headless"],
            Auto => ["auto"],
            Required => ["required"],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirageLinkConfig {
    pub policy: MiragePolicy,
    pub address: String,
    /// Defaults to the ghost id.
    pub peer_identity: String,
    /// Zero retries forever.
    pub max_connect_attempts: u32,
    pub session: SessionConfig,
}
