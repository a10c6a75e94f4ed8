//! In-process child Ghosts managed by a host Ghost.
//!
//! Each child is a full [`GhostService`] with its own admin listener. It
//! inherits the host's seeds and heartbeat, never hosts children itself
//! and never talks to Mirage.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GhostConfig, MiragePolicy};
use crate::error::GhostError;
use crate::service::{GhostRuntime, GhostService};
use edge_session::CancelToken;

/// How long shutdown waits for each child before moving on.
pub const CHILD_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    #[error("cluster host disabled")]
    Disabled,
    #[error("target_name required")]
    TargetNameRequired,
    #[error("admin_addr required")]
    AdminAddrRequired,
    #[error("managed ghost already exists: {target}")]
    ManagedGhostExists { target: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnGhostRequest {
    pub target_name: String,
    pub admin_addr: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnGhostResult {
    pub target_name: String,
    pub ghost_id: String,
    /// The address the child actually bound.
    pub admin_addr: String,
}

struct ManagedGhost {
    runtime: GhostRuntime,
    cancel: CancelToken,
}

#[derive(Default)]
pub(crate) struct ClusterHost {
    managed: Mutex<BTreeMap<String, ManagedGhost>>,
}

impl std::fmt::Debug for ClusterHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHost")
            .field("managed", &self.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClusterHost {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ManagedGhost>> {
        match self.managed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn spawn(
        &self,
        host: &GhostConfig,
        host_id: &str,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, GhostError> {
        if !host.enable_cluster_host {
            tracing::warn!(
                target_name = %req.target_name,
                admin_addr = %req.admin_addr,
                "spawn rejected: cluster host disabled"
            );
            return Err(ClusterError::Disabled.into());
        }
        let suffix = normalize_node_suffix(&req.target_name);
        let admin_addr = req.admin_addr.trim();
        if suffix.is_empty() {
            return Err(ClusterError::TargetNameRequired.into());
        }
        if admin_addr.is_empty() {
            return Err(ClusterError::AdminAddrRequired.into());
        }

        let ghost_id = format!("{host_id}.{suffix}");
        // Held across the child's start so two spawns of one target cannot
        // both pass the existence check.
        let mut managed = self.lock();
        if managed.contains_key(&ghost_id) {
            tracing::warn!(target = %ghost_id, "spawn rejected: already exists");
            return Err(ClusterError::ManagedGhostExists { target: ghost_id }.into());
        }

        let child_cfg = GhostConfig {
            id: ghost_id.clone(),
            seeds: host.seeds.clone(),
            fs_root: host.fs_root.clone(),
            heartbeat_interval_ms: host.heartbeat_interval_ms,
            admin_listen: admin_addr.to_string(),
            enable_cluster_host: false,
            mirage: Default::default(),
        };
        debug_assert_eq!(child_cfg.mirage.policy, MiragePolicy::Headless);

        let child = GhostService::bootstrap(child_cfg)?;
        let cancel = CancelToken::new();
        let runtime = child.start(&cancel)?;
        let bound = runtime
            .admin_addr()
            .map_or_else(|| admin_addr.to_string(), |addr: SocketAddr| addr.to_string());
        tracing::info!(target = %ghost_id, admin_addr = %bound, "child ghost started");

        managed.insert(ghost_id.clone(), ManagedGhost { runtime, cancel });
        Ok(SpawnGhostResult {
            target_name: ghost_id.clone(),
            ghost_id,
            admin_addr: bound,
        })
    }

    /// Cancels every child and waits up to [`CHILD_STOP_GRACE`] for each.
    pub fn stop_all(&self) {
        let children = std::mem::take(&mut *self.lock());
        for (target, child) in children {
            tracing::info!(%target, "stopping child ghost");
            child.cancel.cancel();
            let (done_tx, done_rx) = channel::bounded(1);
            thread::spawn(move || {
                child.runtime.shutdown();
                let _ = done_tx.send(());
            });
            if done_rx.recv_timeout(CHILD_STOP_GRACE).is_err() {
                tracing::warn!(%target, "child ghost did not stop in time");
            }
        }
    }
}

/// Lowercases, keeps `[a-z0-9]`, maps `. - _` and space to `.`, then trims
/// and collapses dots. Everything else is dropped.
pub fn normalize_node_suffix(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars().map(|c| c.to_ascii_lowercase()) {
        match ch {
            'a'..='z' | '0'..='9' => out.push(ch),
            '.' | '-' | '_' | ' ' if !out.is_empty() && !out.ends_with('.') => out.push('.'),
            _ => {}
        }
    }
    while out.ends_with('.') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_normalization() {
        assert_eq!(normalize_node_suffix("edge-1"), "edge.1");
        assert_eq!(normalize_node_suffix("  Edge_Node 2 "), "edge.node.2");
        assert_eq!(normalize_node_suffix("..a--b..!"), "a.b");
        assert_eq!(normalize_node_suffix("a/b"), "ab");
        assert_eq!(normalize_node_suffix("---"), "");
        assert_eq!(normalize_node_suffix(""), "");
    }

    fn host_config(enabled: bool) -> GhostConfig {
        GhostConfig {
            id: "ghost.local".into(),
            admin_listen: String::new(),
            enable_cluster_host: enabled,
            ..GhostConfig::default()
        }
    }

    #[test]
    fn spawn_requires_enabled_host_and_fields() {
        let host = ClusterHost::default();
        let req = SpawnGhostRequest {
            target_name: "edge-1".into(),
            admin_addr: "127.0.0.1:0".into(),
        };
        let err = host.spawn(&host_config(false), "ghost.local", &req).unwrap_err();
        assert!(matches!(err, GhostError::Cluster(ClusterError::Disabled)));

        let blank_name = SpawnGhostRequest {
            target_name: " - ".into(),
            ..req.clone()
        };
        let err = host
            .spawn(&host_config(true), "ghost.local", &blank_name)
            .unwrap_err();
        assert!(matches!(err, GhostError::Cluster(ClusterError::TargetNameRequired)));

        let blank_addr = SpawnGhostRequest {
            admin_addr: "  ".into(),
            ..req
        };
        let err = host
            .spawn(&host_config(true), "ghost.local", &blank_addr)
            .unwrap_err();
        assert!(matches!(err, GhostError::Cluster(ClusterError::AdminAddrRequired)));
        assert_eq!(host.len(), 0);
    }

    #[test]
    fn spawned_child_is_tracked_and_stopped() {
        let host = ClusterHost::default();
        let req = SpawnGhostRequest {
            target_name: "edge-1".into(),
            admin_addr: "127.0.0.1:0".into(),
        };
        let out = host.spawn(&host_config(true), "ghost.local", &req).unwrap();
        assert_eq!(out.ghost_id, "ghost.local.edge.1");
        assert_eq!(out.target_name, "ghost.local.edge.1");
        assert_ne!(out.admin_addr, "127.0.0.1:0");

        let err = host.spawn(&host_config(true), "ghost.local", &req).unwrap_err();
        assert!(matches!(
            err,
            GhostError::Cluster(ClusterError::ManagedGhostExists { .. })
        ));

        assert_eq!(host.len(), 1);
        host.stop_all();
        assert_eq!(host.len(), 0);
        assert!(std::net::TcpStream::connect(out.admin_addr.as_str()).is_err());
    }
}
