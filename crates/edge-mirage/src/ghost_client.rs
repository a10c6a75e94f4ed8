//! Mirage's side of the Ghost admin protocol.
//!
//! [`GhostAdminClient`] opens one connection per call. Commands travel as
//! binary Command frames through `execute_envelope` and come back as Event
//! frames, so the orchestrator sees exactly what a session would carry.

use std::io::Cursor;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ExecutorError, GhostAdminError, MirageError};
use crate::orchestrator::CommandExecutor;
use crate::server::{GhostSpawner, MirageServer};
use edge_core::{Command, Event, FrameLimits, now_ms, read_frame, write_frame};
use edge_ghost::{AdminRequest, EnvelopeReply, GhostStatus, SpawnGhostRequest, SpawnGhostResult};
use edge_session::{CancelToken, SeedInfo, admin};

pub const GHOST_ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Target used when a command names no ghost.
pub const DEFAULT_TARGET_GHOST: &str = "ghost.local";

#[derive(Debug)]
pub struct GhostAdminClient {
    admin_addr: String,
    timeout: Duration,
    /// Envelope message ids. Seeded from the clock so they stay clear of
    /// ids the Ghost already holds from earlier Mirage runs and from its
    /// own admin sequence.
    next_message_id: AtomicU64,
}

impl GhostAdminClient {
    pub fn new(admin_addr: &str) -> Self {
        Self {
            admin_addr: admin_addr.trim().to_string(),
            timeout: GHOST_ADMIN_TIMEOUT,
            next_message_id: AtomicU64::new(now_ms()),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn admin_addr(&self) -> &str {
        &self.admin_addr
    }

    pub fn status(&self, cancel: &CancelToken) -> Result<GhostStatus, GhostAdminError> {
        self.call(cancel, "status", &AdminRequest::action("status"))
    }

    pub fn list_seeds(&self, cancel: &CancelToken) -> Result<Vec<SeedInfo>, GhostAdminError> {
        let seeds: Vec<SeedInfo> =
            self.call(cancel, "list_seeds", &AdminRequest::action("list_seeds"))?;
        Ok(seeds
            .into_iter()
            .map(|seed| SeedInfo {
                id: seed.id.trim().to_string(),
                name: seed.name.trim().to_string(),
                description: seed.description.trim().to_string(),
            })
            .collect())
    }

    pub fn spawn_ghost(
        &self,
        cancel: &CancelToken,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, GhostAdminError> {
        let request = AdminRequest {
            spawn: req.clone(),
            ..AdminRequest::action("spawn_ghost")
        };
        self.call(cancel, "spawn_ghost", &request)
    }

    /// Sends `command` as a Command frame and decodes the Event frame the
    /// Ghost answers with.
    pub fn execute_envelope(
        &self,
        cancel: &CancelToken,
        command: &Command,
    ) -> Result<Event, GhostAdminError> {
        let ghost_id = match command.ghost_id.trim() {
            "" => DEFAULT_TARGET_GHOST,
            id => id,
        };
        let command = Command {
            command_id: command.command_id.trim().to_string(),
            intent_id: command.intent_id.trim().to_string(),
            ghost_id: ghost_id.to_string(),
            seed_selector: command.seed_selector.trim().to_string(),
            operation: command.operation.trim().to_string(),
            args: command.args.clone(),
        };
        let limits = FrameLimits::default();
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let mut command_frame = Vec::new();
        write_frame(&mut command_frame, &command.encode_frame(message_id)?, limits)?;

        let request = AdminRequest {
            command_frame,
            ..AdminRequest::action("execute_envelope")
        };
        let reply: EnvelopeReply = self.call(cancel, "execute_envelope", &request)?;
        let frame = read_frame(&mut Cursor::new(reply.event_frame), limits)?;
        Ok(Event::decode_frame(&frame)?)
    }

    fn call<T: DeserializeOwned>(
        &self,
        cancel: &CancelToken,
        action: &'static str,
        request: &AdminRequest,
    ) -> Result<T, GhostAdminError> {
        cancel.check()?;
        if self.admin_addr.is_empty() {
            return Err(GhostAdminError::AddrRequired);
        }
        tracing::debug!(addr = %self.admin_addr, action, "ghost control call");
        let response = admin::call(&self.admin_addr, request, cancel.clamp(self.timeout))
            .map_err(|source| GhostAdminError::Call { action, source })?;
        if !response.ok {
            return Err(GhostAdminError::Remote {
                action,
                message: response.error.unwrap_or_default().trim().to_string(),
            });
        }
        response
            .into_data()
            .map_err(|source| GhostAdminError::Call { action, source })
    }
}

/// Dispatches orchestrator commands to one Ghost's admin listener.
#[derive(Debug)]
pub struct AdminCommandExecutor {
    client: GhostAdminClient,
}

impl AdminCommandExecutor {
    pub fn new(client: GhostAdminClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GhostAdminClient {
        &self.client
    }
}

impl CommandExecutor for AdminCommandExecutor {
    fn execute_command(
        &self,
        cancel: &CancelToken,
        command: Command,
    ) -> Result<Event, ExecutorError> {
        let mut event = self.client.execute_envelope(cancel, &command)?;
        fill_blank(&mut event.command_id, &command.command_id);
        fill_blank(&mut event.intent_id, &command.intent_id);
        fill_blank(&mut event.ghost_id, &command.ghost_id);
        fill_blank(&mut event.seed_id, &command.seed_selector);
        if event.timestamp_ms == 0 {
            event.timestamp_ms = now_ms();
        }
        event.validate()?;
        Ok(event)
    }
}

fn fill_blank(field: &mut String, fallback: &str) {
    if field.trim().is_empty() {
        *field = fallback.trim().to_string();
    }
}

/// Spawns children through the local root Ghost and wires an executor for
/// each one into the Mirage server.
pub struct GhostAdminSpawner {
    root: GhostAdminClient,
    server: Arc<MirageServer>,
}

impl std::fmt::Debug for GhostAdminSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostAdminSpawner")
            .field("root", &self.root.admin_addr())
            .finish()
    }
}

impl GhostAdminSpawner {
    pub fn new(root: GhostAdminClient, server: Arc<MirageServer>) -> Self {
        Self { root, server }
    }
}

impl GhostSpawner for GhostAdminSpawner {
    fn spawn_local_ghost(
        &self,
        cancel: &CancelToken,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, MirageError> {
        let spawned = self.root.spawn_ghost(cancel, req)?;
        let admin_addr = normalize_ghost_admin_addr(&spawned.admin_addr)?;
        let executor = AdminCommandExecutor::new(GhostAdminClient::new(&admin_addr));
        self.server
            .register_executor(&spawned.ghost_id, Arc::new(executor))?;
        tracing::info!(
            ghost_id = %spawned.ghost_id,
            admin_addr = %admin_addr,
            "local ghost spawned"
        );
        Ok(spawned)
    }
}

/// Turns a configured Ghost admin address into `ip:port`.
///
/// A blank host or `localhost` becomes `127.0.0.1`; other names are
/// resolved, preferring IPv4.
pub fn normalize_ghost_admin_addr(raw: &str) -> Result<String, GhostAdminError> {
    let addr = raw.trim();
    if addr.is_empty() {
        return Err(GhostAdminError::AddrRequired);
    }
    let invalid = || GhostAdminError::InvalidAddr {
        addr: addr.to_string(),
    };
    let (host, port) = split_host_port(addr).ok_or_else(invalid)?;
    let port: u16 = port.trim().parse().map_err(|_| invalid())?;
    let host = host.trim();

    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return Ok(format!("127.0.0.1:{port}"));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port).to_string());
    }
    let resolved: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| GhostAdminError::Resolve {
            host: host.to_string(),
            reason: err.to_string(),
        })?
        .collect();
    resolved
        .iter()
        .find(|candidate| candidate.is_ipv4())
        .or_else(|| resolved.first())
        .map(SocketAddr::to_string)
        .ok_or_else(|| GhostAdminError::Resolve {
            host: host.to_string(),
            reason: "no addresses".to_string(),
        })
}

/// `host:port` or `[v6]:port`. A bare IPv6 address without brackets is
/// ambiguous and rejected.
fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_loopback_names() {
        assert_eq!(
            normalize_ghost_admin_addr("localhost:7011").unwrap(),
            "127.0.0.1:7011"
        );
        assert_eq!(
            normalize_ghost_admin_addr(" LOCALHOST:7011 ").unwrap(),
            "127.0.0.1:7011"
        );
        assert_eq!(normalize_ghost_admin_addr(":7011").unwrap(), "127.0.0.1:7011");
        assert_eq!(
            normalize_ghost_admin_addr("10.0.0.5:80").unwrap(),
            "10.0.0.5:80"
        );
        assert_eq!(normalize_ghost_admin_addr("[::1]:7011").unwrap(), "[::1]:7011");
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(matches!(
            normalize_ghost_admin_addr("  "),
            Err(GhostAdminError::AddrRequired)
        ));
        for bad in ["7011", "host:", "host:port", "::1:80", "[::1]80", "host:70000"] {
            assert!(
                matches!(
                    normalize_ghost_admin_addr(bad),
                    Err(GhostAdminError::InvalidAddr { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn blank_event_fields_come_from_the_command() {
        let mut event = Event {
            command_id: " ".into(),
            ghost_id: "ghost.beta".into(),
            ..Event::default()
        };
        fill_blank(&mut event.command_id, "cmd.1");
        fill_blank(&mut event.ghost_id, "ghost.alpha");
        assert_eq!(event.command_id, "cmd.1");
        assert_eq!(event.ghost_id, "ghost.beta");
    }

    #[test]
    fn calls_fail_fast_when_cancelled_or_unaddressed() {
        let cancel = CancelToken::new();
        let err = GhostAdminClient::new("").status(&cancel).unwrap_err();
        assert!(matches!(err, GhostAdminError::AddrRequired));

        cancel.cancel();
        let err = GhostAdminClient::new("127.0.0.1:1")
            .status(&cancel)
            .unwrap_err();
        assert!(matches!(err, GhostAdminError::Interrupted(_)));
    }

    #[test]
    fn unreachable_ghost_is_a_retryable_call_error() {
        let client = GhostAdminClient::new("127.0.0.1:1").with_timeout(Duration::from_millis(200));
        let err = client.status(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, GhostAdminError::Call { action: "status", .. }));
        assert!(err.transience().is_retryable());
    }
}
