//! Mirage lifecycle, the registered Ghost table and the report history.
//!
//! A Mirage moves `boot -> appeared -> shimmer -> seeded` once. Every Ghost
//! that registers or sends an event gets an entry that survives
//! disconnects, together with an ack cache keyed by `event_id`: a replayed
//! event gets the cached ack back verbatim, timestamp included.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::MirageError;
use crate::orchestrator::{CommandExecutor, IntentSnapshot, Issue, Orchestrator};
use edge_core::{AckStatus, Event, EventAck, Report, enum_str, now_ms};
use edge_ghost::{SpawnGhostRequest, SpawnGhostResult};
use edge_session::{CancelToken, Registration, RegistrationAck, SeedInfo};

/// Ack code sent with a rejected registration.
pub const REGISTRATION_REJECTED_CODE: u32 = 403;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiragePhase {
    #[default]
    Boot,
    Appeared,
    Shimmer,
    Seeded,
}

enum_str! {
    impl MiragePhase {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Boot => ["boot"],
            Appeared => ["appeared"],
            Shimmer => ["shimmer"],
            Seeded => ["seeded"],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirageStatus {
    pub mirage_id: String,
    pub phase: MiragePhase,
    pub registered_ghosts: usize,
    pub active_intents: usize,
    pub report_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredGhost {
    pub ghost_id: String,
    /// Empty while disconnected.
    pub remote_addr: String,
    pub seed_list: Vec<SeedInfo>,
    pub connected: bool,
    pub registered_at_ms: u64,
    /// Zero until the first event.
    pub last_event_at_ms: u64,
    pub event_count: u64,
}

/// Provisions Ghosts local to this Mirage.
pub trait GhostSpawner: Send + Sync {
    fn spawn_local_ghost(
        &self,
        cancel: &CancelToken,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, MirageError>;
}

#[derive(Debug, Default)]
struct GhostEntry {
    meta: RegisteredGhost,
    acks: BTreeMap<String, EventAck>,
}

impl GhostEntry {
    fn new(ghost_id: &str) -> Self {
        Self {
            meta: RegisteredGhost {
                ghost_id: ghost_id.to_string(),
                registered_at_ms: now_ms(),
                ..RegisteredGhost::default()
            },
            acks: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct ServerState {
    mirage_id: String,
    phase: MiragePhase,
    ghosts: BTreeMap<String, GhostEntry>,
    reports: Vec<Report>,
    spawner: Option<Arc<dyn GhostSpawner>>,
}

#[derive(Default)]
pub struct MirageServer {
    state: RwLock<ServerState>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for MirageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("MirageServer")
            .field("mirage_id", &state.mirage_id)
            .field("phase", &state.phase)
            .field("ghosts", &state.ghosts.keys().collect::<Vec<_>>())
            .field("reports", &state.reports.len())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl MirageServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appear(&self, mirage_id: &str) -> Result<(), MirageError> {
        let id = mirage_id.trim();
        if id.is_empty() {
            return Err(MirageError::InvalidMirageId);
        }
        let mut state = self.write();
        transition(&state, MiragePhase::Boot, MiragePhase::Appeared)?;
        state.mirage_id = id.to_string();
        state.phase = MiragePhase::Appeared;
        tracing::info!(mirage_id = %state.mirage_id, "mirage appeared");
        Ok(())
    }

    pub fn shimmer(&self) -> Result<(), MirageError> {
        let mut state = self.write();
        transition(&state, MiragePhase::Appeared, MiragePhase::Shimmer)?;
        state.phase = MiragePhase::Shimmer;
        tracing::info!(mirage_id = %state.mirage_id, "mirage shimmering");
        Ok(())
    }

    pub fn seed(&self) -> Result<(), MirageError> {
        let mut state = self.write();
        transition(&state, MiragePhase::Shimmer, MiragePhase::Seeded)?;
        state.phase = MiragePhase::Seeded;
        tracing::info!(mirage_id = %state.mirage_id, "mirage seeded");
        Ok(())
    }

    pub fn status(&self) -> MirageStatus {
        let (mirage_id, phase, registered_ghosts, report_count) = {
            let state = self.read();
            (
                state.mirage_id.clone(),
                state.phase,
                state.ghosts.len(),
                state.reports.len(),
            )
        };
        MirageStatus {
            mirage_id,
            phase,
            registered_ghosts,
            active_intents: self.orchestrator.snapshot().intent_count,
            report_count,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Records a registration and returns the accepted ack. Registration
    /// time and event counters carry over from earlier sessions.
    pub fn upsert_registration(&self, remote_addr: &str, reg: &Registration) -> RegistrationAck {
        let ghost_id = reg.ghost_id.trim();
        let mut state = self.write();
        let entry = state
            .ghosts
            .entry(ghost_id.to_string())
            .or_insert_with(|| GhostEntry::new(ghost_id));
        entry.meta.remote_addr = remote_addr.to_string();
        entry.meta.seed_list = reg.seeds().to_vec();
        entry.meta.connected = true;
        tracing::info!(ghost_id, remote_addr, seeds = entry.meta.seed_list.len(), "ghost registered");
        RegistrationAck {
            status: RegistrationAck::ACCEPTED.into(),
            code: 0,
            message: "registered".into(),
            ghost_id: ghost_id.to_string(),
            timestamp_ms: now_ms(),
        }
    }

    /// Keeps the entry and its counters; only the connection fields change.
    pub fn mark_ghost_disconnected(&self, ghost_id: &str) {
        let mut state = self.write();
        if let Some(entry) = state.ghosts.get_mut(ghost_id.trim()) {
            entry.meta.connected = false;
            entry.meta.remote_addr.clear();
            tracing::info!(ghost_id, "ghost disconnected");
        }
    }

    /// Acks `event` for `ghost_id`. The first delivery of an `event_id` is
    /// counted and handed to the orchestrator; replays return the cached
    /// ack and change nothing.
    pub fn accept_event(&self, ghost_id: &str, event: &Event) -> EventAck {
        let ghost_id = ghost_id.trim();
        let ack = {
            let mut state = self.write();
            let entry = state
                .ghosts
                .entry(ghost_id.to_string())
                .or_insert_with(|| GhostEntry::new(ghost_id));
            if let Some(ack) = entry.acks.get(&event.event_id) {
                tracing::debug!(event_id = %event.event_id, "replayed event acked from cache");
                return ack.clone();
            }
            let ack = EventAck {
                event_id: event.event_id.clone(),
                command_id: event.command_id.clone(),
                ghost_id: ghost_id.to_string(),
                ack_status: AckStatus::Accepted,
                ack_code: 0,
                timestamp_ms: now_ms(),
            };
            entry.acks.insert(event.event_id.clone(), ack.clone());
            entry.meta.last_event_at_ms = ack.timestamp_ms;
            entry.meta.event_count += 1;
            ack
        };

        match self.orchestrator.ingest_observed_event(event) {
            Ok(Some(report)) => self.append_report(report),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(event_id = %event.event_id, error = %err, "event not ingested");
            }
        }
        ack
    }

    /// Sorted by ghost id.
    pub fn registered_ghosts(&self) -> Vec<RegisteredGhost> {
        self.read()
            .ghosts
            .values()
            .map(|entry| entry.meta.clone())
            .collect()
    }

    pub fn registered_ghost(&self, ghost_id: &str) -> Option<RegisteredGhost> {
        self.read()
            .ghosts
            .get(ghost_id.trim())
            .map(|entry| entry.meta.clone())
    }

    /// Last `limit` reports, oldest first. Zero returns all of them.
    pub fn recent_reports(&self, limit: usize) -> Vec<Report> {
        let state = self.read();
        let skip = match limit {
            0 => 0,
            limit => state.reports.len().saturating_sub(limit),
        };
        state.reports[skip..].to_vec()
    }

    pub fn register_executor(
        &self,
        ghost_id: &str,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<(), MirageError> {
        Ok(self.orchestrator.register_executor(ghost_id, executor)?)
    }

    pub fn submit_issue(&self, issue: Issue) -> Result<(), MirageError> {
        Ok(self.orchestrator.submit_issue(issue)?)
    }

    /// One reconcile step; the resulting report is kept in the history.
    pub fn reconcile_intent(
        &self,
        cancel: &CancelToken,
        intent_id: &str,
    ) -> Result<Report, MirageError> {
        let report = self.orchestrator.reconcile_once(cancel, intent_id)?;
        self.append_report(report.clone());
        Ok(report)
    }

    pub fn snapshot_intent(&self, intent_id: &str) -> Option<IntentSnapshot> {
        self.orchestrator.snapshot_intent(intent_id)
    }

    pub fn list_intent_ids(&self) -> Vec<String> {
        self.orchestrator.list_intent_ids()
    }

    pub fn set_ghost_spawner(&self, spawner: Arc<dyn GhostSpawner>) {
        self.write().spawner = Some(spawner);
    }

    pub fn spawn_local_ghost(
        &self,
        cancel: &CancelToken,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, MirageError> {
        let spawner = self.read().spawner.clone().ok_or(MirageError::NoGhostSpawner)?;
        spawner.spawn_local_ghost(cancel, req)
    }

    fn append_report(&self, report: Report) {
        self.write().reports.push(report);
    }

    fn read(&self) -> RwLockReadGuard<'_, ServerState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The ack sent before closing a session whose registration is refused.
pub fn rejected_registration(ghost_id: &str, message: impl Into<String>) -> RegistrationAck {
    let ghost_id = match ghost_id.trim() {
        "" => "unknown",
        id => id,
    };
    RegistrationAck {
        status: RegistrationAck::REJECTED.into(),
        code: REGISTRATION_REJECTED_CODE,
        message: message.into(),
        ghost_id: ghost_id.to_string(),
        timestamp_ms: now_ms(),
    }
}

fn transition(state: &ServerState, from: MiragePhase, to: MiragePhase) -> Result<(), MirageError> {
    if state.phase != from {
        tracing::error!(have = %state.phase, want = %to, "invalid lifecycle transition");
        return Err(MirageError::LifecycleOrder {
            have: state.phase,
            want: to,
        });
    }
    Ok(())
}
