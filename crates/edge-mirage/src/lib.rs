#![forbid(unsafe_code)]

//! Mirage: the orchestrator that turns issued intents into Ghost commands.
//!
//! [`Orchestrator`] holds desired and observed intent state and performs
//! one reconcile step at a time through registered [`CommandExecutor`]s.
//! [`MirageServer`] adds the lifecycle, the registered Ghost table and the
//! idempotent event-ack cache. [`MirageService`] serves Ghost sessions and
//! the admin control protocol on top of a server.

pub mod admin;
pub mod config;
pub mod error;
pub mod ghost_client;
pub mod orchestrator;
pub mod server;
pub mod service;
mod session;

pub use admin::{MirageAdminRequest, ReconcileAllReply, SnapshotIntentReply};
pub use config::MirageConfig;
pub use error::{ExecutorError, GhostAdminError, MirageError, OrchestratorError};
pub use ghost_client::{
    AdminCommandExecutor, GhostAdminClient, GhostAdminSpawner, normalize_ghost_admin_addr,
};
pub use orchestrator::{
    CommandExecutor, DesiredIntent, IntentSnapshot, Issue, IssueCommand, ObservedIntent,
    Orchestrator, OrchestratorSnapshot, PlannedCommand,
};
pub use server::{GhostSpawner, MiragePhase, MirageServer, MirageStatus, RegisteredGhost};
pub use service::{MirageRuntime, MirageService};
