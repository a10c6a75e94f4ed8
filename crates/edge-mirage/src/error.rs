use thiserror::Error;

use crate::server::MiragePhase;
use edge_core::{FrameError, Transience, WireError};
use edge_session::admin::AdminError;
use edge_session::{Interrupted, SecurityError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error("invalid issue: {0}")]
    InvalidIssue(String),
    #[error("intent not found: {intent_id}")]
    IntentNotFound { intent_id: String },
    #[error("target ghost required: target_scope={target_scope:?}")]
    TargetGhostRequired { target_scope: String },
    #[error("no executor registered for ghost_id={ghost_id:?}")]
    NoExecutor { ghost_id: String },
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl OrchestratorError {
    pub fn transience(&self) -> Transience {
        match self {
            OrchestratorError::Executor(err) => err.transience(),
            OrchestratorError::Frame(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }
}

/// Failure of a [`crate::CommandExecutor`] to produce an event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    #[error(transparent)]
    GhostAdmin(#[from] GhostAdminError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("{0}")]
    Failed(String),
}

impl ExecutorError {
    pub fn transience(&self) -> Transience {
        match self {
            ExecutorError::GhostAdmin(err) => err.transience(),
            ExecutorError::Wire(err) => err.transience(),
            ExecutorError::Interrupted(_) => Transience::Permanent,
            ExecutorError::Failed(_) => Transience::Unknown,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GhostAdminError {
    #[error("ghost admin addr required")]
    AddrRequired,
    #[error("invalid ghost admin addr {addr:?}")]
    InvalidAddr { addr: String },
    #[error("resolve ghost admin host {host:?}: {reason}")]
    Resolve { host: String, reason: String },
    #[error("ghost control {action} failed: {message}")]
    Remote { action: &'static str, message: String },
    #[error("ghost control {action}: {source}")]
    Call {
        action: &'static str,
        #[source]
        source: AdminError,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl GhostAdminError {
    pub fn transience(&self) -> Transience {
        match self {
            GhostAdminError::Call { source, .. } => source.transience(),
            GhostAdminError::Resolve { .. } => Transience::Retryable,
            GhostAdminError::Frame(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MirageError {
    #[error("invalid mirage id")]
    InvalidMirageId,
    #[error("invalid lifecycle transition: {have} -> {want}")]
    LifecycleOrder { have: MiragePhase, want: MiragePhase },
    #[error("no ghost spawner configured")]
    NoGhostSpawner,
    #[error("local ghost id is required for the mirage admin controller")]
    LocalGhostIdRequired,
    #[error("local ghost admin addr is required for the mirage admin controller")]
    LocalGhostAdminAddrRequired,
    #[error("mirage service already started")]
    AlreadyStarted,
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    GhostAdmin(#[from] GhostAdminError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirageError {
    pub fn transience(&self) -> Transience {
        match self {
            MirageError::Orchestrator(err) => err.transience(),
            MirageError::GhostAdmin(err) => err.transience(),
            MirageError::Io(_) => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }
}
