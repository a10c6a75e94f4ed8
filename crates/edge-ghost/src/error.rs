use thiserror::Error;

use crate::cluster::ClusterError;
use crate::server::GhostPhase;
use edge_core::{FrameError, Transience, WireError};
use edge_seeds::SeedError;
use edge_session::SessionError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GhostError {
    #[error("invalid ghost id")]
    InvalidGhostId,
    #[error("invalid lifecycle transition: have={have} want={want}")]
    LifecycleOrder { have: GhostPhase, want: GhostPhase },
    #[error("invalid command envelope: {0}")]
    InvalidCommand(&'static str),
    #[error("not radiating (phase={phase})")]
    NotRadiating { phase: GhostPhase },
    #[error("command target mismatch: target={target} local={local}")]
    TargetMismatch { target: String, local: String },
    #[error("duplicate command_id {command_id}")]
    DuplicateCommandId { command_id: String },
    #[error("duplicate message_id {message_id}")]
    DuplicateMessageId { message_id: u64 },
    #[error("missing execution state for command_id={command_id}")]
    MissingExecution { command_id: String },
    #[error("heartbeat interval must be positive")]
    InvalidHeartbeatInterval,
    #[error("mirage policy {policy} requires an address")]
    MirageAddressRequired { policy: &'static str },
    #[error("ghost service already started")]
    AlreadyStarted,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GhostError {
    pub fn transience(&self) -> Transience {
        match self {
            GhostError::Session(err) => err.transience(),
            GhostError::Wire(err) => err.transience(),
            GhostError::Frame(err) => err.transience(),
            GhostError::Io(_) => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }
}
