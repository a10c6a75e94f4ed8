use std::io;

use thiserror::Error;

use crate::cancel::Interrupted;
use crate::control::ControlError;
use crate::security::SecurityError;
use edge_core::{AckStatus, Effect, FrameError, Transience, WireError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("mirage address is required")]
    AddressRequired,
    #[error("ghost_id is required")]
    GhostIdRequired,
    #[error("could not resolve {addr}")]
    Resolve { addr: String },
    #[error("registration rejected: code={code} message={message:?}")]
    RegistrationRejected { code: u32, message: String },
    #[error("event ack rejected: status={status} code={code}")]
    AckRejected { status: AckStatus, code: u32 },
    #[error("event ack timeout for {event_id} after {attempts} attempts")]
    AckTimeout { event_id: String, attempts: u32 },
    #[error("event ack mismatch: sent {event_id}, got ack for {ack_event_id}")]
    AckMismatch {
        event_id: String,
        ack_event_id: String,
    },
    #[error("mirage session closed")]
    Closed,
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl SessionError {
    pub fn transience(&self) -> Transience {
        match self {
            SessionError::Io(_) | SessionError::Resolve { .. } | SessionError::AckTimeout { .. } => {
                Transience::Retryable
            }
            SessionError::Frame(err) => err.transience(),
            SessionError::Wire(err) => err.transience(),
            SessionError::Control(err) => err.transience(),
            SessionError::AckMismatch { .. } => Transience::Unknown,
            SessionError::AddressRequired
            | SessionError::GhostIdRequired
            | SessionError::RegistrationRejected { .. }
            | SessionError::AckRejected { .. }
            | SessionError::Closed
            | SessionError::Interrupted(_)
            | SessionError::Security(_) => Transience::Permanent,
        }
    }

    /// Whether Mirage may have ingested the event despite the error.
    pub fn effect(&self) -> Effect {
        match self {
            SessionError::AckTimeout { .. }
            | SessionError::AckMismatch { .. }
            | SessionError::Io(_)
            | SessionError::Frame(_) => Effect::Unknown,
            SessionError::AckRejected { .. } => Effect::Some,
            _ => Effect::None,
        }
    }
}
