//! Typed messages mapped onto TLV fields and frames.
//!
//! Every encoder runs the message's own `validate`, maps it to canonical
//! field ids, checks the result against [`crate::schema`] and only then
//! frames it. Decoders run the same path backwards.

mod command;
mod event;
mod report;
mod seed;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::effect::Transience;
use crate::enum_str;
use crate::frame::{Frame, FrameError, FrameFlags, FrameHeader};
use crate::protocol::MessageType;
use crate::schema::{self, ValidationError};
use crate::tlv::{self, Field, FieldError};

pub use command::Command;
pub use event::{Event, EventAck};
pub use report::Report;
pub use seed::{SeedExecute, SeedResult};

/// Seed operation arguments. Sorted, so the JSON form is deterministic.
pub type Args = BTreeMap<String, String>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireError {
    #[error("{message} missing {field}")]
    MissingField {
        message: MessageType,
        field: &'static str,
    },
    #[error("{message} field {field} has invalid value {value:?}")]
    InvalidValue {
        message: MessageType,
        field: &'static str,
        value: String,
    },
    #[error("expected {want} frame, got message_type={got}")]
    UnexpectedMessageType { want: MessageType, got: u32 },
    #[error("args payload: {0}")]
    Args(#[from] serde_json::Error),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Schema(#[from] ValidationError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl WireError {
    pub fn transience(&self) -> Transience {
        match self {
            WireError::Frame(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }
}

/// Terminal result of a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Success,
    Error,
}

enum_str! {
    impl Outcome {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Success => ["success"],
            Error => ["error"],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    #[default]
    Accepted,
    Rejected,
}

enum_str! {
    impl AckStatus {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Accepted => ["accepted"],
            Rejected => ["rejected"],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPhase {
    #[default]
    InProgress,
    Complete,
}

enum_str! {
    impl ReportPhase {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            InProgress => ["in_progress"],
            Complete => ["complete"],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    #[default]
    InProgress,
    Satisfied,
    Failed,
}

enum_str! {
    impl CompletionState {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            InProgress => ["in_progress"],
            Satisfied => ["satisfied"],
            Failed => ["failed"],
        }
    }
}

fn require_text(message: MessageType, field: &'static str, value: &str) -> Result<(), WireError> {
    if value.trim().is_empty() {
        return Err(WireError::MissingField { message, field });
    }
    Ok(())
}

fn parse_enum<T>(
    message: MessageType,
    field: &'static str,
    raw: String,
    parse: fn(&str) -> Option<T>,
) -> Result<T, WireError> {
    parse(&raw).ok_or(WireError::InvalidValue {
        message,
        field,
        value: raw,
    })
}

fn encode_args(args: &Args) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(args)?)
}

fn decode_args(raw: &[u8]) -> Result<Args, WireError> {
    if raw.is_empty() {
        return Ok(Args::new());
    }
    Ok(serde_json::from_slice(raw)?)
}

fn seal(
    message_id: u64,
    message: MessageType,
    flags: FrameFlags,
    fields: &[Field],
) -> Result<Frame, WireError> {
    schema::validate(message.code(), fields)?;
    let payload = tlv::encode_fields(fields)?;
    Ok(Frame::new(
        FrameHeader::new(message_id, message.code()).with_flags(flags),
        payload,
    ))
}

fn open(frame: &Frame, want: MessageType) -> Result<Vec<Field>, WireError> {
    if frame.header.message_type != want.code() {
        return Err(WireError::UnexpectedMessageType {
            want,
            got: frame.header.message_type,
        });
    }
    let fields = tlv::decode_fields(&frame.payload)?;
    schema::validate(want.code(), &fields)?;
    Ok(fields)
}
