//! Newline-delimited JSON control channel.
//!
//! The registration handshake is the only JSON traffic on a session; after
//! it the same buffered reader carries binary frames, so callers must keep
//! one `BufReader` for the life of the connection. The line helpers are
//! reused by the admin listeners.

use std::io::{self, BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edge_core::Transience;

pub const MAX_CONTROL_LINE_BYTES: usize = 128 * 1024;

const TYPE_REGISTER: &str = "seed.register";
const TYPE_REGISTER_ACK: &str = "seed.register.ack";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("invalid registration ack: {0}")]
    InvalidRegistrationAck(String),
    #[error("control message too large (max {max} bytes)")]
    TooLarge { max: usize },
    #[error("control channel closed")]
    Closed,
    #[error("control json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ControlError {
    pub fn transience(&self) -> Transience {
        match self {
            ControlError::Io(_) | ControlError::Closed => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub ghost_id: String,
    #[serde(default)]
    pub peer_identity: String,
    /// `None` means the field was absent; an empty list is valid.
    pub seed_list: Option<Vec<SeedInfo>>,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: String| Err(ControlError::InvalidRegistration(msg));
        if self.ghost_id.trim().is_empty() {
            return invalid("missing ghost_id".into());
        }
        let Some(seeds) = &self.seed_list else {
            return invalid("missing seed_list".into());
        };
        for (i, seed) in seeds.iter().enumerate() {
            if seed.id.trim().is_empty() {
                return invalid(format!("seed_list[{i}] missing id"));
            }
            if seed.name.trim().is_empty() {
                return invalid(format!("seed_list[{i}] missing name"));
            }
            if seed.description.trim().is_empty() {
                return invalid(format!("seed_list[{i}] missing description"));
            }
        }
        Ok(())
    }

    pub fn seeds(&self) -> &[SeedInfo] {
        self.seed_list.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationAck {
    pub status: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
    pub ghost_id: String,
    pub timestamp_ms: u64,
}

impl RegistrationAck {
    pub const ACCEPTED: &'static str = "accepted";
    pub const REJECTED: &'static str = "rejected";

    pub fn validate(&self) -> Result<(), ControlError> {
        let invalid = |msg: &str| Err(ControlError::InvalidRegistrationAck(msg.into()));
        let status = self.status.trim();
        if status != Self::ACCEPTED && status != Self::REJECTED {
            return invalid("invalid status");
        }
        if self.ghost_id.trim().is_empty() {
            return invalid("missing ghost_id");
        }
        if self.timestamp_ms == 0 {
            return invalid("missing timestamp_ms");
        }
        Ok(())
    }

    pub fn is_accepted(&self) -> bool {
        self.status.trim() == Self::ACCEPTED
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<Registration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_ack: Option<RegistrationAck>,
}

pub fn write_registration<W: Write>(writer: &mut W, reg: &Registration) -> Result<(), ControlError> {
    reg.validate()?;
    write_json_line(
        writer,
        &ControlEnvelope {
            kind: TYPE_REGISTER.into(),
            registration: Some(reg.clone()),
            registration_ack: None,
        },
    )
}

pub fn read_registration<R: BufRead>(reader: &mut R) -> Result<Registration, ControlError> {
    let env: ControlEnvelope = read_json_line(reader, MAX_CONTROL_LINE_BYTES)?;
    match env.registration {
        Some(reg) if env.kind == TYPE_REGISTER => {
            reg.validate()?;
            Ok(reg)
        }
        _ => Err(ControlError::InvalidRegistration(
            "unexpected control type".into(),
        )),
    }
}

pub fn write_registration_ack<W: Write>(
    writer: &mut W,
    ack: &RegistrationAck,
) -> Result<(), ControlError> {
    ack.validate()?;
    write_json_line(
        writer,
        &ControlEnvelope {
            kind: TYPE_REGISTER_ACK.into(),
            registration: None,
            registration_ack: Some(ack.clone()),
        },
    )
}

pub fn read_registration_ack<R: BufRead>(reader: &mut R) -> Result<RegistrationAck, ControlError> {
    let env: ControlEnvelope = read_json_line(reader, MAX_CONTROL_LINE_BYTES)?;
    match env.registration_ack {
        Some(ack) if env.kind == TYPE_REGISTER_ACK => {
            ack.validate()?;
            Ok(ack)
        }
        _ => Err(ControlError::InvalidRegistrationAck(
            "unexpected control type".into(),
        )),
    }
}

/// Serializes `value` as one JSON line and flushes.
pub fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), ControlError> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one line of at most `max` bytes (newline included) and parses it.
/// End of stream before any byte is [`ControlError::Closed`].
pub fn read_json_line<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
    max: usize,
) -> Result<T, ControlError> {
    let line = read_line_bounded(reader, max)?;
    Ok(serde_json::from_slice(&line)?)
}

pub(crate) fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, ControlError> {
    let mut line = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if line.is_empty() {
        return Err(ControlError::Closed);
    }
    if line.len() > max {
        return Err(ControlError::TooLarge { max });
    }
    if line.last() != Some(&b'\n') {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "control line truncated").into());
    }
    Ok(line)
}
