use serde::{Deserialize, Serialize};

use super::{AckStatus, Outcome, WireError, open, parse_enum, require_text, seal};
use crate::frame::{Frame, FrameFlags};
use crate::protocol::{MessageType, field_id};
use crate::tlv::{self, Field};

/// Ghost → Mirage terminal record for one command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub command_id: String,
    pub intent_id: String,
    pub ghost_id: String,
    pub seed_id: String,
    pub outcome: Outcome,
    /// Zero means unset; it is left off the wire.
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl Event {
    pub fn validate(&self) -> Result<(), WireError> {
        let ty = MessageType::Event;
        require_text(ty, "event_id", &self.event_id)?;
        require_text(ty, "command_id", &self.command_id)?;
        require_text(ty, "intent_id", &self.intent_id)?;
        require_text(ty, "ghost_id", &self.ghost_id)?;
        require_text(ty, "seed_id", &self.seed_id)
    }

    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let mut fields = vec![
            Field::string(field_id::EVENT_ID, &self.event_id),
            Field::string(field_id::COMMAND_ID, &self.command_id),
            Field::string(field_id::INTENT_ID, &self.intent_id),
            Field::string(field_id::GHOST_ID, &self.ghost_id),
            Field::string(field_id::SEED_ID, &self.seed_id),
            Field::string(field_id::OUTCOME, self.outcome.as_str()),
        ];
        if self.timestamp_ms != 0 {
            fields.push(Field::u64(field_id::TIMESTAMP_MS, self.timestamp_ms));
        }
        seal(message_id, MessageType::Event, FrameFlags::empty(), &fields)
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let fields = open(frame, MessageType::Event)?;
        Ok(Self {
            event_id: tlv::field_string(&fields, field_id::EVENT_ID)?,
            command_id: tlv::field_string(&fields, field_id::COMMAND_ID)?,
            intent_id: tlv::field_string(&fields, field_id::INTENT_ID)?,
            ghost_id: tlv::field_string(&fields, field_id::GHOST_ID)?,
            seed_id: tlv::field_string(&fields, field_id::SEED_ID)?,
            outcome: parse_enum(
                MessageType::Event,
                "outcome",
                tlv::field_string(&fields, field_id::OUTCOME)?,
                Outcome::parse_str,
            )?,
            timestamp_ms: tlv::optional_u64(&fields, field_id::TIMESTAMP_MS)?.unwrap_or_default(),
        })
    }
}

/// Mirage → Ghost acknowledgment. Replays for one `event_id` are identical,
/// timestamp included.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAck {
    pub event_id: String,
    pub command_id: String,
    pub ghost_id: String,
    pub ack_status: AckStatus,
    pub ack_code: u32,
    pub timestamp_ms: u64,
}

impl EventAck {
    pub fn validate(&self) -> Result<(), WireError> {
        let ty = MessageType::EventAck;
        require_text(ty, "event_id", &self.event_id)?;
        require_text(ty, "command_id", &self.command_id)?;
        require_text(ty, "ghost_id", &self.ghost_id)?;
        if self.timestamp_ms == 0 {
            return Err(WireError::MissingField {
                message: ty,
                field: "timestamp_ms",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.ack_status == AckStatus::Accepted
    }

    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let fields = [
            Field::string(field_id::EVENT_ID, &self.event_id),
            Field::string(field_id::COMMAND_ID, &self.command_id),
            Field::string(field_id::GHOST_ID, &self.ghost_id),
            Field::string(field_id::ACK_STATUS, self.ack_status.as_str()),
            Field::u32(field_id::ACK_CODE, self.ack_code),
            Field::u64(field_id::TIMESTAMP_MS, self.timestamp_ms),
        ];
        seal(
            message_id,
            MessageType::EventAck,
            FrameFlags::IS_RESPONSE,
            &fields,
        )
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let fields = open(frame, MessageType::EventAck)?;
        Ok(Self {
            event_id: tlv::field_string(&fields, field_id::EVENT_ID)?,
            command_id: tlv::field_string(&fields, field_id::COMMAND_ID)?,
            ghost_id: tlv::field_string(&fields, field_id::GHOST_ID)?,
            ack_status: parse_enum(
                MessageType::EventAck,
                "ack_status",
                tlv::field_string(&fields, field_id::ACK_STATUS)?,
                AckStatus::parse_str,
            )?,
            ack_code: tlv::field_u32(&fields, field_id::ACK_CODE)?,
            timestamp_ms: tlv::field_u64(&fields, field_id::TIMESTAMP_MS)?,
        })
    }
}
