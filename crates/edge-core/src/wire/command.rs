use serde::{Deserialize, Serialize};

use super::{Args, WireError, decode_args, encode_args, open, require_text, seal};
use crate::frame::{Frame, FrameFlags};
use crate::protocol::{MessageType, field_id};
use crate::tlv::{self, Field};

/// Mirage → Ghost instruction to run one seed operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub intent_id: String,
    pub ghost_id: String,
    pub seed_selector: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Args::is_empty")]
    pub args: Args,
}

impl Command {
    pub fn validate(&self) -> Result<(), WireError> {
        let ty = MessageType::Command;
        require_text(ty, "command_id", &self.command_id)?;
        require_text(ty, "intent_id", &self.intent_id)?;
        require_text(ty, "ghost_id", &self.ghost_id)?;
        require_text(ty, "seed_selector", &self.seed_selector)?;
        require_text(ty, "operation", &self.operation)
    }

    /// `exec.<command_id>`; stable for the life of the command.
    #[must_use]
    pub fn execution_id(&self) -> String {
        format!("exec.{}", self.command_id.trim())
    }

    /// `evt.<command_id>`; stable for the life of the command.
    #[must_use]
    pub fn event_id(&self) -> String {
        format!("evt.{}", self.command_id.trim())
    }

    /// `args` travels as a JSON object and only when non-empty.
    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let mut fields = vec![
            Field::string(field_id::COMMAND_ID, &self.command_id),
            Field::string(field_id::INTENT_ID, &self.intent_id),
            Field::string(field_id::GHOST_ID, &self.ghost_id),
            Field::string(field_id::SEED_SELECTOR, &self.seed_selector),
            Field::string(field_id::OPERATION, &self.operation),
        ];
        if !self.args.is_empty() {
            fields.push(Field::bytes(field_id::ARGS, encode_args(&self.args)?));
        }
        seal(
            message_id,
            MessageType::Command,
            FrameFlags::empty(),
            &fields,
        )
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let fields = open(frame, MessageType::Command)?;
        let args = match tlv::optional_bytes(&fields, field_id::ARGS)? {
            Some(raw) => decode_args(&raw)?,
            None => Args::new(),
        };
        Ok(Self {
            command_id: tlv::field_string(&fields, field_id::COMMAND_ID)?,
            intent_id: tlv::field_string(&fields, field_id::INTENT_ID)?,
            ghost_id: tlv::field_string(&fields, field_id::GHOST_ID)?,
            seed_selector: tlv::field_string(&fields, field_id::SEED_SELECTOR)?,
            operation: tlv::field_string(&fields, field_id::OPERATION)?,
            args,
        })
    }
}
