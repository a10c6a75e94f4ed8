use serde::{Deserialize, Serialize};

use crate::error::GhostError;
use edge_core::{Command, Frame};

/// A `Command` together with the frame `message_id` it arrived under.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub message_id: u64,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(message_id: u64, command: Command) -> Self {
        Self {
            message_id,
            command,
        }
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, GhostError> {
        let command = Command::decode_frame(frame)?;
        Ok(Self::new(frame.header.message_id, command))
    }

    pub fn validate(&self) -> Result<(), GhostError> {
        let cmd = &self.command;
        let checks = [
            (self.message_id == 0, "missing message_id"),
            (cmd.command_id.trim().is_empty(), "missing command_id"),
            (cmd.intent_id.trim().is_empty(), "missing intent_id"),
            (cmd.ghost_id.trim().is_empty(), "missing ghost_id"),
            (cmd.seed_selector.trim().is_empty(), "missing seed_selector"),
            (cmd.operation.trim().is_empty(), "missing operation"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(GhostError::InvalidCommand(reason)),
            None => Ok(()),
        }
    }
}
