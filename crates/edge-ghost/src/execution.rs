//! Per-command execution records and their lookup indexes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::command::CommandEnvelope;
use edge_core::{Args, Event, Outcome, SeedExecute, SeedResult, enum_str};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    Accepted,
    Complete,
}

enum_str! {
    impl ExecutionPhase {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Accepted => ["accepted"],
            Complete => ["complete"],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub message_id: u64,
    pub command_id: String,
    pub execution_id: String,
    pub intent_id: String,
    pub ghost_id: String,
    pub seed_selector: String,
    pub operation: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_execute: Option<SeedExecute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_result: Option<SeedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub phase: ExecutionPhase,
}

impl ExecutionState {
    pub(crate) fn accepted(env: &CommandEnvelope) -> Self {
        let cmd = &env.command;
        Self {
            message_id: env.message_id,
            command_id: cmd.command_id.trim().to_string(),
            execution_id: cmd.execution_id(),
            intent_id: cmd.intent_id.trim().to_string(),
            ghost_id: cmd.ghost_id.trim().to_string(),
            seed_selector: cmd.seed_selector.trim().to_string(),
            operation: cmd.operation.trim().to_string(),
            args: cmd.args.clone(),
            ..Self::default()
        }
    }
}

/// Records are owned by execution id; the command and message maps are
/// indexes into it.
#[derive(Debug, Default)]
pub(crate) struct ExecutionStore {
    by_execution_id: HashMap<String, ExecutionState>,
    execution_by_command: HashMap<String, String>,
    command_by_message: HashMap<u64, String>,
}

impl ExecutionStore {
    pub fn has_command(&self, command_id: &str) -> bool {
        self.execution_by_command.contains_key(command_id)
    }

    pub fn has_message(&self, message_id: u64) -> bool {
        self.command_by_message.contains_key(&message_id)
    }

    pub fn insert(&mut self, state: ExecutionState) {
        self.execution_by_command
            .insert(state.command_id.clone(), state.execution_id.clone());
        self.command_by_message
            .insert(state.message_id, state.command_id.clone());
        self.by_execution_id
            .insert(state.execution_id.clone(), state);
    }

    /// Returns false when the execution is unknown.
    pub fn complete(
        &mut self,
        execution_id: &str,
        seed_execute: SeedExecute,
        seed_result: SeedResult,
        event: Event,
    ) -> bool {
        let Some(state) = self.by_execution_id.get_mut(execution_id) else {
            return false;
        };
        state.outcome = Some(event.outcome);
        state.seed_execute = Some(seed_execute);
        state.seed_result = Some(seed_result);
        state.event = Some(event);
        state.phase = ExecutionPhase::Complete;
        true
    }

    pub fn get(&self, execution_id: &str) -> Option<&ExecutionState> {
        self.by_execution_id.get(execution_id)
    }

    pub fn by_command(&self, command_id: &str) -> Option<&ExecutionState> {
        let execution_id = self.execution_by_command.get(command_id)?;
        self.by_execution_id.get(execution_id)
    }

    pub fn by_message(&self, message_id: u64) -> Option<&ExecutionState> {
        let command_id = self.command_by_message.get(&message_id)?;
        self.by_command(command_id)
    }

    pub fn len(&self) -> usize {
        self.by_execution_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_core::Command;

    fn state(message_id: u64, command_id: &str) -> ExecutionState {
        ExecutionState::accepted(&CommandEnvelope::new(
            message_id,
            Command {
                command_id: command_id.into(),
                intent_id: "intent.1".into(),
                ghost_id: "ghost.alpha".into(),
                seed_selector: "seed.flow".into(),
                operation: "status".into(),
                ..Command::default()
            },
        ))
    }

    #[test]
    fn accepted_state_derives_execution_id() {
        let state = state(3, " cmd.1 ");
        assert_eq!(state.command_id, "cmd.1");
        assert_eq!(state.execution_id, "exec.cmd.1");
        assert_eq!(state.phase, ExecutionPhase::Accepted);
        assert!(state.event.is_none());
    }

    #[test]
    fn indexes_resolve_to_the_same_record() {
        let mut store = ExecutionStore::default();
        store.insert(state(3, "cmd.1"));
        assert!(store.has_command("cmd.1"));
        assert!(store.has_message(3));
        assert_eq!(store.by_message(3).unwrap().execution_id, "exec.cmd.1");

        let event = Event {
            event_id: "evt.cmd.1".into(),
            command_id: "cmd.1".into(),
            intent_id: "intent.1".into(),
            ghost_id: "ghost.alpha".into(),
            seed_id: "seed.flow".into(),
            outcome: Outcome::Error,
            timestamp_ms: 1,
        };
        assert!(store.complete(
            "exec.cmd.1",
            SeedExecute::default(),
            SeedResult::default(),
            event
        ));
        let done = store.by_command("cmd.1").unwrap();
        assert_eq!(done.phase, ExecutionPhase::Complete);
        assert_eq!(done.outcome, Some(Outcome::Error));
        assert_eq!(store.get("exec.cmd.1").unwrap(), done);

        assert!(!store.complete(
            "exec.missing",
            SeedExecute::default(),
            SeedResult::default(),
            Event::default()
        ));
    }
}
