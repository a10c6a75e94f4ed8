//! Ghost lifecycle and the command admission boundary.
//!
//! A Ghost moves `boot -> appeared -> seeded -> radiating` exactly once and
//! only accepts commands while radiating. All state sits behind one lock
//! that is never held while a seed runs.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::command::CommandEnvelope;
use crate::error::GhostError;
use crate::execution::{ExecutionState, ExecutionStore};
use edge_core::{Event, SeedExecute, SeedResult, enum_str};
use edge_seeds::{SeedMetadata, SeedRegistry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostPhase {
    #[default]
    Boot,
    Appeared,
    Seeded,
    Radiating,
}

enum_str! {
    impl GhostPhase {
        pub fn as_str(&self) -> &'static str;
        pub fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Boot => ["boot"],
            Appeared => ["appeared"],
            Seeded => ["seeded"],
            Radiating => ["radiating"],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostStatus {
    pub ghost_id: String,
    pub phase: GhostPhase,
    pub seed_count: usize,
    #[serde(default)]
    pub execution_count: usize,
}

#[derive(Debug, Default)]
struct ServerState {
    ghost_id: String,
    phase: GhostPhase,
    registry: Option<Arc<SeedRegistry>>,
    executions: ExecutionStore,
}

#[derive(Debug, Default)]
pub struct GhostServer {
    state: RwLock<ServerState>,
}

impl GhostServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appear(&self, ghost_id: &str) -> Result<(), GhostError> {
        let id = ghost_id.trim();
        if id.is_empty() {
            return Err(GhostError::InvalidGhostId);
        }
        let mut state = self.write();
        transition(&state, GhostPhase::Boot, GhostPhase::Appeared)?;
        state.ghost_id = id.to_string();
        state.phase = GhostPhase::Appeared;
        tracing::info!(ghost_id = %state.ghost_id, "ghost appeared");
        Ok(())
    }

    pub fn seed(&self, registry: Arc<SeedRegistry>) -> Result<(), GhostError> {
        let mut state = self.write();
        transition(&state, GhostPhase::Appeared, GhostPhase::Seeded)?;
        tracing::info!(ghost_id = %state.ghost_id, seeds = registry.len(), "ghost seeded");
        state.registry = Some(registry);
        state.phase = GhostPhase::Seeded;
        Ok(())
    }

    pub fn radiate(&self) -> Result<(), GhostError> {
        let mut state = self.write();
        transition(&state, GhostPhase::Seeded, GhostPhase::Radiating)?;
        state.phase = GhostPhase::Radiating;
        tracing::info!(ghost_id = %state.ghost_id, "ghost radiating");
        Ok(())
    }

    pub fn status(&self) -> GhostStatus {
        let state = self.read();
        GhostStatus {
            ghost_id: state.ghost_id.clone(),
            phase: state.phase,
            seed_count: state.registry.as_ref().map_or(0, |r| r.len()),
            execution_count: state.executions.len(),
        }
    }

    pub fn ghost_id(&self) -> String {
        self.read().ghost_id.clone()
    }

    pub fn seed_metadata(&self) -> Vec<SeedMetadata> {
        self.read()
            .registry
            .as_ref()
            .map(|r| r.list_metadata())
            .unwrap_or_default()
    }

    pub(crate) fn registry(&self) -> Option<Arc<SeedRegistry>> {
        self.read().registry.clone()
    }

    /// Admits a command and records it as `accepted`. Nothing is stored
    /// when any check fails.
    pub fn handle_command(&self, env: &CommandEnvelope) -> Result<ExecutionState, GhostError> {
        env.validate()?;
        let cmd = &env.command;

        let mut state = self.write();
        if state.phase != GhostPhase::Radiating {
            return Err(GhostError::NotRadiating { phase: state.phase });
        }
        let target = cmd.ghost_id.trim();
        if target != state.ghost_id {
            return Err(GhostError::TargetMismatch {
                target: target.to_string(),
                local: state.ghost_id.clone(),
            });
        }
        let command_id = cmd.command_id.trim();
        if state.executions.has_command(command_id) {
            return Err(GhostError::DuplicateCommandId {
                command_id: command_id.to_string(),
            });
        }
        if state.executions.has_message(env.message_id) {
            return Err(GhostError::DuplicateMessageId {
                message_id: env.message_id,
            });
        }

        let accepted = ExecutionState::accepted(env);
        state.executions.insert(accepted.clone());
        tracing::debug!(
            command_id = %accepted.command_id,
            execution_id = %accepted.execution_id,
            message_id = accepted.message_id,
            "command accepted"
        );
        Ok(accepted)
    }

    pub(crate) fn complete_execution(
        &self,
        execution_id: &str,
        seed_execute: SeedExecute,
        seed_result: SeedResult,
        event: Event,
    ) {
        if !self
            .write()
            .executions
            .complete(execution_id, seed_execute, seed_result, event)
        {
            tracing::error!(execution_id, "completed execution has no record");
        }
    }

    pub fn execution(&self, execution_id: &str) -> Option<ExecutionState> {
        self.read().executions.get(execution_id.trim()).cloned()
    }

    pub fn execution_by_command_id(&self, command_id: &str) -> Option<ExecutionState> {
        self.read().executions.by_command(command_id.trim()).cloned()
    }

    pub fn execution_by_message_id(&self, message_id: u64) -> Option<ExecutionState> {
        self.read().executions.by_message(message_id).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, ServerState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn transition(state: &ServerState, from: GhostPhase, to: GhostPhase) -> Result<(), GhostError> {
    if state.phase != from {
        tracing::error!(have = %state.phase, want = %to, "invalid lifecycle transition");
        return Err(GhostError::LifecycleOrder {
            have: state.phase,
            want: to,
        });
    }
    Ok(())
}
