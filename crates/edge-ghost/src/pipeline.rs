//! Full command path: admit -> seed.execute -> seed.result -> event.
//!
//! Seed resolution and execution failures never fail the pipeline; they
//! become an error `SeedResult` so every admitted command reaches a
//! terminal event.

use bytes::Bytes;

use crate::command::CommandEnvelope;
use crate::error::GhostError;
use crate::execution::ExecutionState;
use crate::server::GhostServer;
use edge_core::{Event, Outcome, SeedExecute, SeedResult, now_ms};
use edge_seeds::{SeedError, SeedOutput, SeedStatus};

/// Exit code reported when the selector names no registered seed.
pub const UNKNOWN_SEED_EXIT_CODE: i32 = 127;

impl GhostServer {
    pub fn handle_command_and_execute(&self, env: &CommandEnvelope) -> Result<Event, GhostError> {
        let span = tracing::debug_span!(
            "ghost_command",
            message_id = env.message_id,
            command_id = %env.command.command_id.trim()
        );
        let _guard = span.enter();

        let state = self.handle_command(env)?;

        let seed_execute = build_seed_execute(&state);
        seed_execute.validate()?;

        let seed_result = self.execute_seed(seed_execute.clone());
        seed_result.validate()?;

        let event = build_event(&state, &seed_result);
        event.validate()?;

        self.complete_execution(&state.execution_id, seed_execute, seed_result, event.clone());
        tracing::info!(
            command_id = %state.command_id,
            execution_id = %state.execution_id,
            outcome = %event.outcome,
            "command complete"
        );
        Ok(event)
    }

    fn execute_seed(&self, mut exec: SeedExecute) -> SeedResult {
        // The registry handle is cloned out so no lock is held while the
        // seed runs.
        let Some(registry) = self.registry() else {
            return error_result(&exec, "seed registry unavailable", 1);
        };
        let Some(seed) = registry.resolve(&exec.seed_id) else {
            let reason = format!("unknown seed: {}", exec.seed_id);
            return error_result(&exec, &reason, UNKNOWN_SEED_EXIT_CODE);
        };

        let id = seed.metadata().id.trim().to_string();
        if !id.is_empty() {
            exec.seed_id = id;
        }
        match seed.execute(&exec.operation, &exec.args) {
            Ok(output) => normalize(&exec, output, None),
            Err(failure) => normalize(&exec, failure.output, Some(&failure.error)),
        }
    }
}

fn build_seed_execute(state: &ExecutionState) -> SeedExecute {
    SeedExecute {
        execution_id: state.execution_id.clone(),
        command_id: state.command_id.clone(),
        seed_id: state.seed_selector.clone(),
        operation: state.operation.clone(),
        args: state.args.clone(),
    }
}

/// Infers a missing status and makes sure a failed execution has a nonzero
/// exit code and something on stderr.
fn normalize(exec: &SeedExecute, output: SeedOutput, error: Option<&SeedError>) -> SeedResult {
    let mut status = match output.status {
        Some(status) => status,
        None if error.is_some() || output.exit_code != 0 => SeedStatus::Error,
        None => SeedStatus::Ok,
    };
    let mut exit_code = output.exit_code;
    let mut stderr = output.stderr;

    if let Some(error) = error {
        status = SeedStatus::Error;
        if exit_code == 0 {
            exit_code = 1;
        }
        if stderr.is_empty() {
            stderr = Bytes::from(format!("{error}\n"));
        }
    }

    SeedResult {
        execution_id: exec.execution_id.clone(),
        seed_id: exec.seed_id.clone(),
        status: status.as_str().to_string(),
        stdout: output.stdout,
        stderr,
        exit_code,
    }
}

fn error_result(exec: &SeedExecute, reason: &str, exit_code: i32) -> SeedResult {
    SeedResult {
        execution_id: exec.execution_id.clone(),
        seed_id: exec.seed_id.clone(),
        status: SeedStatus::Error.as_str().to_string(),
        stdout: Bytes::new(),
        stderr: Bytes::from(format!("{reason}\n")),
        exit_code,
    }
}

fn build_event(state: &ExecutionState, result: &SeedResult) -> Event {
    let succeeded = result.status == SeedStatus::Ok.as_str() && result.exit_code == 0;
    Event {
        event_id: format!("evt.{}", state.command_id),
        command_id: state.command_id.clone(),
        intent_id: state.intent_id.clone(),
        ghost_id: state.ghost_id.clone(),
        seed_id: result.seed_id.clone(),
        outcome: if succeeded {
            Outcome::Success
        } else {
            Outcome::Error
        },
        timestamp_ms: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::execution::ExecutionPhase;
    use edge_core::{Args, Command};
    use edge_seeds::{CatalogOptions, OperationSpec, Seed, SeedFailure, SeedMetadata, SeedRegistry};

    /// Returns whatever output it was built with, failing with
    /// `MissingArg` when `fail` is set.
    struct CannedSeed {
        output: SeedOutput,
        fail: bool,
    }

    impl Seed for CannedSeed {
        fn metadata(&self) -> SeedMetadata {
            SeedMetadata {
                id: "seed.canned".into(),
                name: "Canned".into(),
                description: "test seed".into(),
            }
        }

        fn operations(&self) -> Vec<OperationSpec> {
            vec![OperationSpec::idempotent("run", "returns canned output")]
        }

        fn execute(&self, _operation: &str, _args: &Args) -> Result<SeedOutput, SeedFailure> {
            if self.fail {
                return Err(SeedFailure::new(
                    self.output.clone(),
                    SeedError::MissingArg {
                        seed: "seed.canned",
                        arg: "thing",
                    },
                ));
            }
            Ok(self.output.clone())
        }
    }

    fn server_with(registry: SeedRegistry) -> GhostServer {
        let server = GhostServer::new();
        server.appear("ghost.alpha").unwrap();
        server.seed(Arc::new(registry)).unwrap();
        server.radiate().unwrap();
        server
    }

    fn builtin_server() -> GhostServer {
        server_with(
            edge_seeds::builtin_registry(&["seed.flow", "seed.kv"], &CatalogOptions::default())
                .unwrap(),
        )
    }

    fn canned_server(output: SeedOutput, fail: bool) -> GhostServer {
        let mut registry = SeedRegistry::new();
        registry
            .register(Arc::new(CannedSeed { output, fail }))
            .unwrap();
        server_with(registry)
    }

    fn env(message_id: u64, selector: &str, operation: &str) -> CommandEnvelope {
        CommandEnvelope::new(
            message_id,
            Command {
                command_id: format!("cmd.{message_id}"),
                intent_id: "intent.1".into(),
                ghost_id: "ghost.alpha".into(),
                seed_selector: selector.into(),
                operation: operation.into(),
                ..Command::default()
            },
        )
    }

    #[test]
    fn flow_status_completes_with_success() {
        let server = builtin_server();
        let event = server
            .handle_command_and_execute(&env(1, "seed.flow", "status"))
            .unwrap();
        assert_eq!(event.event_id, "evt.cmd.1");
        assert_eq!(event.outcome, Outcome::Success);
        assert_eq!(event.seed_id, "seed.flow");
        assert!(event.timestamp_ms > 0);

        let state = server.execution_by_command_id("cmd.1").unwrap();
        assert_eq!(state.phase, ExecutionPhase::Complete);
        let result = state.seed_result.unwrap();
        assert_eq!(result.status, "ok");
        assert_eq!(&result.stdout[..], b"flow status: ok\n");
        assert_eq!(state.seed_execute.unwrap().seed_id, "seed.flow");
        assert_eq!(state.event.unwrap(), event);
    }

    #[test]
    fn unknown_seed_becomes_error_event() {
        let server = builtin_server();
        let event = server
            .handle_command_and_execute(&env(1, "seed.missing", "status"))
            .unwrap();
        assert_eq!(event.outcome, Outcome::Error);
        assert_eq!(event.seed_id, "seed.missing");

        let result = server
            .execution_by_command_id("cmd.1")
            .unwrap()
            .seed_result
            .unwrap();
        assert_eq!(result.exit_code, UNKNOWN_SEED_EXIT_CODE);
        assert_eq!(&result.stderr[..], b"unknown seed: seed.missing\n");
    }

    #[test]
    fn boundary_failure_records_nothing() {
        let server = GhostServer::new();
        server.appear("ghost.alpha").unwrap();
        let err = server
            .handle_command_and_execute(&env(1, "seed.flow", "status"))
            .unwrap_err();
        assert!(matches!(err, GhostError::NotRadiating { .. }));
        assert!(server.execution_by_command_id("cmd.1").is_none());
    }

    #[test]
    fn kv_missing_key_is_error_outcome() {
        let server = builtin_server();
        let event = server
            .handle_command_and_execute(&env(1, "seed.kv", "get"))
            .unwrap();
        assert_eq!(event.outcome, Outcome::Error);
        let result = server
            .execution_by_command_id("cmd.1")
            .unwrap()
            .seed_result
            .unwrap();
        assert_eq!(result.status, "error");
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn missing_status_is_inferred_from_exit_code() {
        let quiet_failure = SeedOutput {
            status: None,
            exit_code: 3,
            ..SeedOutput::default()
        };
        let server = canned_server(quiet_failure, false);
        let event = server
            .handle_command_and_execute(&env(1, "seed.canned", "run"))
            .unwrap();
        assert_eq!(event.outcome, Outcome::Error);
        let result = server.execution("exec.cmd.1").unwrap().seed_result.unwrap();
        assert_eq!(result.status, "error");
        assert_eq!(result.exit_code, 3);

        let server = canned_server(SeedOutput::default(), false);
        let event = server
            .handle_command_and_execute(&env(1, "seed.canned", "run"))
            .unwrap();
        assert_eq!(event.outcome, Outcome::Success);
    }

    #[test]
    fn execution_error_forces_nonzero_exit_and_stderr() {
        let claimed_ok = SeedOutput {
            status: Some(SeedStatus::Ok),
            ..SeedOutput::default()
        };
        let server = canned_server(claimed_ok, true);
        let event = server
            .handle_command_and_execute(&env(1, "seed.canned", "run"))
            .unwrap();
        assert_eq!(event.outcome, Outcome::Error);
        let result = server.execution("exec.cmd.1").unwrap().seed_result.unwrap();
        assert_eq!(result.status, "error");
        assert_eq!(result.exit_code, 1);
        assert_eq!(&result.stderr[..], b"seed.canned: missing thing\n");
    }
}
