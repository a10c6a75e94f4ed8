//! `seed.mongod`: drives a mongod systemd unit through shell commands.
//!
//! Every command goes through a [`CommandRunner`] so hosts without systemd
//! (and tests) can swap the process layer out.

use std::io;
use std::process::Command;
use std::sync::Arc;

use bytes::Bytes;
use edge_core::Args;

use crate::seed::{
    OperationSpec, Seed, SeedError, SeedFailure, SeedMetadata, SeedOutput, SeedStatus,
};

pub const SEED_ID: &str = "seed.mongod";
pub const DEFAULT_UNIT: &str = "mongod";

const EXIT_UNKNOWN_ACTION: i32 = 64;
const EXIT_SPAWN_FAILED: i32 = 1;
const EXIT_NOT_FOUND: i32 = 127;

/// Captured output of one finished process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub exit_code: i32,
}

/// Runs one program to completion. A nonzero exit is still `Ok`; `Err`
/// means the process could not be run at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Runs commands on the local host.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            stdout: Bytes::from(output.stdout),
            stderr: Bytes::from(output.stderr),
            // Killed by a signal.
            exit_code: output.status.code().unwrap_or(EXIT_SPAWN_FAILED),
        })
    }
}

#[derive(Clone)]
pub struct MongodSeed {
    unit: String,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for MongodSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongodSeed")
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

impl Default for MongodSeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MongodSeed {
    pub fn new() -> Self {
        Self::with_runner(DEFAULT_UNIT, Arc::new(SystemRunner))
    }

    /// A blank `unit` falls back to [`DEFAULT_UNIT`].
    pub fn with_runner(unit: &str, runner: Arc<dyn CommandRunner>) -> Self {
        let unit = match unit.trim() {
            "" => DEFAULT_UNIT.to_string(),
            trimmed => trimmed.to_string(),
        };
        Self { unit, runner }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    fn exec(&self, program: &str, args: &[&str]) -> Result<SeedOutput, SeedFailure> {
        let (output, reason) = match self.runner.run(program, args) {
            Ok(output) if output.exit_code == 0 => {
                tracing::info!(program, ?args, "seed.mongod command ok");
                return Ok(SeedOutput {
                    status: Some(SeedStatus::Ok),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: 0,
                });
            }
            Ok(output) => {
                let reason = format!("exit status {}", output.exit_code);
                (output, reason)
            }
            Err(err) => {
                let exit_code = if err.kind() == io::ErrorKind::NotFound {
                    EXIT_NOT_FOUND
                } else {
                    EXIT_SPAWN_FAILED
                };
                let output = CommandOutput {
                    exit_code,
                    ..CommandOutput::default()
                };
                (output, err.to_string())
            }
        };
        tracing::error!(
            program,
            ?args,
            exit_code = output.exit_code,
            %reason,
            "seed.mongod command failed"
        );
        let stderr = if output.stderr.is_empty() {
            Bytes::from(format!("{reason}\n"))
        } else {
            output.stderr
        };
        let exit_code = if output.exit_code == 0 {
            EXIT_SPAWN_FAILED
        } else {
            output.exit_code
        };
        Err(SeedFailure::new(
            SeedOutput {
                status: Some(SeedStatus::Error),
                stdout: output.stdout,
                stderr,
                exit_code,
            },
            SeedError::CommandFailed {
                seed: SEED_ID,
                program: program.to_string(),
                reason,
            },
        ))
    }
}

impl Seed for MongodSeed {
    fn metadata(&self) -> SeedMetadata {
        SeedMetadata {
            id: SEED_ID.into(),
            name: "MongoDB (mongod)".into(),
            description: "Predefined mongod service adapter for Linux hosts".into(),
        }
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::idempotent("status", "read mongod service status"),
            OperationSpec::idempotent("start", "start mongod service"),
            OperationSpec::idempotent("stop", "stop mongod service"),
            OperationSpec {
                name: "restart".into(),
                description: "restart mongod service".into(),
                idempotent: false,
            },
            OperationSpec::idempotent("version", "read mongod binary version"),
        ]
    }

    fn execute(&self, operation: &str, args: &Args) -> Result<SeedOutput, SeedFailure> {
        let operation = operation.trim();
        let unit = args
            .get("unit")
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .unwrap_or(self.unit.as_str());
        tracing::debug!(operation, unit, "seed.mongod execute");
        match operation {
            "status" => self.exec("systemctl", &["is-active", unit]),
            "start" | "stop" | "restart" => self.exec("systemctl", &[operation, unit]),
            "version" => self.exec("mongod", &["--version"]),
            other => {
                tracing::warn!(action = other, "seed.mongod unknown action");
                Err(SeedFailure::new(
                    SeedOutput::error(&format!("unknown action: {other}"), EXIT_UNKNOWN_ACTION),
                    SeedError::UnknownAction {
                        seed: SEED_ID,
                        action: other.to_string(),
                    },
                ))
            }
        }
    }
}
