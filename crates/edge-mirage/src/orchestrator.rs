//! Desired and observed intent state, and the single-step reconcile.
//!
//! An [`Issue`] is normalized into an ordered plan of [`PlannedCommand`]s.
//! Each [`Orchestrator::reconcile_once`] call dispatches at most one
//! command: the first one in plan order with no observed event. Blocking
//! steps take a lock on their `ghost::seed` key so at most one intent runs
//! against that seed at a time; there is no queue, the first caller to see
//! the lock free wins.
//!
//! The state mutex is held only for map access. Executors and frame round
//! trips run with it released, then the result is committed under a fresh
//! acquisition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, OrchestratorError};
use edge_core::{
    Args, Command, CompletionState, Event, Frame, FrameLimits, Outcome, Report, ReportPhase,
    WireError, now_ms, round_trip,
};
use edge_session::CancelToken;

/// Selector used by legacy single-command issues that name none.
pub const DEFAULT_SEED_SELECTOR: &str = "seed.flow";

/// Runs one command on a Ghost and returns its terminal event.
pub trait CommandExecutor: Send + Sync {
    fn execute_command(&self, cancel: &CancelToken, command: Command)
    -> Result<Event, ExecutorError>;
}

/// One step of an explicit command plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueCommand {
    pub ghost_id: String,
    pub seed_selector: String,
    pub operation: String,
    pub args: Args,
    pub blocking: bool,
}

impl IssueCommand {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let missing = |field: &str| Err(OrchestratorError::InvalidIssue(format!("missing {field}")));
        if self.ghost_id.trim().is_empty() {
            return missing("ghost_id");
        }
        if self.seed_selector.trim().is_empty() {
            return missing("seed_selector");
        }
        if self.operation.trim().is_empty() {
            return missing("operation");
        }
        Ok(())
    }
}

/// Desired state submitted by an actor.
///
/// With an empty `command_plan` the issue describes a single command using
/// the legacy `seed_selector`/`operation`/`args` fields and a `target_scope`
/// naming the ghost (optionally prefixed with `ghost:`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Issue {
    pub intent_id: String,
    pub actor: String,
    pub target_scope: String,
    pub objective: String,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command_plan: Vec<IssueCommand>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub seed_selector: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(skip_serializing_if = "Args::is_empty")]
    pub args: Args,
}

impl Issue {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let missing = |field: &str| Err(OrchestratorError::InvalidIssue(format!("missing {field}")));
        if self.intent_id.trim().is_empty() {
            return missing("intent_id");
        }
        if self.actor.trim().is_empty() {
            return missing("actor");
        }
        if self.target_scope.trim().is_empty() {
            return missing("target_scope");
        }
        if self.objective.trim().is_empty() {
            return missing("objective");
        }
        for (i, step) in self.command_plan.iter().enumerate() {
            if let Err(OrchestratorError::InvalidIssue(reason)) = step.validate() {
                return Err(OrchestratorError::InvalidIssue(format!(
                    "command_plan[{i}]: {reason}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCommand {
    pub command: Command,
    pub blocking: bool,
    /// `ghost_id::seed_selector`
    pub seed_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredIntent {
    pub issue: Issue,
    pub commands: Vec<PlannedCommand>,
    pub received_at_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedIntent {
    pub events: Vec<Event>,
    pub reports: Vec<Report>,
    pub observed_at_ms: u64,
    pub by_command_id: BTreeMap<String, Event>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub desired: DesiredIntent,
    pub observed: Option<ObservedIntent>,
    pub pending_count: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub intent_count: usize,
    pub observed_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SeedLock {
    intent_id: String,
    command_id: String,
}

impl SeedLock {
    fn is_held_by(&self, intent_id: &str, command_id: &str) -> bool {
        self.intent_id == intent_id && self.command_id == command_id
    }
}

#[derive(Default)]
struct OrchestratorState {
    desired: BTreeMap<String, DesiredIntent>,
    observed: BTreeMap<String, ObservedIntent>,
    executors: BTreeMap<String, Arc<dyn CommandExecutor>>,
    seed_locks: BTreeMap<String, SeedLock>,
}

impl OrchestratorState {
    /// Drops the lock on `seed_key` only if `(intent_id, command_id)` still
    /// owns it.
    fn release_seed_lock(&mut self, seed_key: &str, intent_id: &str, command_id: &str) {
        if self
            .seed_locks
            .get(seed_key)
            .is_some_and(|lock| lock.is_held_by(intent_id, command_id))
        {
            self.seed_locks.remove(seed_key);
        }
    }
}

#[derive(Default)]
pub struct Orchestrator {
    state: Mutex<OrchestratorState>,
    seq: AtomicU64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Orchestrator")
            .field("intents", &state.desired.len())
            .field("observed", &state.observed.len())
            .field("executors", &state.executors.keys().collect::<Vec<_>>())
            .field("seed_locks", &state.seed_locks.len())
            .finish()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let state = self.lock();
        OrchestratorSnapshot {
            intent_count: state.desired.len(),
            observed_count: state.observed.len(),
        }
    }

    /// Binds `ghost_id` to an executor, replacing any earlier binding.
    pub fn register_executor(
        &self,
        ghost_id: &str,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<(), OrchestratorError> {
        let key = ghost_id.trim();
        if key.is_empty() {
            return Err(OrchestratorError::TargetGhostRequired {
                target_scope: ghost_id.to_string(),
            });
        }
        self.lock().executors.insert(key.to_string(), executor);
        Ok(())
    }

    /// Validates and plans `issue`, replacing any desired state for the
    /// same intent and discarding its observed history.
    pub fn submit_issue(&self, mut issue: Issue) -> Result<(), OrchestratorError> {
        issue.validate()?;
        let now = now_ms();
        if issue.timestamp_ms == 0 {
            issue.timestamp_ms = now;
        }
        let commands = plan_commands(&issue)?;
        let intent_id = issue.intent_id.clone();
        tracing::info!(%intent_id, commands = commands.len(), "issue submitted");

        let mut state = self.lock();
        state.desired.insert(
            intent_id.clone(),
            DesiredIntent {
                issue,
                commands,
                received_at_ms: now,
            },
        );
        state.observed.remove(&intent_id);
        Ok(())
    }

    pub fn snapshot_intent(&self, intent_id: &str) -> Option<IntentSnapshot> {
        let key = intent_id.trim();
        let state = self.lock();
        let desired = state.desired.get(key)?.clone();
        let observed = state.observed.get(key).cloned();
        let pending_count = match &observed {
            Some(observed) => pending_count(&desired.commands, observed),
            None => desired.commands.len(),
        };
        Some(IntentSnapshot {
            desired,
            observed,
            pending_count,
        })
    }

    pub fn list_intent_ids(&self) -> Vec<String> {
        self.lock().desired.keys().cloned().collect()
    }

    /// Dispatches the next pending command of `intent_id`, if any, and
    /// returns the resulting report.
    pub fn reconcile_once(
        &self,
        cancel: &CancelToken,
        intent_id: &str,
    ) -> Result<Report, OrchestratorError> {
        let key = intent_id.trim();
        let span = tracing::info_span!("reconcile", intent_id = %key);
        let _guard = span.enter();

        let (desired, next, executor) = {
            let mut state = self.lock();
            let Some(desired) = state.desired.get(key).cloned() else {
                return Err(OrchestratorError::IntentNotFound {
                    intent_id: key.to_string(),
                });
            };
            let observed = state.observed.get(key);
            let Some(next) = next_pending(&desired.commands, observed).cloned() else {
                return Ok(latest_or_settled_report(&desired, observed));
            };
            let command_id = next.command.command_id.clone();

            if next.blocking {
                match state.seed_locks.get(&next.seed_key).cloned() {
                    Some(lock) if !lock.is_held_by(key, &command_id) => {
                        let report = waiting_report(&desired, &next, &lock);
                        tracing::info!(
                            seed_key = %next.seed_key,
                            holder = %lock.intent_id,
                            "waiting on seed lock"
                        );
                        let observed = state.observed.entry(key.to_string()).or_default();
                        observed.reports.push(report.clone());
                        observed.observed_at_ms = now_ms();
                        return Ok(report);
                    }
                    Some(_) => {}
                    None => {
                        state.seed_locks.insert(
                            next.seed_key.clone(),
                            SeedLock {
                                intent_id: key.to_string(),
                                command_id: command_id.clone(),
                            },
                        );
                    }
                }
            }

            let executor = state.executors.get(&next.command.ghost_id).cloned();
            match executor {
                Some(executor) => (desired, next, executor),
                None => {
                    if next.blocking {
                        state.release_seed_lock(&next.seed_key, key, &command_id);
                    }
                    return Err(OrchestratorError::NoExecutor {
                        ghost_id: next.command.ghost_id.clone(),
                    });
                }
            }
        };

        let command_id = next.command.command_id.clone();
        tracing::debug!(%command_id, ghost_id = %next.command.ghost_id, "dispatching command");
        let dispatched = self
            .through_wire(&next.command, Command::encode_frame, Command::decode_frame)
            .and_then(|command| Ok(executor.execute_command(cancel, command)?))
            .and_then(|event| self.through_wire(&event, Event::encode_frame, Event::decode_frame));

        let mut state = self.lock();
        let event = match dispatched {
            Ok(event) => event,
            Err(err) => {
                if next.blocking {
                    state.release_seed_lock(&next.seed_key, key, &command_id);
                }
                tracing::warn!(%command_id, error = %err, "dispatch failed");
                return Err(err);
            }
        };
        if next.blocking {
            state.release_seed_lock(&next.seed_key, key, &command_id);
        }

        let Some(report) = self.commit_event(&mut state, &desired, key, event)? else {
            // Recorded meanwhile through the session path.
            return Ok(latest_or_settled_report(&desired, state.observed.get(key)));
        };
        tracing::info!(
            %command_id,
            phase = %report.phase,
            completion = %report.completion_state,
            "reconciled"
        );
        Ok(report)
    }

    /// Records an event delivered over a Ghost session against the desired
    /// command with the same `command_id`.
    ///
    /// Returns `None` when no desired command matches or when the command
    /// already has an observed event.
    pub fn ingest_observed_event(&self, event: &Event) -> Result<Option<Report>, OrchestratorError> {
        let event = self.through_wire(event, Event::encode_frame, Event::decode_frame)?;
        let key = event.intent_id.trim().to_string();
        let key = key.as_str();

        let mut state = self.lock();
        let Some(desired) = state.desired.get(key).cloned() else {
            return Ok(None);
        };
        let Some(planned) = desired
            .commands
            .iter()
            .find(|planned| planned.command.command_id == event.command_id)
        else {
            return Ok(None);
        };
        if planned.blocking {
            state.release_seed_lock(&planned.seed_key, key, &event.command_id);
        }

        let command_id = event.command_id.clone();
        let report = self.commit_event(&mut state, &desired, key, event)?;
        if report.is_some() {
            tracing::debug!(%command_id, intent_id = %key, "observed event ingested");
        }
        Ok(report)
    }

    /// Builds the report for `event` and records both under `key`. Nothing
    /// is stored unless the report survives the wire. `None` means the
    /// command already has an observed event.
    fn commit_event(
        &self,
        state: &mut OrchestratorState,
        desired: &DesiredIntent,
        key: &str,
        event: Event,
    ) -> Result<Option<Report>, OrchestratorError> {
        let report = {
            let empty = ObservedIntent::default();
            let observed = state.observed.get(key).unwrap_or(&empty);
            if observed.by_command_id.contains_key(&event.command_id) {
                return Ok(None);
            }
            self.through_wire(
                &report_for_event(desired, observed, &event),
                Report::encode_frame,
                Report::decode_frame,
            )?
        };
        let observed = state.observed.entry(key.to_string()).or_default();
        record(observed, event, report.clone());
        Ok(Some(report))
    }

    fn next_message_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Encodes `value` into a frame, pushes it through the byte codec and
    /// decodes it again.
    fn through_wire<T>(
        &self,
        value: &T,
        encode: impl FnOnce(&T, u64) -> Result<Frame, WireError>,
        decode: impl FnOnce(&Frame) -> Result<T, WireError>,
    ) -> Result<T, OrchestratorError> {
        let frame = encode(value, self.next_message_id())?;
        let frame = round_trip(&frame, FrameLimits::default())?;
        Ok(decode(&frame)?)
    }
}

fn record(observed: &mut ObservedIntent, event: Event, report: Report) {
    observed
        .by_command_id
        .insert(event.command_id.clone(), event.clone());
    observed.events.push(event);
    observed.reports.push(report);
    observed.observed_at_ms = now_ms();
}

fn plan_commands(issue: &Issue) -> Result<Vec<PlannedCommand>, OrchestratorError> {
    let intent_id = issue.intent_id.trim();
    let prefix = sanitize_id(intent_id);
    if !issue.command_plan.is_empty() {
        return issue
            .command_plan
            .iter()
            .enumerate()
            .map(|(i, step)| {
                step.validate()?;
                Ok(planned(
                    Command {
                        command_id: format!("cmd.{prefix}.{}", i + 1),
                        intent_id: intent_id.to_string(),
                        ghost_id: step.ghost_id.trim().to_string(),
                        seed_selector: step.seed_selector.trim().to_string(),
                        operation: step.operation.trim().to_string(),
                        args: step.args.clone(),
                    },
                    step.blocking,
                ))
            })
            .collect();
    }

    let ghost_id = ghost_id_from_scope(&issue.target_scope);
    if ghost_id.is_empty() {
        return Err(OrchestratorError::TargetGhostRequired {
            target_scope: issue.target_scope.clone(),
        });
    }
    let seed_selector = match issue.seed_selector.trim() {
        "" => DEFAULT_SEED_SELECTOR,
        selector => selector,
    };
    let operation = match issue.operation.trim() {
        "" => issue.objective.trim(),
        operation => operation,
    };
    if operation.is_empty() {
        return Err(OrchestratorError::InvalidIssue("missing operation".into()));
    }
    Ok(vec![planned(
        Command {
            command_id: format!("cmd.{prefix}.1"),
            intent_id: intent_id.to_string(),
            ghost_id: ghost_id.to_string(),
            seed_selector: seed_selector.to_string(),
            operation: operation.to_string(),
            args: issue.args.clone(),
        },
        false,
    )])
}

fn planned(command: Command, blocking: bool) -> PlannedCommand {
    PlannedCommand {
        seed_key: seed_lock_key(&command.ghost_id, &command.seed_selector),
        command,
        blocking,
    }
}

fn next_pending<'a>(
    commands: &'a [PlannedCommand],
    observed: Option<&ObservedIntent>,
) -> Option<&'a PlannedCommand> {
    commands.iter().find(|planned| {
        observed.is_none_or(|obs| !obs.by_command_id.contains_key(&planned.command.command_id))
    })
}

fn pending_count(commands: &[PlannedCommand], observed: &ObservedIntent) -> usize {
    commands
        .iter()
        .filter(|planned| !observed.by_command_id.contains_key(&planned.command.command_id))
        .count()
}

/// Builds the report for `event` as if it were about to be recorded.
fn report_for_event(desired: &DesiredIntent, observed: &ObservedIntent, event: &Event) -> Report {
    let intent_id = &desired.issue.intent_id;
    let completed_after = observed.by_command_id.len() + 1;
    let total = desired.commands.len();
    let (phase, completion_state, summary) = if event.outcome == Outcome::Error {
        (
            ReportPhase::Complete,
            CompletionState::Failed,
            format!("intent {intent_id} failed on {}", event.ghost_id),
        )
    } else if completed_after >= total {
        (
            ReportPhase::Complete,
            CompletionState::Satisfied,
            format!("intent {intent_id} satisfied on {}", event.ghost_id),
        )
    } else {
        (
            ReportPhase::InProgress,
            CompletionState::InProgress,
            format!(
                "intent {intent_id} progress {completed_after}/{total} on {}",
                event.ghost_id
            ),
        )
    };
    Report {
        intent_id: intent_id.clone(),
        phase,
        summary,
        completion_state,
        command_id: Some(event.command_id.clone()),
        execution_id: None,
        event_id: Some(event.event_id.clone()),
        outcome: Some(event.outcome),
        timestamp_ms: now_ms(),
    }
}

fn latest_or_settled_report(desired: &DesiredIntent, observed: Option<&ObservedIntent>) -> Report {
    if let Some(report) = observed.and_then(|obs| obs.reports.last()) {
        return report.clone();
    }
    let intent_id = &desired.issue.intent_id;
    Report {
        intent_id: intent_id.clone(),
        phase: ReportPhase::Complete,
        summary: format!("intent {intent_id} has no command plan"),
        completion_state: CompletionState::Satisfied,
        timestamp_ms: now_ms(),
        ..Report::default()
    }
}

fn waiting_report(desired: &DesiredIntent, next: &PlannedCommand, lock: &SeedLock) -> Report {
    let intent_id = &desired.issue.intent_id;
    Report {
        intent_id: intent_id.clone(),
        phase: ReportPhase::InProgress,
        summary: format!(
            "intent {intent_id} waiting on seed lock {} held by {}/{}",
            next.seed_key, lock.intent_id, lock.command_id
        ),
        completion_state: CompletionState::InProgress,
        command_id: Some(next.command.command_id.clone()),
        outcome: Some(Outcome::Success),
        timestamp_ms: now_ms(),
        ..Report::default()
    }
}

/// Strips an optional `ghost:` prefix from a target scope.
fn ghost_id_from_scope(target_scope: &str) -> &str {
    let scope = target_scope.trim();
    scope.strip_prefix("ghost:").unwrap_or(scope).trim()
}

/// Spaces and slashes become dots.
pub fn sanitize_id(raw: &str) -> String {
    raw.trim().replace([' ', '/'], ".")
}

pub fn seed_lock_key(ghost_id: &str, seed_selector: &str) -> String {
    format!("{}::{}", ghost_id.trim(), seed_selector.trim())
}
