//! Ghost admin control: JSON-line actions over TCP.
//!
//! `execute` builds a command from a loose admin request; `execute_envelope`
//! takes a binary Command frame and answers with a binary Event frame, which
//! is how Mirage drives a Ghost. Both paths run one at a time and are kept
//! in a bounded history for `recent_events` and `verification`.

use std::collections::VecDeque;
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cluster::SpawnGhostRequest;
use crate::command::CommandEnvelope;
use crate::error::GhostError;
use crate::execution::ExecutionState;
use crate::service::GhostService;
use edge_core::{Args, Command, Event, FrameLimits, MessageType, read_frame, write_frame};
use edge_session::AdminResponse;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminCommand {
    pub intent_id: String,
    pub seed_selector: String,
    pub operation: String,
    pub args: Args,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminRequest {
    pub action: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub limit: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command_id: String,
    pub command: AdminCommand,
    /// Encoded Command frame for `execute_envelope`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command_frame: Vec<u8>,
    pub spawn: SpawnGhostRequest,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl AdminRequest {
    pub fn action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeReply {
    pub event_frame: Vec<u8>,
}

/// Command to event custody for one admin execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub request_id: String,
    pub trace_id: String,
    pub command_message_id: u64,
    pub command_message_type: u32,
    pub event_message_type: u32,
    pub command_id: String,
    pub execution_id: String,
    pub event_id: String,
    pub ghost_id: String,
    pub seed_id: String,
    pub operation: String,
    pub outcome: String,
    /// Unset when the execution never produced a seed result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timestamp_ms: u64,
}

impl VerificationRecord {
    fn new(env: &CommandEnvelope, state: &ExecutionState, event: &Event) -> Self {
        let result = state.seed_result.as_ref();
        Self {
            request_id: format!("req.{}.{}", state.ghost_id, env.message_id),
            trace_id: format!("trace.{}.{}", state.ghost_id, env.message_id),
            command_message_id: env.message_id,
            command_message_type: MessageType::Command.code(),
            event_message_type: MessageType::Event.code(),
            command_id: state.command_id.clone(),
            execution_id: state.execution_id.clone(),
            event_id: event.event_id.clone(),
            ghost_id: state.ghost_id.clone(),
            seed_id: event.seed_id.clone(),
            operation: state.operation.clone(),
            outcome: event.outcome.as_str().to_string(),
            seed_status: result.map(|r| r.status.clone()),
            exit_code: result.map(|r| r.exit_code),
            timestamp_ms: event.timestamp_ms,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AdminLog {
    seq: u64,
    events: VecDeque<Event>,
    verification: VecDeque<VerificationRecord>,
}

impl AdminLog {
    fn next_message_id(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn record(&mut self, event: Event, record: VerificationRecord) {
        push_bounded(&mut self.events, event);
        push_bounded(&mut self.verification, record);
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) {
    if queue.len() == MAX_HISTORY {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// Last `limit` items, oldest first. Zero means the default.
fn tail<T: Clone>(queue: &VecDeque<T>, limit: usize) -> Vec<T> {
    let limit = if limit == 0 {
        DEFAULT_HISTORY_LIMIT
    } else {
        limit
    };
    let skip = queue.len().saturating_sub(limit);
    queue.iter().skip(skip).cloned().collect()
}

impl GhostService {
    /// Runs one admin `execute` request as a command addressed to this
    /// Ghost, with ids generated from the admin sequence.
    pub fn execute_admin_command(
        &self,
        cmd: &AdminCommand,
    ) -> Result<(ExecutionState, Event), GhostError> {
        let mut log = self.admin_log();
        let ghost_id = self.server().ghost_id();
        let message_id = log.next_message_id();
        let intent_id = match cmd.intent_id.trim() {
            "" => format!("intent.{ghost_id}.{message_id}"),
            given => given.to_string(),
        };
        let env = CommandEnvelope::new(
            message_id,
            Command {
                command_id: format!("cmd.{ghost_id}.{message_id}"),
                intent_id,
                ghost_id: ghost_id.clone(),
                seed_selector: cmd.seed_selector.trim().to_string(),
                operation: cmd.operation.trim().to_string(),
                args: cmd.args.clone(),
            },
        );
        let (state, event) = self.run_and_record(&mut log, &env)?;
        drop(log);
        self.forward_event(event.clone());
        Ok((state, event))
    }

    /// Decodes a Command frame, executes it and returns the encoded Event
    /// frame. The event frame reuses the command's message id.
    pub fn execute_envelope(&self, command_frame: &[u8]) -> Result<Vec<u8>, GhostError> {
        let limits = FrameLimits::default();
        let frame = read_frame(&mut Cursor::new(command_frame), limits)?;
        let env = CommandEnvelope::decode_frame(&frame)?;

        let mut log = self.admin_log();
        let (_, event) = self.run_and_record(&mut log, &env)?;
        drop(log);

        let mut out = Vec::new();
        write_frame(&mut out, &event.encode_frame(env.message_id)?, limits)?;
        self.forward_event(event);
        Ok(out)
    }

    fn run_and_record(
        &self,
        log: &mut AdminLog,
        env: &CommandEnvelope,
    ) -> Result<(ExecutionState, Event), GhostError> {
        let server = self.server();
        let event = server.handle_command_and_execute(env)?;
        let command_id = env.command.command_id.trim();
        let state = server
            .execution_by_command_id(command_id)
            .ok_or_else(|| GhostError::MissingExecution {
                command_id: command_id.to_string(),
            })?;

        let record = VerificationRecord::new(env, &state, &event);
        log.record(event.clone(), record);
        Ok((state, event))
    }

    pub fn recent_admin_events(&self, limit: usize) -> Vec<Event> {
        tail(&self.admin_log().events, limit)
    }

    pub fn verification_view(&self, limit: usize) -> Vec<VerificationRecord> {
        tail(&self.admin_log().verification, limit)
    }

    pub fn handle_admin_request(&self, req: AdminRequest) -> AdminResponse {
        tracing::debug!(action = %req.action, "admin request");
        match req.action.as_str() {
            "status" => AdminResponse::ok(self.server().status()),
            "list_seeds" => AdminResponse::ok(self.server().seed_metadata()),
            "execute" => match self.execute_admin_command(&req.command) {
                Ok((execution, event)) => {
                    AdminResponse::ok(json!({ "execution": execution, "event": event }))
                }
                Err(err) => AdminResponse::err(err),
            },
            "execute_envelope" => match self.execute_envelope(&req.command_frame) {
                Ok(event_frame) => AdminResponse::ok(EnvelopeReply { event_frame }),
                Err(err) => AdminResponse::err(err),
            },
            "execution_by_command_id" => {
                let execution = self.server().execution_by_command_id(&req.command_id);
                AdminResponse::ok(json!({
                    "found": execution.is_some(),
                    "execution": execution.unwrap_or_default(),
                }))
            }
            "recent_events" => AdminResponse::ok(self.recent_admin_events(req.limit)),
            "verification" => AdminResponse::ok(self.verification_view(req.limit)),
            "spawn_ghost" => match self.spawn_managed_ghost(&req.spawn) {
                Ok(out) => AdminResponse::ok(out),
                Err(err) => AdminResponse::err(err),
            },
            other => AdminResponse::err(format!("unknown action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GhostConfig;
    use crate::server::GhostStatus;
    use edge_core::{Outcome, frame::Frame};

    fn service() -> Arc<GhostService> {
        GhostService::bootstrap(GhostConfig {
            id: "ghost.alpha".into(),
            admin_listen: String::new(),
            ..GhostConfig::default()
        })
        .unwrap()
    }

    fn execute(svc: &GhostService, operation: &str) -> AdminResponse {
        svc.handle_admin_request(AdminRequest {
            action: "execute".into(),
            command: AdminCommand {
                seed_selector: " seed.flow ".into(),
                operation: operation.into(),
                ..AdminCommand::default()
            },
            ..AdminRequest::default()
        })
    }

    #[test]
    fn status_and_seed_listing() {
        let svc = service();
        let status: GhostStatus = svc
            .handle_admin_request(AdminRequest::action("status"))
            .into_data()
            .unwrap();
        assert_eq!(status.ghost_id, "ghost.alpha");
        assert_eq!(status.seed_count, 2);

        let seeds: Vec<edge_seeds::SeedMetadata> = svc
            .handle_admin_request(AdminRequest::action("list_seeds"))
            .into_data()
            .unwrap();
        let ids: Vec<_> = seeds.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["seed.flow", "seed.kv"]);
    }

    #[test]
    fn execute_generates_ids_from_sequence() {
        let svc = service();
        let data: serde_json::Value = execute(&svc, "status").into_data().unwrap();
        assert_eq!(data["execution"]["command_id"], "cmd.ghost.alpha.1");
        assert_eq!(data["execution"]["intent_id"], "intent.ghost.alpha.1");
        assert_eq!(data["execution"]["phase"], "complete");
        assert_eq!(data["event"]["outcome"], "success");

        let data: serde_json::Value = execute(&svc, "explode").into_data().unwrap();
        assert_eq!(data["event"]["command_id"], "cmd.ghost.alpha.2");
        assert_eq!(data["event"]["outcome"], "error");

        let lookup: serde_json::Value = svc
            .handle_admin_request(AdminRequest {
                action: "execution_by_command_id".into(),
                command_id: "cmd.ghost.alpha.2".into(),
                ..AdminRequest::default()
            })
            .into_data()
            .unwrap();
        assert_eq!(lookup["found"], true);
        assert_eq!(lookup["execution"]["seed_result"]["exit_code"], 64);

        let missing: serde_json::Value = svc
            .handle_admin_request(AdminRequest {
                action: "execution_by_command_id".into(),
                command_id: "cmd.nope".into(),
                ..AdminRequest::default()
            })
            .into_data()
            .unwrap();
        assert_eq!(missing["found"], false);
    }

    #[test]
    fn history_views_return_last_entries() {
        let svc = service();
        for _ in 0..3 {
            assert!(execute(&svc, "status").ok);
        }
        let events = svc.recent_admin_events(2);
        let ids: Vec<_> = events.iter().map(|e| e.command_id.as_str()).collect();
        assert_eq!(ids, vec!["cmd.ghost.alpha.2", "cmd.ghost.alpha.3"]);
        assert_eq!(svc.recent_admin_events(0).len(), 3);

        let records = svc.verification_view(1);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.command_message_id, 3);
        assert_eq!(record.execution_id, "exec.cmd.ghost.alpha.3");
        assert_eq!(record.event_id, "evt.cmd.ghost.alpha.3");
        assert_eq!(record.seed_status.as_deref(), Some("ok"));
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.command_message_type, MessageType::Command.code());
    }

    #[test]
    fn verification_without_seed_result_leaves_status_unset() {
        let env = CommandEnvelope {
            message_id: 9,
            command: Command {
                command_id: "cmd.lost.1".into(),
                ..Command::default()
            },
        };
        let state = ExecutionState {
            command_id: "cmd.lost.1".into(),
            execution_id: "exec.cmd.lost.1".into(),
            ghost_id: "ghost.alpha".into(),
            operation: "status".into(),
            ..ExecutionState::default()
        };
        let event = Event {
            event_id: "evt.cmd.lost.1".into(),
            outcome: Outcome::Error,
            ..Event::default()
        };
        let record = VerificationRecord::new(&env, &state, &event);
        assert_eq!(record.outcome, "error");
        assert_eq!(record.seed_status, None);
        assert_eq!(record.exit_code, None);
        assert_eq!(record.request_id, "req.ghost.alpha.9");

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("seed_status").is_none());
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn execute_envelope_round_trips_frames() {
        let svc = service();
        let command = Command {
            command_id: "cmd.remote.1".into(),
            intent_id: "intent.remote".into(),
            ghost_id: "ghost.alpha".into(),
            seed_selector: "seed.flow".into(),
            operation: "status".into(),
            ..Command::default()
        };
        let mut bytes = Vec::new();
        write_frame(
            &mut bytes,
            &command.encode_frame(41).unwrap(),
            FrameLimits::default(),
        )
        .unwrap();

        let reply: EnvelopeReply = svc
            .handle_admin_request(AdminRequest {
                action: "execute_envelope".into(),
                command_frame: bytes.clone(),
                ..AdminRequest::default()
            })
            .into_data()
            .unwrap();
        let frame: Frame =
            read_frame(&mut Cursor::new(reply.event_frame), FrameLimits::default()).unwrap();
        assert_eq!(frame.header.message_id, 41);
        let event = Event::decode_frame(&frame).unwrap();
        assert_eq!(event.event_id, "evt.cmd.remote.1");
        assert_eq!(event.outcome, Outcome::Success);

        let again = svc.handle_admin_request(AdminRequest {
            action: "execute_envelope".into(),
            command_frame: bytes,
            ..AdminRequest::default()
        });
        assert!(!again.ok);
        assert!(again.error.unwrap().contains("duplicate command_id"));
    }

    #[test]
    fn unknown_action_and_disabled_spawn() {
        let svc = service();
        let resp = svc.handle_admin_request(AdminRequest::action("reboot"));
        assert_eq!(resp.error.as_deref(), Some("unknown action: reboot"));

        let resp = svc.handle_admin_request(AdminRequest {
            action: "spawn_ghost".into(),
            spawn: SpawnGhostRequest {
                target_name: "edge-1".into(),
                admin_addr: "127.0.0.1:0".into(),
            },
            ..AdminRequest::default()
        });
        assert_eq!(resp.error.as_deref(), Some("cluster host disabled"));
    }
}
