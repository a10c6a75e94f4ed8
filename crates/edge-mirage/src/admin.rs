//! Mirage admin control: JSON-line actions over TCP.

use serde::{Deserialize, Serialize};

use crate::error::{MirageError, OrchestratorError};
use crate::ghost_client::GHOST_ADMIN_TIMEOUT;
use crate::orchestrator::{IntentSnapshot, Issue};
use crate::service::MirageService;
use edge_core::Report;
use edge_ghost::SpawnGhostRequest;
use edge_session::{AdminResponse, CancelToken};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirageAdminRequest {
    pub action: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub limit: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub intent_id: String,
    pub issue: Issue,
    pub spawn: SpawnGhostRequest,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl MirageAdminRequest {
    pub fn action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }

    pub fn for_intent(action: &str, intent_id: &str) -> Self {
        Self {
            intent_id: intent_id.to_string(),
            ..Self::action(action)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIntentReply {
    pub found: bool,
    /// `None` when not found.
    pub snapshot: Option<IntentSnapshot>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileAllReply {
    pub reports: Vec<Report>,
}

impl MirageService {
    pub fn handle_admin_request(&self, req: MirageAdminRequest) -> AdminResponse {
        let action = req.action.trim();
        tracing::debug!(action, "admin request");
        let server = self.server();
        match action {
            "status" => AdminResponse::ok(server.status()),
            "submit_issue" => match server.submit_issue(trim_issue(req.issue)) {
                Ok(()) => AdminResponse::ok(serde_json::Value::Null),
                Err(err) => AdminResponse::err(err),
            },
            "reconcile_intent" => {
                let intent_id = req.intent_id.trim();
                if intent_id.is_empty() {
                    return AdminResponse::err("intent_id required");
                }
                match server.reconcile_intent(&self.call_deadline(), intent_id) {
                    Ok(report) => AdminResponse::ok(report),
                    Err(err) => AdminResponse::err(err),
                }
            }
            "reconcile_all" => match self.reconcile_all() {
                Ok(reports) => AdminResponse::ok(ReconcileAllReply { reports }),
                Err(message) => AdminResponse::err(message),
            },
            "snapshot_intent" => {
                let intent_id = req.intent_id.trim();
                if intent_id.is_empty() {
                    return AdminResponse::err("intent_id required");
                }
                let snapshot = server.snapshot_intent(intent_id);
                AdminResponse::ok(SnapshotIntentReply {
                    found: snapshot.is_some(),
                    snapshot,
                })
            }
            "list_intents" => AdminResponse::ok(server.list_intent_ids()),
            "recent_reports" => AdminResponse::ok(server.recent_reports(req.limit)),
            "registered_ghosts" => AdminResponse::ok(server.registered_ghosts()),
            "spawn_local_ghost" => match server.spawn_local_ghost(&self.call_deadline(), &req.spawn) {
                Ok(out) => AdminResponse::ok(out),
                Err(err) => AdminResponse::err(err),
            },
            _ => AdminResponse::err(format!("unknown action: {}", req.action)),
        }
    }

    /// One reconcile step for every known intent, each under its own
    /// deadline. Intents removed mid-pass are skipped.
    fn reconcile_all(&self) -> Result<Vec<Report>, String> {
        let server = self.server();
        let mut reports = Vec::new();
        for intent_id in server.list_intent_ids() {
            match server.reconcile_intent(&self.call_deadline(), &intent_id) {
                Ok(report) => reports.push(report),
                Err(MirageError::Orchestrator(OrchestratorError::IntentNotFound { .. })) => {}
                Err(err) => return Err(format!("intent_id={intent_id}: {err}")),
            }
        }
        tracing::info!(count = reports.len(), "reconciled all intents");
        Ok(reports)
    }

    fn call_deadline(&self) -> CancelToken {
        self.cancel_token().with_timeout(GHOST_ADMIN_TIMEOUT)
    }
}

fn trim_issue(mut issue: Issue) -> Issue {
    for field in [
        &mut issue.intent_id,
        &mut issue.actor,
        &mut issue.target_scope,
        &mut issue.objective,
        &mut issue.seed_selector,
        &mut issue.operation,
    ] {
        *field = field.trim().to_string();
    }
    for step in &mut issue.command_plan {
        for field in [
            &mut step.ghost_id,
            &mut step.seed_selector,
            &mut step.operation,
        ] {
            *field = field.trim().to_string();
        }
    }
    issue
}
