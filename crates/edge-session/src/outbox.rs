//! In-flight events awaiting an ack, keyed by `event_id`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub event_id: String,
    pub command_id: String,
    pub ghost_id: String,
    pub attempts: u32,
    pub queued_at_ms: u64,
    #[serde(default)]
    pub last_attempt_at_ms: u64,
    pub ack_deadline_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct EventOutbox {
    pending: RwLock<BTreeMap<String, PendingEvent>>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record; a blank `event_id` is ignored.
    pub fn upsert(&self, event: PendingEvent) {
        let key = event.event_id.trim().to_string();
        if key.is_empty() {
            return;
        }
        let mut pending = self.write();
        pending.insert(key, event);
    }

    /// Counts one send attempt and stores `error` (blank clears it).
    pub fn mark_attempt(&self, event_id: &str, now_ms: u64, error: &str) -> Option<PendingEvent> {
        let mut pending = self.write();
        let entry = pending.get_mut(event_id.trim())?;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_attempt_at_ms = now_ms;
        let error = error.trim();
        entry.last_error = (!error.is_empty()).then(|| error.to_string());
        Some(entry.clone())
    }

    /// Records why the current attempt failed without counting a new one.
    pub fn record_error(&self, event_id: &str, error: &str) -> Option<PendingEvent> {
        let mut pending = self.write();
        let entry = pending.get_mut(event_id.trim())?;
        let error = error.trim();
        entry.last_error = (!error.is_empty()).then(|| error.to_string());
        Some(entry.clone())
    }

    pub fn remove(&self, event_id: &str) -> Option<PendingEvent> {
        self.write().remove(event_id.trim())
    }

    pub fn get(&self, event_id: &str) -> Option<PendingEvent> {
        self.read().get(event_id.trim()).cloned()
    }

    /// Snapshot ordered by `event_id`.
    pub fn list(&self) -> Vec<PendingEvent> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, PendingEvent>> {
        match self.pending.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, PendingEvent>> {
        match self.pending.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(event_id: &str) -> PendingEvent {
        PendingEvent {
            event_id: event_id.to_string(),
            command_id: "cmd.1".into(),
            ghost_id: "ghost.alpha".into(),
            queued_at_ms: 10,
            ack_deadline_at_ms: 20_010,
            ..PendingEvent::default()
        }
    }

    #[test]
    fn blank_event_id_is_ignored() {
        let outbox = EventOutbox::new();
        outbox.upsert(pending("   "));
        assert!(outbox.is_empty());
    }

    #[test]
    fn mark_attempt_counts_and_records_error() {
        let outbox = EventOutbox::new();
        outbox.upsert(pending("evt.1"));

        let first = outbox.mark_attempt("evt.1", 11, "").unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(first.last_error, None);

        let failed = outbox.record_error("evt.1", " connection reset ").unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("connection reset"));

        let second = outbox.mark_attempt("evt.1", 12, "").unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_attempt_at_ms, 12);
        assert_eq!(second.last_error, None);

        assert!(outbox.mark_attempt("evt.missing", 13, "").is_none());
    }

    #[test]
    fn list_is_sorted_and_remove_drops_entry() {
        let outbox = EventOutbox::new();
        outbox.upsert(pending("evt.b"));
        outbox.upsert(pending("evt.a"));
        outbox.upsert(pending("evt.c"));
        let ids: Vec<String> = outbox.list().into_iter().map(|p| p.event_id).collect();
        assert_eq!(ids, vec!["evt.a", "evt.b", "evt.c"]);

        assert!(outbox.remove("evt.b").is_some());
        assert!(outbox.get("evt.b").is_none());
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let outbox = EventOutbox::new();
        outbox.upsert(pending("evt.1"));
        outbox.mark_attempt("evt.1", 11, "boom");
        assert_eq!(outbox.get("evt.1").unwrap().attempts, 1);
        outbox.upsert(pending("evt.1"));
        assert_eq!(outbox.get("evt.1").unwrap().attempts, 0);
    }
}
