//! Ghost side of a Mirage session.
//!
//! [`MirageClient::connect_and_register`] dials with retry and performs the
//! registration handshake; the resulting [`MirageSession`] delivers events
//! at-least-once, retrying one event until it is acked or its ack deadline
//! (measured from first enqueue) passes.

use std::io::BufReader;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rustls::ClientConfig;

use crate::backoff::Backoff;
use crate::cancel::CancelToken;
use crate::config::SessionConfig;
use crate::control::{self, Registration, SeedInfo};
use crate::error::SessionError;
use crate::outbox::{EventOutbox, PendingEvent};
use crate::security;
use crate::transport::{self, Conn};
use edge_core::{Event, EventAck, FrameLimits, now_ms, read_frame, write_frame};

#[derive(Clone, Debug, Default)]
pub struct MirageClientConfig {
    pub address: String,
    pub ghost_id: String,
    /// Defaults to `ghost_id`.
    pub peer_identity: String,
    pub seed_list: Vec<SeedInfo>,
    pub session: SessionConfig,
    /// Zero retries forever.
    pub max_connect_attempts: u32,
}

#[derive(Debug)]
pub struct MirageClient {
    cfg: MirageClientConfig,
}

impl MirageClient {
    pub fn new(mut cfg: MirageClientConfig) -> Result<Self, SessionError> {
        cfg.address = cfg.address.trim().to_string();
        cfg.ghost_id = cfg.ghost_id.trim().to_string();
        if cfg.address.is_empty() {
            return Err(SessionError::AddressRequired);
        }
        if cfg.ghost_id.is_empty() {
            return Err(SessionError::GhostIdRequired);
        }
        if cfg.peer_identity.trim().is_empty() {
            cfg.peer_identity = cfg.ghost_id.clone();
        }
        cfg.session = cfg.session.with_defaults();
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &MirageClientConfig {
        &self.cfg
    }

    /// Dials and registers, retrying transient failures with backoff.
    /// A rejected registration is returned immediately.
    pub fn connect_and_register(&self, cancel: &CancelToken) -> Result<MirageSession, SessionError> {
        let span = tracing::info_span!(
            "mirage_connect",
            ghost_id = %self.cfg.ghost_id,
            addr = %self.cfg.address
        );
        let _guard = span.enter();

        let mut backoff = Backoff::new(self.cfg.session.backoff.clone());
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let conn = match self.dial(cancel) {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "mirage dial failed");
                    if !err.transience().is_retryable() || !self.should_retry(attempt) {
                        return Err(err);
                    }
                    cancel.sleep(backoff.delay_for(attempt))?;
                    continue;
                }
            };

            match self.register(conn) {
                Ok(session) => {
                    tracing::info!(attempt, tls = session.is_tls(), "registered with mirage");
                    return Ok(session);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "mirage registration failed");
                    if matches!(err, SessionError::RegistrationRejected { .. })
                        || !self.should_retry(attempt)
                    {
                        return Err(err);
                    }
                    cancel.sleep(backoff.delay_for(attempt))?;
                }
            }
        }
    }

    fn should_retry(&self, attempt: u32) -> bool {
        self.cfg.max_connect_attempts == 0 || attempt < self.cfg.max_connect_attempts
    }

    fn dial(&self, cancel: &CancelToken) -> Result<Conn, SessionError> {
        let session = &self.cfg.session;
        session.validate_client_transport()?;
        let tls: Option<Arc<ClientConfig>> = if session.tls.enabled {
            Some(security::client_tls_config(&session.tls)?)
        } else {
            None
        };
        transport::dial(
            &self.cfg.address,
            tls.as_ref().map(|config| (config, &session.tls)),
            session.connect_timeout(),
            session.handshake_timeout(),
            cancel,
        )
    }

    /// Runs the handshake on a fresh connection. The connection is closed
    /// on any failure.
    fn register(&self, conn: Conn) -> Result<MirageSession, SessionError> {
        let mut reader = BufReader::new(conn);
        match self.handshake(&mut reader) {
            Ok(()) => Ok(MirageSession::new(reader, self.cfg.session.clone())),
            Err(err) => {
                reader.into_inner().close();
                Err(err)
            }
        }
    }

    fn handshake(&self, reader: &mut BufReader<Conn>) -> Result<(), SessionError> {
        let timeout = self.cfg.session.handshake_timeout();
        reader.get_ref().set_read_timeout(Some(timeout))?;
        reader.get_ref().set_write_timeout(Some(timeout))?;

        let registration = Registration {
            ghost_id: self.cfg.ghost_id.clone(),
            peer_identity: self.cfg.peer_identity.clone(),
            seed_list: Some(self.cfg.seed_list.clone()),
        };
        control::write_registration(reader.get_mut(), &registration)?;
        let ack = control::read_registration_ack(reader)?;
        if !ack.is_accepted() {
            return Err(SessionError::RegistrationRejected {
                code: ack.code,
                message: ack.message,
            });
        }
        reader.get_ref().set_read_timeout(None)?;
        reader.get_ref().set_write_timeout(None)?;
        Ok(())
    }
}

/// A registered session. Sends are serialized by `&mut self`.
pub struct MirageSession {
    reader: Option<BufReader<Conn>>,
    cfg: SessionConfig,
    outbox: Arc<EventOutbox>,
    next_message_id: u64,
    backoff: Backoff,
    limits: FrameLimits,
}

impl std::fmt::Debug for MirageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirageSession")
            .field("open", &self.reader.is_some())
            .field("pending", &self.outbox.len())
            .finish()
    }
}

impl MirageSession {
    fn new(reader: BufReader<Conn>, cfg: SessionConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self {
            reader: Some(reader),
            backoff: Backoff::new(cfg.backoff.clone()),
            cfg,
            outbox: Arc::new(EventOutbox::new()),
            next_message_id: seed,
            limits: FrameLimits::default(),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.get_ref().is_tls())
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let mut conn = reader.into_inner();
            conn.close();
        }
    }

    /// Non-blocking check that Mirage has not hung up. Mirage never writes
    /// unprompted, so an orderly EOF or a socket error means the session is
    /// gone; pending bytes or `WouldBlock` count as alive.
    pub fn probe(&mut self) -> bool {
        let Some(reader) = self.reader.as_ref() else {
            return false;
        };
        let tcp = reader.get_ref().tcp();
        if tcp.set_nonblocking(true).is_err() {
            return false;
        }
        let mut buf = [0u8; 1];
        let alive = match tcp.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) => err.kind() == std::io::ErrorKind::WouldBlock,
        };
        let restored = tcp.set_nonblocking(false).is_ok();
        if !(alive && restored) {
            self.close();
            return false;
        }
        true
    }

    /// Shared handle; stays readable while a send holds the session.
    pub fn outbox(&self) -> Arc<EventOutbox> {
        Arc::clone(&self.outbox)
    }

    pub fn outbox_snapshot(&self) -> Vec<PendingEvent> {
        self.outbox.list()
    }

    /// Sends `event` until Mirage acks it. An explicit rejection is final;
    /// transport failures are retried until the ack deadline.
    pub fn send_event_with_ack(
        &mut self,
        cancel: &CancelToken,
        event: Event,
    ) -> Result<EventAck, SessionError> {
        if self.reader.is_none() {
            return Err(SessionError::Closed);
        }
        let mut event = Event {
            event_id: event.event_id.trim().to_string(),
            command_id: event.command_id.trim().to_string(),
            intent_id: event.intent_id.trim().to_string(),
            ghost_id: event.ghost_id.trim().to_string(),
            seed_id: event.seed_id.trim().to_string(),
            ..event
        };
        if event.timestamp_ms == 0 {
            event.timestamp_ms = now_ms();
        }
        event.validate()?;

        let started = Instant::now();
        let started_ms = now_ms();
        let ack_timeout = self.cfg.ack_timeout();
        let deadline = started + ack_timeout;
        self.outbox.upsert(PendingEvent {
            event_id: event.event_id.clone(),
            command_id: event.command_id.clone(),
            ghost_id: event.ghost_id.clone(),
            queued_at_ms: started_ms,
            ack_deadline_at_ms: started_ms + ack_timeout.as_millis() as u64,
            ..PendingEvent::default()
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.outbox.mark_attempt(&event.event_id, now_ms(), "");
            match self.send_once(cancel, &event) {
                Ok(ack) => {
                    self.outbox.remove(&event.event_id);
                    if ack.is_accepted() {
                        tracing::debug!(event_id = %event.event_id, attempt, "event acked");
                        return Ok(ack);
                    }
                    return Err(SessionError::AckRejected {
                        status: ack.ack_status,
                        code: ack.ack_code,
                    });
                }
                Err(err) => {
                    self.outbox.record_error(&event.event_id, &err.to_string());
                    tracing::warn!(event_id = %event.event_id, attempt, error = %err, "event send failed");
                    if Instant::now() > deadline {
                        return Err(SessionError::AckTimeout {
                            event_id: event.event_id.clone(),
                            attempts: attempt,
                        });
                    }
                    cancel.sleep(self.backoff.delay_for(attempt))?;
                }
            }
        }
    }

    fn send_once(&mut self, cancel: &CancelToken, event: &Event) -> Result<EventAck, SessionError> {
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        let frame = event.encode_frame(self.next_message_id)?;
        let write_timeout = cancel.clamp(self.cfg.write_timeout());
        let read_timeout = cancel.clamp(self.cfg.read_timeout());
        let limits = self.limits;
        let reader = self.reader.as_mut().ok_or(SessionError::Closed)?;

        reader.get_ref().set_write_timeout(Some(write_timeout))?;
        write_frame(reader.get_mut(), &frame, limits)?;

        reader.get_ref().set_read_timeout(Some(read_timeout))?;
        let reply = read_frame(reader, limits)?;
        let ack = EventAck::decode_frame(&reply)?;
        if ack.event_id != event.event_id {
            return Err(SessionError::AckMismatch {
                event_id: event.event_id.clone(),
                ack_event_id: ack.event_id,
            });
        }
        Ok(ack)
    }
}

impl Drop for MirageSession {
    fn drop(&mut self) {
        self.close();
    }
}
