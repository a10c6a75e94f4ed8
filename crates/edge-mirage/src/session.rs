//! One Ghost connection: optional TLS, registration, then Event frames.
//!
//! The registration read is bounded by the handshake timeout. After that
//! reads block without a deadline since a registered Ghost only speaks when
//! it has an event; the listener closes the socket on shutdown. Every event
//! is answered with an [`edge_core::EventAck`] carrying the event frame's
//! message id.

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::MirageError;
use crate::server::{MirageServer, rejected_registration};
use edge_core::{Event, FrameLimits, FrameReader, write_frame};
use edge_session::control::{read_registration, write_registration_ack};
use edge_session::{Conn, ControlError, Registration, SessionConfig, security};

pub(crate) struct SessionHandler {
    server: Arc<MirageServer>,
    session: SessionConfig,
    tls: Option<Arc<ServerConfig>>,
    require_identity_binding: bool,
}

impl SessionHandler {
    pub(crate) fn new(
        server: Arc<MirageServer>,
        session: SessionConfig,
        require_identity_binding: bool,
    ) -> Result<Self, MirageError> {
        session.validate_server_transport()?;
        let tls = if session.tls.enabled {
            Some(security::server_tls_config(&session.tls)?)
        } else {
            None
        };
        Ok(Self {
            server,
            session,
            tls,
            require_identity_binding,
        })
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub(crate) fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let span = tracing::info_span!("mirage_session", %peer, ghost_id = tracing::field::Empty);
        let _guard = span.enter();

        let _ = stream.set_nodelay(true);
        let conn = match &self.tls {
            Some(config) => {
                match Conn::accept_tls(stream, Arc::clone(config), self.session.handshake_timeout()) {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(error = %err, "tls handshake failed");
                        return;
                    }
                }
            }
            None => Conn::Plain(stream),
        };

        let mut reader = BufReader::new(conn);
        let Some(ghost_id) = self.register(&mut reader, peer) else {
            reader.into_inner().close();
            return;
        };
        span.record("ghost_id", ghost_id.as_str());

        let mut frames = FrameReader::new(reader, FrameLimits::default());
        self.event_loop(&mut frames, &ghost_id);
        self.server.mark_ghost_disconnected(&ghost_id);
        frames.get_mut().get_mut().close();
    }

    /// Reads the registration and answers it. `None` means the session must
    /// be closed.
    fn register(&self, reader: &mut BufReader<Conn>, peer: SocketAddr) -> Option<String> {
        let timeout = self.session.handshake_timeout();
        if let Err(err) = reader
            .get_ref()
            .set_read_timeout(Some(timeout))
            .and_then(|()| reader.get_ref().set_write_timeout(Some(timeout)))
        {
            tracing::warn!(error = %err, "failed to set handshake timeouts");
            return None;
        }

        let registration = match read_registration(reader) {
            Ok(registration) => registration,
            Err(err) => {
                tracing::warn!(error = %err, "registration read failed");
                if let ControlError::InvalidRegistration(reason) = &err {
                    let ack = rejected_registration("", format!("invalid registration: {reason}"));
                    if let Err(err) = write_registration_ack(reader.get_mut(), &ack) {
                        tracing::debug!(error = %err, "failed to send rejection");
                    }
                }
                return None;
            }
        };

        if let Err(reason) = self.check_identity(&registration) {
            tracing::warn!(
                ghost_id = %registration.ghost_id,
                peer_identity = %registration.peer_identity,
                "registration rejected: {reason}"
            );
            let ack = rejected_registration(&registration.ghost_id, reason);
            if let Err(err) = write_registration_ack(reader.get_mut(), &ack) {
                tracing::debug!(error = %err, "failed to send rejection");
            }
            return None;
        }

        let ack = self
            .server
            .upsert_registration(&peer.to_string(), &registration);
        if let Err(err) = write_registration_ack(reader.get_mut(), &ack) {
            tracing::warn!(error = %err, "failed to send registration ack");
            self.server.mark_ghost_disconnected(&ack.ghost_id);
            return None;
        }

        let conn = reader.get_ref();
        if let Err(err) = conn
            .set_read_timeout(None)
            .and_then(|()| conn.set_write_timeout(Some(self.session.write_timeout())))
        {
            tracing::warn!(error = %err, "failed to set session timeouts");
            self.server.mark_ghost_disconnected(&ack.ghost_id);
            return None;
        }
        Some(ack.ghost_id)
    }

    /// With binding required, the claimed peer identity must name the
    /// registering Ghost.
    fn check_identity(&self, registration: &Registration) -> Result<(), String> {
        if !self.require_identity_binding {
            return Ok(());
        }
        let ghost_id = registration.ghost_id.trim();
        let identity = registration.peer_identity.trim();
        if identity.is_empty() {
            return Err("peer identity required".to_string());
        }
        if identity != ghost_id {
            return Err(format!(
                "peer identity {identity:?} does not match ghost_id {ghost_id:?}"
            ));
        }
        Ok(())
    }

    fn event_loop(&self, frames: &mut FrameReader<BufReader<Conn>>, ghost_id: &str) {
        let limits = FrameLimits::default();
        loop {
            let frame = match frames.read_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("ghost closed the session");
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "session read failed");
                    return;
                }
            };
            let event = match Event::decode_frame(&frame) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(
                        message_id = frame.header.message_id,
                        message_type = frame.header.message_type,
                        error = %err,
                        "malformed event frame"
                    );
                    return;
                }
            };
            if event.ghost_id.trim() != ghost_id {
                tracing::warn!(
                    event_ghost_id = %event.ghost_id,
                    "event names another ghost; acked under the session ghost"
                );
            }

            let ack = self.server.accept_event(ghost_id, &event);
            let reply = match ack.encode_frame(frame.header.message_id) {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::error!(event_id = %event.event_id, error = %err, "ack encode failed");
                    return;
                }
            };
            if let Err(err) = write_frame(frames.get_mut().get_mut(), &reply, limits) {
                tracing::warn!(event_id = %event.event_id, error = %err, "ack write failed");
                return;
            }
            tracing::debug!(
                event_id = %event.event_id,
                command_id = %event.command_id,
                "event acked"
            );
        }
    }
}
