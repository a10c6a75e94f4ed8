#![forbid(unsafe_code)]

//! Session layer between Ghost and Mirage.
//!
//! A session is one TCP (optionally TLS) connection that starts with a
//! newline-delimited JSON registration handshake ([`control`]) and then
//! carries binary frames: Ghost writes `Event`s, Mirage answers each with an
//! idempotent `EventAck`. [`client`] drives the Ghost side with retry
//! ([`backoff`]) and in-flight tracking ([`outbox`]); every blocking step
//! honours a [`CancelToken`].
//!
//! [`listener`] and [`admin`] are the server-side plumbing shared by the
//! Mirage session listener and both admin control endpoints.

pub mod admin;
pub mod backoff;
pub mod cancel;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod listener;
pub mod outbox;
pub mod security;
pub mod transport;

pub use admin::{ADMIN_READ_TIMEOUT, AdminError, AdminResponse};
pub use backoff::{Backoff, delay_for_attempt};
pub use cancel::{CancelToken, Interrupted};
pub use client::{MirageClient, MirageClientConfig, MirageSession};
pub use config::{BackoffConfig, SecurityMode, SessionConfig, TlsConfig};
pub use control::{
    ControlEnvelope, ControlError, MAX_CONTROL_LINE_BYTES, Registration, RegistrationAck,
    SeedInfo, read_json_line, write_json_line,
};
pub use error::SessionError;
pub use listener::{ListenerConfig, ListenerHandle};
pub use outbox::{EventOutbox, PendingEvent};
pub use security::SecurityError;
pub use transport::Conn;
