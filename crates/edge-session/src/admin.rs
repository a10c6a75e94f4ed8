//! Admin control protocol: one JSON request per line, one JSON response
//! per line, over plain TCP.
//!
//! Ghost and Mirage each define their own request type; the response
//! envelope, the per-connection serve loop and the one-shot client live
//! here.

use std::fmt::Display;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{self, ControlError, MAX_CONTROL_LINE_BYTES};
use edge_core::Transience;

/// Idle limit between requests on one admin connection.
pub const ADMIN_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl AdminResponse {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                error: None,
                data: Some(value),
            },
            Err(err) => Self::err(format!("encode response: {err}")),
        }
    }

    pub fn err(message: impl Display) -> Self {
        Self {
            ok: false,
            error: Some(message.to_string()),
            data: None,
        }
    }

    /// Decodes `data`, turning `ok=false` into [`AdminError::Remote`].
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, AdminError> {
        if !self.ok {
            return Err(AdminError::Remote(
                self.error.unwrap_or_else(|| "admin request failed".into()),
            ));
        }
        let data = self.data.ok_or(AdminError::MissingData)?;
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdminError {
    #[error("admin address is required")]
    AddressRequired,
    #[error("could not resolve {addr}")]
    Resolve { addr: String },
    #[error("remote error: {0}")]
    Remote(String),
    #[error("response has no data")]
    MissingData,
    #[error("admin json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdminError {
    pub fn transience(&self) -> Transience {
        match self {
            AdminError::Io(_) | AdminError::Resolve { .. } => Transience::Retryable,
            AdminError::Control(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }
}

/// Serves one admin connection until the peer hangs up, idles past
/// `read_timeout` or sends an oversized line. Blank lines are skipped; a
/// request that fails to parse gets an error response and the connection
/// stays open.
pub fn serve_connection<Req, F>(stream: TcpStream, read_timeout: Duration, mut handle: F)
where
    Req: DeserializeOwned,
    F: FnMut(Req) -> AdminResponse,
{
    let peer = stream.peer_addr().ok();
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            tracing::error!(?peer, "failed to clone admin stream: {err}");
            return;
        }
    };
    if let Err(err) = reader.set_read_timeout(Some(read_timeout)) {
        tracing::warn!(?peer, "failed to set admin read timeout: {err}");
    }
    let mut reader = BufReader::new(reader);
    let mut writer = stream;

    loop {
        let line = match control::read_line_bounded(&mut reader, MAX_CONTROL_LINE_BYTES) {
            Ok(line) => line,
            Err(ControlError::Closed) => break,
            Err(err @ ControlError::TooLarge { .. }) => {
                let _ = control::write_json_line(&mut writer, &AdminResponse::err(&err));
                break;
            }
            Err(err) => {
                tracing::debug!(?peer, "admin connection ended: {err}");
                break;
            }
        };
        if line.trim_ascii().is_empty() {
            continue;
        }

        let response = match serde_json::from_slice::<Req>(&line) {
            Ok(request) => handle(request),
            Err(err) => AdminResponse::err(err),
        };
        if control::write_json_line(&mut writer, &response).is_err() {
            break;
        }
    }
    let _ = writer.flush();
}

/// Sends one request on a fresh connection and reads one response.
pub fn call<Req: Serialize>(
    addr: &str,
    request: &Req,
    timeout: Duration,
) -> Result<AdminResponse, AdminError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(AdminError::AddressRequired);
    }
    let target = resolve(addr)?;
    let stream = TcpStream::connect_timeout(&target, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let mut writer = stream.try_clone()?;
    control::write_json_line(&mut writer, request)?;
    let mut reader = BufReader::new(stream);
    Ok(control::read_json_line(&mut reader, MAX_CONTROL_LINE_BYTES)?)
}

fn resolve(addr: &str) -> Result<SocketAddr, AdminError> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| AdminError::Resolve { addr: addr.into() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{self, ListenerConfig};
    use serde_json::json;

    #[derive(Deserialize)]
    struct Ping {
        action: String,
    }

    fn serve(stream: TcpStream, _peer: SocketAddr) {
        serve_connection(stream, Duration::from_secs(5), |req: Ping| {
            match req.action.as_str() {
                "ping" => AdminResponse::ok(json!({ "pong": true })),
                other => AdminResponse::err(format!("unknown action: {other}")),
            }
        });
    }

    #[test]
    fn call_round_trips_and_reports_errors() {
        let handle = listener::spawn("127.0.0.1:0", ListenerConfig::new("admin_test"), serve)
            .unwrap();
        let addr = handle.local_addr().to_string();

        let ok = call(&addr, &json!({ "action": "ping" }), Duration::from_secs(5)).unwrap();
        let data: serde_json::Value = ok.into_data().unwrap();
        assert_eq!(data, json!({ "pong": true }));

        let bad = call(&addr, &json!({ "action": "nope" }), Duration::from_secs(5)).unwrap();
        assert!(!bad.ok);
        let err = bad.into_data::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, AdminError::Remote(msg) if msg == "unknown action: nope"));

        handle.shutdown();
    }

    #[test]
    fn malformed_line_keeps_connection_open() {
        let handle = listener::spawn("127.0.0.1:0", ListenerConfig::new("admin_test"), serve)
            .unwrap();
        let stream = TcpStream::connect(handle.local_addr()).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        writer.write_all(b"\nnot json\n").unwrap();
        let first: AdminResponse =
            control::read_json_line(&mut reader, MAX_CONTROL_LINE_BYTES).unwrap();
        assert!(!first.ok);

        writer.write_all(b"{\"action\":\"ping\"}\n").unwrap();
        let second: AdminResponse =
            control::read_json_line(&mut reader, MAX_CONTROL_LINE_BYTES).unwrap();
        assert!(second.ok);

        handle.shutdown();
    }

    #[test]
    fn blank_address_is_rejected() {
        let err = call(" ", &json!({}), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AdminError::AddressRequired));
    }
}
