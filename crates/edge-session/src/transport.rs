//! Byte streams under a session: plain TCP or TLS over TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection, StreamOwned};

use crate::cancel::CancelToken;
use crate::error::SessionError;
use crate::security::{self, SecurityError};

/// One connected session stream. TLS variants are boxed to keep the enum
/// small; the rustls state machine is large.
pub enum Conn {
    Plain(TcpStream),
    TlsClient(Box<StreamOwned<ClientConnection, TcpStream>>),
    TlsServer(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Conn::Plain(_) => "plain",
            Conn::TlsClient(_) => "tls-client",
            Conn::TlsServer(_) => "tls-server",
        };
        f.debug_struct("Conn")
            .field("kind", &kind)
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}

impl Conn {
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Conn::Plain(stream) => stream,
            Conn::TlsClient(stream) => stream.get_ref(),
            Conn::TlsServer(stream) => stream.get_ref(),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Conn::Plain(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// `None` clears the timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp().set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp().set_write_timeout(timeout)
    }

    /// Closes both directions; TLS peers get a close_notify first.
    pub fn close(&mut self) {
        match self {
            Conn::Plain(_) => {}
            Conn::TlsClient(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.flush();
            }
            Conn::TlsServer(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.flush();
            }
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }

    /// Wraps an accepted socket in TLS and completes the handshake within
    /// `handshake_timeout`.
    pub fn accept_tls(
        stream: TcpStream,
        config: Arc<ServerConfig>,
        handshake_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut conn = ServerConnection::new(config).map_err(SecurityError::from)?;
        let mut stream = stream;
        stream.set_read_timeout(Some(handshake_timeout))?;
        stream.set_write_timeout(Some(handshake_timeout))?;
        while conn.is_handshaking() {
            conn.complete_io(&mut stream)?;
        }
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        Ok(Conn::TlsServer(Box::new(StreamOwned::new(conn, stream))))
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(stream) => stream.read(buf),
            Conn::TlsClient(stream) => stream.read(buf),
            Conn::TlsServer(stream) => stream.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Plain(stream) => stream.write(buf),
            Conn::TlsClient(stream) => stream.write(buf),
            Conn::TlsServer(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Plain(stream) => stream.flush(),
            Conn::TlsClient(stream) => stream.flush(),
            Conn::TlsServer(stream) => stream.flush(),
        }
    }
}

/// Opens a TCP connection to `addr` and, when `tls` is given, completes the
/// client handshake. Connect is bounded by `connect_timeout` and the
/// handshake by `handshake_timeout`, both clamped to the token's deadline.
pub fn dial(
    addr: &str,
    tls: Option<(&Arc<ClientConfig>, &crate::config::TlsConfig)>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    cancel: &CancelToken,
) -> Result<Conn, SessionError> {
    cancel.check()?;
    let mut last_err = None;
    let mut stream = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, cancel.clamp(connect_timeout)) {
            Ok(connected) => {
                stream = Some(connected);
                break;
            }
            Err(err) => last_err = Some(err),
        }
    }
    let mut stream = match (stream, last_err) {
        (Some(stream), _) => stream,
        (None, Some(err)) => return Err(err.into()),
        (None, None) => {
            return Err(SessionError::Resolve {
                addr: addr.to_string(),
            });
        }
    };
    let _ = stream.set_nodelay(true);

    let Some((client_config, tls_config)) = tls else {
        return Ok(Conn::Plain(stream));
    };
    cancel.check()?;
    let server_name = security::server_name_for(tls_config, addr)?;
    let mut conn =
        ClientConnection::new(Arc::clone(client_config), server_name).map_err(SecurityError::from)?;
    let budget = cancel.clamp(handshake_timeout);
    stream.set_read_timeout(Some(budget))?;
    stream.set_write_timeout(Some(budget))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut stream)?;
    }
    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)?;
    tracing::debug!(addr, "tls handshake complete");
    Ok(Conn::TlsClient(Box::new(StreamOwned::new(conn, stream))))
}
