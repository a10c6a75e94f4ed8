//! Thread-per-connection TCP accept loop shared by every edge listener.
//!
//! The loop polls a non-blocking listener so it can observe shutdown.
//! Accepted streams are switched back to blocking and handed to the
//! connection handler on their own thread. A clone of each live stream is
//! kept so [`ListenerHandle::shutdown`] can unblock handlers stuck in a
//! read.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Span name for the accept loop, e.g. `ghost_admin_accept_loop`.
    pub name: &'static str,
    pub max_connections: Option<NonZeroUsize>,
}

impl ListenerConfig {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            max_connections: None,
        }
    }
}

pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    live: Arc<LiveStreams>,
    join: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("local_addr", &self.local_addr)
            .field("live", &self.live.len())
            .finish()
    }
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.live.len()
    }

    /// Stops accepting, closes every live connection and joins the loop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.live.close_all();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds `addr` and serves each connection with `handler` on its own thread.
pub fn spawn<F>(addr: &str, config: ListenerConfig, handler: F) -> io::Result<ListenerHandle>
where
    F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr.trim())?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let live = Arc::new(LiveStreams::default());
    let runtime = AcceptRuntime {
        config,
        handler: Arc::new(handler),
        shutdown: Arc::clone(&shutdown),
        live: Arc::clone(&live),
        active: Arc::new(AtomicUsize::new(0)),
    };

    let accept_span = tracing::Span::current();
    let join = thread::spawn(move || {
        accept_span.in_scope(|| run_accept_loop(listener, runtime));
    });

    Ok(ListenerHandle {
        shutdown,
        live,
        join: Some(join),
        local_addr,
    })
}

struct AcceptRuntime<F> {
    config: ListenerConfig,
    handler: Arc<F>,
    shutdown: Arc<AtomicBool>,
    live: Arc<LiveStreams>,
    active: Arc<AtomicUsize>,
}

fn run_accept_loop<F>(listener: TcpListener, runtime: AcceptRuntime<F>)
where
    F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
{
    let local_addr = listener.local_addr().ok();
    let span = tracing::info_span!("accept_loop", listener = runtime.config.name, listen_addr = ?local_addr);
    let _guard = span.enter();
    tracing::info!("listening");

    loop {
        if runtime.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer, "accepted stream failed to set blocking: {err}");
                    continue;
                }
                let Some(guard) = ConnectionGuard::try_acquire(
                    &runtime.active,
                    runtime.config.max_connections,
                ) else {
                    tracing::warn!(%peer, "connection limit reached; dropping");
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                };
                let token = match stream.try_clone() {
                    Ok(clone) => runtime.live.insert(clone),
                    Err(err) => {
                        tracing::warn!(%peer, "failed to clone stream: {err}");
                        continue;
                    }
                };

                let handler = Arc::clone(&runtime.handler);
                let live = Arc::clone(&runtime.live);
                let session_span = tracing::Span::current();
                thread::spawn(move || {
                    session_span.in_scope(|| {
                        let _guard = guard;
                        handler(stream, peer);
                        live.remove(token);
                    });
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                tracing::warn!("accept error: {err}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::info!("accept loop stopped");
}

#[derive(Default)]
struct LiveStreams {
    next: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl LiveStreams {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
        match self.streams.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert(&self, stream: TcpStream) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(token, stream);
        token
    }

    fn remove(&self, token: u64) {
        self.lock().remove(&token);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn close_all(&self) {
        for (_, stream) in self.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn try_acquire(active: &Arc<AtomicUsize>, max: Option<NonZeroUsize>) -> Option<Self> {
        let mut current = active.load(Ordering::Acquire);
        loop {
            if let Some(max) = max
                && current >= max.get()
            {
                return None;
            }
            match active.compare_exchange(
                current,
                current.saturating_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Self {
                        active: Arc::clone(active),
                    });
                }
                Err(next) => current = next,
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "active connection counter underflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};

    fn echo(stream: TcpStream, _peer: SocketAddr) {
        let mut writer = stream.try_clone().unwrap();
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if writeln!(writer, "{line}").is_err() {
                break;
            }
        }
    }

    #[test]
    fn serves_connections_until_shutdown() {
        let handle = spawn("127.0.0.1:0", ListenerConfig::new("test"), echo).unwrap();
        let addr = handle.local_addr();

        let stream = TcpStream::connect(addr).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        writeln!(writer, "ping").unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "ping\n");

        handle.shutdown();
        line.clear();
        let read = reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(read, 0, "connection should be closed by shutdown");
    }

    #[test]
    fn connection_limit_drops_extra_clients() {
        let config = ListenerConfig {
            name: "test",
            max_connections: NonZeroUsize::new(1),
        };
        let handle = spawn("127.0.0.1:0", config, echo).unwrap();
        let addr = handle.local_addr();

        let first = TcpStream::connect(addr).unwrap();
        let mut first_writer = first.try_clone().unwrap();
        let mut first_reader = BufReader::new(first);
        writeln!(first_writer, "one").unwrap();
        let mut line = String::new();
        first_reader.read_line(&mut line).unwrap();
        assert_eq!(line, "one\n");

        let second = TcpStream::connect(addr).unwrap();
        second
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut second_reader = BufReader::new(second);
        line.clear();
        let read = second_reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(read, 0);

        handle.shutdown();
    }
}
