//! Mirage runtime: lifecycle bootstrap, the Ghost session listener and the
//! admin listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::admin::MirageAdminRequest;
use crate::config::MirageConfig;
use crate::error::MirageError;
use crate::ghost_client::{
    AdminCommandExecutor, GhostAdminClient, GhostAdminSpawner, normalize_ghost_admin_addr,
};
use crate::server::MirageServer;
use crate::session::SessionHandler;
use edge_session::CancelToken;
use edge_session::admin::{self, ADMIN_READ_TIMEOUT};
use edge_session::listener::{self, ListenerConfig, ListenerHandle};

pub struct MirageService {
    cfg: MirageConfig,
    server: Arc<MirageServer>,
    /// Fired on shutdown; bounds Ghost admin calls made for admin requests.
    cancel: CancelToken,
    started: AtomicBool,
}

impl std::fmt::Debug for MirageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirageService")
            .field("mirage_id", &self.cfg.id)
            .field("listen_addr", &self.cfg.listen_addr)
            .field("local_ghost_id", &self.cfg.local_ghost_id)
            .finish()
    }
}

impl MirageService {
    /// Validates `cfg`, wires the local Ghost when one is configured and
    /// walks the lifecycle to `seeded`.
    pub fn bootstrap(cfg: MirageConfig) -> Result<Arc<Self>, MirageError> {
        cfg.validate()?;
        let server = Arc::new(MirageServer::new());
        server.appear(&cfg.id)?;
        server.shimmer()?;

        if cfg.has_local_ghost() {
            let admin_addr = normalize_ghost_admin_addr(&cfg.local_ghost_admin_addr)?;
            let ghost_id = cfg.local_ghost_id.trim();
            server.register_executor(
                ghost_id,
                Arc::new(AdminCommandExecutor::new(GhostAdminClient::new(&admin_addr))),
            )?;
            server.set_ghost_spawner(Arc::new(GhostAdminSpawner::new(
                GhostAdminClient::new(&admin_addr),
                Arc::clone(&server),
            )));
            tracing::info!(ghost_id, %admin_addr, "local ghost attached");
        }
        server.seed()?;

        Ok(Arc::new(Self {
            cfg,
            server,
            cancel: CancelToken::new(),
            started: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &MirageConfig {
        &self.cfg
    }

    pub fn server(&self) -> &Arc<MirageServer> {
        &self.server
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Starts the session and admin listeners. A service can be started
    /// once.
    pub fn start(self: &Arc<Self>) -> Result<MirageRuntime, MirageError> {
        let span = tracing::info_span!("mirage_service", mirage_id = %self.cfg.id);
        let _guard = span.enter();

        if self.started.swap(true, Ordering::AcqRel) {
            return Err(MirageError::AlreadyStarted);
        }

        let sessions = match self.cfg.listen_addr.trim() {
            "" => None,
            addr => Some(self.spawn_session_listener(addr)?),
        };
        let admin = match self.cfg.admin_listen_addr.trim() {
            "" => None,
            addr => match self.spawn_admin_listener(addr) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    if let Some(sessions) = sessions {
                        sessions.shutdown();
                    }
                    return Err(err);
                }
            },
        };

        tracing::info!(
            session_addr = ?sessions.as_ref().map(ListenerHandle::local_addr),
            admin_addr = ?admin.as_ref().map(ListenerHandle::local_addr),
            "mirage service started"
        );
        Ok(MirageRuntime {
            service: Arc::clone(self),
            sessions,
            admin,
        })
    }

    /// Runs until `cancel` fires, then stops both listeners.
    pub fn serve(self: &Arc<Self>, cancel: &CancelToken) -> Result<(), MirageError> {
        let runtime = self.start()?;
        cancel.wait();
        runtime.shutdown();
        Ok(())
    }

    fn spawn_session_listener(&self, addr: &str) -> Result<ListenerHandle, MirageError> {
        let handler = Arc::new(SessionHandler::new(
            Arc::clone(&self.server),
            self.cfg.session.clone().with_defaults(),
            self.cfg.require_identity_binding,
        )?);
        tracing::info!(
            tls = handler.is_tls(),
            identity_binding = self.cfg.require_identity_binding,
            "session transport ready"
        );
        let handle = listener::spawn(
            addr,
            ListenerConfig::new("mirage_session_accept_loop"),
            move |stream, peer| handler.handle(stream, peer),
        )?;
        Ok(handle)
    }

    fn spawn_admin_listener(self: &Arc<Self>, addr: &str) -> Result<ListenerHandle, MirageError> {
        let service = Arc::clone(self);
        let handle = listener::spawn(
            addr,
            ListenerConfig::new("mirage_admin_accept_loop"),
            move |stream, peer| {
                let span = tracing::info_span!("mirage_admin_conn", %peer);
                let _guard = span.enter();
                tracing::info!("admin client connected");
                admin::serve_connection(stream, ADMIN_READ_TIMEOUT, |req: MirageAdminRequest| {
                    service.handle_admin_request(req)
                });
                tracing::info!("admin client disconnected");
            },
        )?;
        Ok(handle)
    }
}

/// A started service.
pub struct MirageRuntime {
    service: Arc<MirageService>,
    sessions: Option<ListenerHandle>,
    admin: Option<ListenerHandle>,
}

impl std::fmt::Debug for MirageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirageRuntime")
            .field("service", &self.service)
            .field("session_addr", &self.session_addr())
            .field("admin_addr", &self.admin_addr())
            .finish()
    }
}

impl MirageRuntime {
    pub fn service(&self) -> &Arc<MirageService> {
        &self.service
    }

    pub fn session_addr(&self) -> Option<SocketAddr> {
        self.sessions.as_ref().map(ListenerHandle::local_addr)
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().map(ListenerHandle::local_addr)
    }

    pub fn shutdown(self) {
        let MirageRuntime {
            service,
            sessions,
            admin,
        } = self;
        service.cancel.cancel();
        if let Some(admin) = admin {
            admin.shutdown();
        }
        if let Some(sessions) = sessions {
            sessions.shutdown();
        }
        tracing::info!(mirage_id = %service.cfg.id, "mirage service stopped");
    }
}
