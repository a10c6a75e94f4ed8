//! Ghost runtime: lifecycle bootstrap, admin listener and the Mirage link.
//!
//! The Mirage link is one forwarder thread that owns the session. Events
//! from admin executions reach it over a channel; between events it wakes
//! every heartbeat to probe a live session or reconnect a lost one. The
//! channel and the link's own backlog are both capped at
//! [`MAX_EVENT_BACKLOG`]; when either is full the oldest event is dropped.
//! Reconnects can block the link for a long time, so the channel cap is
//! what holds while Mirage stays down.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::admin::{AdminLog, AdminRequest};
use crate::cluster::{ClusterHost, SpawnGhostRequest, SpawnGhostResult};
use crate::config::{GhostConfig, MiragePolicy};
use crate::error::GhostError;
use crate::server::GhostServer;
use edge_core::Event;
use edge_seeds::{CatalogOptions, SeedMetadata, builtin_registry};
use edge_session::admin::{self, ADMIN_READ_TIMEOUT};
use edge_session::listener::{self, ListenerConfig, ListenerHandle};
use edge_session::{
    CancelToken, MirageClient, MirageClientConfig, MirageSession, SeedInfo, SessionError,
};

/// Events held while Mirage is unreachable; the oldest is dropped first.
pub const MAX_EVENT_BACKLOG: usize = 1024;

pub struct GhostService {
    cfg: GhostConfig,
    server: Arc<GhostServer>,
    admin: Mutex<AdminLog>,
    cluster: ClusterHost,
    events_tx: Sender<Event>,
    events_rx: Mutex<Option<Receiver<Event>>>,
    /// Second handle on the event channel, used only to evict the oldest
    /// event when the channel is full.
    events_evict: Receiver<Event>,
}

impl std::fmt::Debug for GhostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostService")
            .field("ghost_id", &self.cfg.id)
            .field("policy", &self.cfg.mirage.policy)
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl GhostService {
    /// Validates `cfg` and walks the lifecycle to `radiating`.
    pub fn bootstrap(cfg: GhostConfig) -> Result<Arc<Self>, GhostError> {
        if cfg.heartbeat_interval_ms == 0 {
            return Err(GhostError::InvalidHeartbeatInterval);
        }
        let policy = cfg.mirage.policy;
        if policy != MiragePolicy::Headless && cfg.mirage.address.trim().is_empty() {
            return Err(GhostError::MirageAddressRequired {
                policy: policy.as_str(),
            });
        }

        let registry = builtin_registry(
            cfg.seeds.as_slice(),
            &CatalogOptions {
                fs_root: cfg.fs_root.clone(),
            },
        )?;
        let server = Arc::new(GhostServer::new());
        server.appear(&cfg.id)?;
        server.seed(Arc::new(registry))?;
        server.radiate()?;

        let (events_tx, events_rx) = channel::bounded(MAX_EVENT_BACKLOG);
        Ok(Arc::new(Self {
            cfg,
            server,
            admin: Mutex::new(AdminLog::default()),
            cluster: ClusterHost::default(),
            events_tx,
            events_evict: events_rx.clone(),
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }

    pub fn config(&self) -> &GhostConfig {
        &self.cfg
    }

    pub fn server(&self) -> &GhostServer {
        &self.server
    }

    pub(crate) fn admin_log(&self) -> MutexGuard<'_, AdminLog> {
        match self.admin.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn spawn_managed_ghost(
        &self,
        req: &SpawnGhostRequest,
    ) -> Result<SpawnGhostResult, GhostError> {
        self.cluster.spawn(&self.cfg, &self.server.ghost_id(), req)
    }

    pub fn managed_ghost_count(&self) -> usize {
        self.cluster.len()
    }

    /// Hands an event to the Mirage link without blocking. Headless Ghosts
    /// keep events local.
    pub(crate) fn forward_event(&self, mut event: Event) {
        if self.cfg.mirage.policy == MiragePolicy::Headless {
            return;
        }
        loop {
            match self.events_tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(dropped) = self.events_evict.try_recv() {
                        tracing::warn!(
                            event_id = %dropped.event_id,
                            "event queue full; dropping oldest"
                        );
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::warn!("mirage link gone; event not forwarded");
                    return;
                }
            }
        }
    }

    /// Events handed to the link thread that it has not picked up yet.
    pub fn queued_events(&self) -> usize {
        self.events_tx.len()
    }

    /// Starts the admin listener and, unless headless, the Mirage link.
    /// With the `required` policy the first session must come up before
    /// this returns. A service can be started once.
    pub fn start(self: &Arc<Self>, cancel: &CancelToken) -> Result<GhostRuntime, GhostError> {
        let span = tracing::info_span!("ghost_service", ghost_id = %self.cfg.id);
        let _guard = span.enter();

        let events = {
            let mut slot = match self.events_rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take().ok_or(GhostError::AlreadyStarted)?
        };

        let link_cancel = CancelToken::new();
        let mut link = None;
        if self.cfg.mirage.policy != MiragePolicy::Headless {
            let client = MirageClient::new(self.mirage_client_config())?;
            let session = match self.cfg.mirage.policy {
                MiragePolicy::Required => Some(client.connect_and_register(cancel)?),
                _ => None,
            };
            link = Some(MirageLink::spawn(
                MirageLink {
                    client,
                    heartbeat: self.cfg.heartbeat_interval(),
                    cancel: link_cancel.clone(),
                    session,
                    backlog: VecDeque::new(),
                },
                events,
            ));
        }

        let admin = match self.cfg.admin_listen.trim() {
            "" => None,
            addr => match self.spawn_admin_listener(addr) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    link_cancel.cancel();
                    if let Some(link) = link {
                        link.stop();
                    }
                    return Err(err);
                }
            },
        };

        tracing::info!(
            admin_addr = ?admin.as_ref().map(ListenerHandle::local_addr),
            policy = %self.cfg.mirage.policy,
            "ghost service started"
        );
        Ok(GhostRuntime {
            service: Arc::clone(self),
            admin,
            link,
            link_cancel,
        })
    }

    /// Runs until `cancel` fires, then stops children, the admin listener
    /// and the Mirage link.
    pub fn serve(self: &Arc<Self>, cancel: &CancelToken) -> Result<(), GhostError> {
        let runtime = self.start(cancel)?;
        cancel.wait();
        runtime.shutdown();
        Ok(())
    }

    fn spawn_admin_listener(self: &Arc<Self>, addr: &str) -> Result<ListenerHandle, GhostError> {
        let service = Arc::clone(self);
        let handle = listener::spawn(
            addr,
            ListenerConfig::new("ghost_admin_accept_loop"),
            move |stream, peer| {
                let span = tracing::info_span!("ghost_admin_conn", %peer);
                let _guard = span.enter();
                tracing::info!("admin client connected");
                admin::serve_connection(stream, ADMIN_READ_TIMEOUT, |req: AdminRequest| {
                    service.handle_admin_request(req)
                });
                tracing::info!("admin client disconnected");
            },
        )?;
        Ok(handle)
    }

    fn mirage_client_config(&self) -> MirageClientConfig {
        let link = &self.cfg.mirage;
        MirageClientConfig {
            address: link.address.clone(),
            ghost_id: self.server.ghost_id(),
            peer_identity: link.peer_identity.clone(),
            seed_list: seed_info_from_metadata(&self.server.seed_metadata()),
            session: link.session.clone(),
            max_connect_attempts: link.max_connect_attempts,
        }
    }
}

pub fn seed_info_from_metadata(list: &[SeedMetadata]) -> Vec<SeedInfo> {
    list.iter()
        .map(|meta| SeedInfo {
            id: meta.id.clone(),
            name: meta.name.clone(),
            description: meta.description.clone(),
        })
        .collect()
}

/// A started service. Dropping it without [`GhostRuntime::shutdown`] leaves
/// the admin listener to its own `Drop`.
pub struct GhostRuntime {
    service: Arc<GhostService>,
    admin: Option<ListenerHandle>,
    link: Option<LinkHandle>,
    link_cancel: CancelToken,
}

impl std::fmt::Debug for GhostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostRuntime")
            .field("service", &self.service)
            .field("admin_addr", &self.admin_addr())
            .field("linked", &self.link.is_some())
            .finish()
    }
}

impl GhostRuntime {
    pub fn service(&self) -> &Arc<GhostService> {
        &self.service
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().map(ListenerHandle::local_addr)
    }

    pub fn shutdown(self) {
        let GhostRuntime {
            service,
            admin,
            link,
            link_cancel,
        } = self;
        service.cluster.stop_all();
        if let Some(admin) = admin {
            admin.shutdown();
        }
        link_cancel.cancel();
        if let Some(link) = link {
            link.stop();
        }
        tracing::info!(ghost_id = %service.cfg.id, "ghost service stopped");
    }
}

struct LinkHandle {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

impl LinkHandle {
    fn stop(self) {
        drop(self.stop);
        let _ = self.join.join();
    }
}

struct MirageLink {
    client: MirageClient,
    heartbeat: Duration,
    cancel: CancelToken,
    session: Option<MirageSession>,
    backlog: VecDeque<Event>,
}

impl MirageLink {
    fn spawn(link: MirageLink, events: Receiver<Event>) -> LinkHandle {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let span = tracing::Span::current();
        let join = thread::spawn(move || span.in_scope(|| link.run(events, stop_rx)));
        LinkHandle {
            stop: stop_tx,
            join,
        }
    }

    fn run(mut self, events: Receiver<Event>, stop: Receiver<()>) {
        let span = tracing::info_span!("mirage_link", addr = %self.client.config().address);
        let _guard = span.enter();

        if self.session.is_none() {
            self.reconnect();
        }
        loop {
            crossbeam::select! {
                recv(events) -> msg => match msg {
                    Ok(event) => self.enqueue(event),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
                default(self.heartbeat) => self.heartbeat_tick(),
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.flush();
        }

        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if !self.backlog.is_empty() {
            tracing::warn!(dropped = self.backlog.len(), "mirage link stopped with unsent events");
        }
    }

    fn enqueue(&mut self, event: Event) {
        if self.backlog.len() == MAX_EVENT_BACKLOG
            && let Some(dropped) = self.backlog.pop_front()
        {
            tracing::warn!(event_id = %dropped.event_id, "event backlog full; dropping oldest");
        }
        self.backlog.push_back(event);
    }

    fn heartbeat_tick(&mut self) {
        match self.session.as_mut() {
            Some(session) => {
                if !session.probe() {
                    tracing::warn!("mirage session lost");
                    self.session = None;
                    self.reconnect();
                }
            }
            None => self.reconnect(),
        }
    }

    fn reconnect(&mut self) {
        match self.client.connect_and_register(&self.cancel) {
            Ok(session) => {
                tracing::info!(backlog = self.backlog.len(), "mirage session established");
                self.session = Some(session);
            }
            Err(SessionError::Interrupted(_)) => {}
            Err(err) => tracing::warn!(error = %err, "mirage connect failed"),
        }
    }

    /// Sends backlog events in order until it is empty or the session
    /// fails. A rejected or invalid event is dropped; any other failure
    /// keeps the event and drops the session.
    fn flush(&mut self) {
        while let Some(event) = self.backlog.front().cloned() {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match session.send_event_with_ack(&self.cancel, event) {
                Ok(_) => {
                    self.backlog.pop_front();
                }
                Err(SessionError::Interrupted(_)) => return,
                Err(err @ (SessionError::AckRejected { .. } | SessionError::Wire(_))) => {
                    tracing::warn!(error = %err, "mirage refused event; dropping");
                    self.backlog.pop_front();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "event delivery failed; dropping session");
                    if let Some(mut session) = self.session.take() {
                        session.close();
                    }
                    return;
                }
            }
        }
    }
}
