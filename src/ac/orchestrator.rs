//! Dispatch loop
//!
//! One loop owns the session registry and handles one event at a time:
//! received discovery frames, kl2tpd lifecycle events, kl2tpd exits and
//! shutdown requests. Background tasks (frame receiver, per-process exit
//! watchers, kl2tpd log tailers, the shutdown coordinator) only talk to it
//! through channels.

use super::discovery;
use super::service::ServiceNames;
use super::session::{Session, SessionPhase, SessionRegistry};
use crate::capture::DiscoveryLink;
use crate::config::Config;
use crate::l2tp::{L2tpEvent, L2tpProcess, L2tpSupervisor, SpawnRequest, EVENT_QUEUE_DEPTH};
use crate::protocol::{parse_frame, DiscoveryCode, DiscoveryPacket, MacAddr};
use crate::route::{RouteKey, RouteManager};
use crate::telemetry::AcMetrics;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Large enough for any Ethernet frame
const RECV_BUFFER_SIZE: usize = 2048;

/// Received frames queued for the dispatch loop
const FRAME_QUEUE_DEPTH: usize = 64;

/// Consecutive receive errors after which the receiver gives up
const MAX_RECV_ERRORS: u32 = 10;

/// Access concentrator settings taken from the configuration
#[derive(Debug, Clone)]
pub struct AcSettings {
    pub ac_name: String,
    pub interface: String,
    pub services: ServiceNames,
    /// LNS address, "host:port"
    pub lns: String,
}

impl AcSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ac_name: config.ac_name.clone(),
            interface: config.interface_name.clone(),
            services: ServiceNames::new(config.services.iter().cloned()),
            lns: config.lns_ipaddr.clone(),
        }
    }
}

/// Everything one dispatch iteration can react to
enum Event<P> {
    Received(Vec<u8>),
    ProcessComplete(Completion<P>),
    L2tp(L2tpEvent),
    Shutdown,
    Closed,
}

/// A supervised process has exited and been reaped
struct Completion<P> {
    session: Arc<Session<P>>,
    status: Result<ExitStatus>,
}

/// State used by both the dispatch loop and the shutdown coordinator
struct Shared<L, R> {
    link: Arc<L>,
    routes: Arc<R>,
    hw_addr: MacAddr,
    interface: String,
    metrics: Arc<AcMetrics>,
}

impl<L: DiscoveryLink, R: RouteManager> Shared<L, R> {
    async fn send_packet(&self, packet: &DiscoveryPacket) -> Result<()> {
        let frame = packet.encode()?;
        if let Err(e) = self.link.send(&frame).await {
            self.metrics.tx_errors.inc();
            return Err(e);
        }
        debug!(code = %packet.code, dst = %packet.dst, session_id = packet.session_id, "Sent");
        Ok(())
    }

    fn route_key(&self, session_id: u16, tunnel_id: u32, l2tp_session_id: u32) -> RouteKey {
        RouteKey::new(tunnel_id, l2tp_session_id, session_id, &self.interface)
    }

    /// Tear a session down. Only the first call for a session has any
    /// effect; later ones return immediately.
    async fn close_session<P: L2tpProcess>(
        &self,
        session: &Arc<Session<P>>,
        reason: &str,
        send_terminate: bool,
    ) {
        let Some(teardown) = session.begin_close() else {
            debug!(session_id = session.id(), reason, "Session already closing");
            return;
        };
        info!(
            session_id = session.id(),
            peer = %session.peer(),
            reason,
            "Closing session"
        );

        if send_terminate {
            let padt = DiscoveryPacket::terminate(self.hw_addr, session.peer(), session.id());
            match self.send_packet(&padt).await {
                Ok(()) => self.metrics.padt_sent.inc(),
                Err(e) => warn!(session_id = session.id(), "Failed to send PADT: {}", e),
            }
        }

        if let Err(e) = session.process().signal_exit() {
            warn!(session_id = session.id(), "Failed to signal kl2tpd: {}", e);
        }

        if teardown.had_kernel_route {
            let key = self.route_key(session.id(), teardown.tunnel_id, teardown.l2tp_session_id);
            match self.routes.del_route(&key).await {
                Ok(()) => self.metrics.routes_removed.inc(),
                Err(e) => {
                    self.metrics.route_failures.inc();
                    warn!(session_id = session.id(), route = %key, "Failed to remove route: {}", e);
                }
            }
        }
    }
}

/// PPPoE access concentrator
pub struct Orchestrator<L, S: L2tpSupervisor, R> {
    shared: Arc<Shared<L, R>>,
    supervisor: S,
    settings: AcSettings,
    registry: SessionRegistry<S::Process>,
    rng: StdRng,
    shutting_down: bool,
    receiver: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
    l2tp_tx: mpsc::Sender<L2tpEvent>,
    l2tp_rx: mpsc::Receiver<L2tpEvent>,
    complete_tx: mpsc::UnboundedSender<Completion<S::Process>>,
    complete_rx: mpsc::UnboundedReceiver<Completion<S::Process>>,
    closed_tx: mpsc::Sender<()>,
    closed_rx: mpsc::Receiver<()>,
}

impl<L, S, R> Orchestrator<L, S, R>
where
    L: DiscoveryLink,
    S: L2tpSupervisor,
    R: RouteManager,
{
    pub fn new(settings: AcSettings, link: Arc<L>, supervisor: S, routes: Arc<R>) -> Self {
        let (l2tp_tx, l2tp_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (complete_tx, complete_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::channel(1);

        let shared = Shared {
            hw_addr: link.hw_addr(),
            link,
            routes,
            interface: settings.interface.clone(),
            metrics: Arc::new(AcMetrics::new()),
        };

        Self {
            shared: Arc::new(shared),
            supervisor,
            settings,
            registry: SessionRegistry::new(),
            rng: StdRng::from_entropy(),
            shutting_down: false,
            receiver: None,
            watchers: Vec::new(),
            l2tp_tx,
            l2tp_rx,
            complete_tx,
            complete_rx,
            closed_tx,
            closed_rx,
        }
    }

    pub fn metrics(&self) -> Arc<AcMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn hw_addr(&self) -> MacAddr {
        self.shared.hw_addr
    }

    /// Serve until a shutdown request has been fully carried out. Every
    /// message on `shutdown` is a request; only the first one counts.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            interface = %self.settings.interface,
            hw_addr = %self.shared.hw_addr,
            ac_name = %self.settings.ac_name,
            services = self.settings.services.len(),
            lns = %self.settings.lns,
            "Access concentrator started"
        );

        let (frames_tx, mut frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        self.receiver = Some(tokio::spawn(receive_frames(
            Arc::clone(&self.shared.link),
            frames_tx,
        )));

        let mut frames_open = true;
        let mut shutdown_open = true;

        loop {
            let event = tokio::select! {
                biased;

                Some(event) = self.l2tp_rx.recv() => Event::L2tp(event),
                Some(done) = self.complete_rx.recv() => Event::ProcessComplete(done),
                signal = shutdown.recv(), if shutdown_open => match signal {
                    Some(()) => Event::Shutdown,
                    None => {
                        shutdown_open = false;
                        continue;
                    }
                },
                frame = frames_rx.recv(), if frames_open => match frame {
                    Some(frame) => Event::Received(frame),
                    None => {
                        frames_open = false;
                        if self.shutting_down {
                            continue;
                        }
                        error!("Discovery receiver stopped");
                        Event::Shutdown
                    }
                },
                Some(()) = self.closed_rx.recv() => Event::Closed,
            };

            match event {
                Event::Received(frame) => self.handle_frame(&frame).await,
                Event::ProcessComplete(done) => self.handle_process_complete(done).await,
                Event::L2tp(event) => self.handle_l2tp_event(event).await,
                Event::Shutdown => self.begin_shutdown(),
                Event::Closed => break,
            }
        }

        self.shared.metrics.set_active_sessions(self.registry.len());
        for (name, value) in self.shared.metrics.export() {
            debug!(metric = %name, value, "Final counter");
        }
        info!(
            sessions_opened = self.shared.metrics.sessions_opened.get(),
            sessions_closed = self.shared.metrics.sessions_closed.get(),
            "Access concentrator stopped"
        );
        Ok(())
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        if self.shutting_down {
            return;
        }

        let packets = match parse_frame(frame) {
            Ok(packets) => packets,
            Err(e) => {
                self.shared.metrics.discovery_errors.inc();
                debug!("Dropping discovery frame: {}", e);
                return;
            }
        };

        for packet in packets {
            // AF_PACKET hands our own transmissions back to us
            if packet.src == self.shared.hw_addr {
                continue;
            }
            let code = packet.code;
            let peer = packet.src;
            if let Err(e) = self.handle_packet(&packet).await {
                self.shared.metrics.discovery_errors.inc();
                warn!(%code, %peer, "Discovery packet rejected: {}", e);
            }
        }
    }

    async fn handle_packet(&mut self, packet: &DiscoveryPacket) -> Result<()> {
        match packet.code {
            DiscoveryCode::Initiation => self.handle_padi(packet).await,
            DiscoveryCode::Request => self.handle_padr(packet).await,
            DiscoveryCode::Terminate => self.handle_padt(packet).await,
            DiscoveryCode::Offer | DiscoveryCode::Confirmation => {
                Err(Error::UnexpectedCode(packet.code as u8))
            }
        }
    }

    async fn handle_padi(&mut self, packet: &DiscoveryPacket) -> Result<()> {
        self.shared.metrics.padi_received.inc();

        let requested = packet.service_name().unwrap_or_default();
        let service = match self.settings.services.resolve_bytes(requested) {
            Ok(service) => service,
            Err(e) => {
                debug!(peer = %packet.src, "Ignoring PADI: {}", e);
                return Ok(());
            }
        };

        let pado = discovery::build_offer(
            self.shared.hw_addr,
            packet,
            &self.settings.ac_name,
            &service,
            &self.settings.services,
        )?;
        self.shared.send_packet(&pado).await?;
        self.shared.metrics.pado_sent.inc();
        Ok(())
    }

    async fn handle_padr(&mut self, packet: &DiscoveryPacket) -> Result<()> {
        self.shared.metrics.padr_received.inc();

        // Only the first failure is reported to the peer
        let mut failure: Option<Error> = None;
        let mut session_id = 0;

        let requested = packet.service_name().unwrap_or_default();
        match self.settings.services.resolve_bytes(requested) {
            Ok(_) => match self.registry.allocate_id(&mut self.rng) {
                Ok(id) => session_id = id,
                Err(e) => failure = Some(e),
            },
            Err(e) => failure = Some(e),
        }

        let mut session = None;
        if failure.is_none() {
            let request = SpawnRequest {
                pppoe_session_id: session_id,
                peer: packet.src,
                lns: &self.settings.lns,
            };
            match self.supervisor.spawn(request, self.l2tp_tx.clone()) {
                Ok(process) => {
                    let s = Arc::new(Session::new(session_id, packet.src, Arc::new(process)));
                    self.register(Arc::clone(&s));
                    session = Some(s);
                }
                Err(e) => {
                    self.shared.metrics.l2tp_spawn_failures.inc();
                    failure = Some(e);
                }
            }
        }

        let reason = failure.as_ref().map(|e| e.to_string());
        let sent = match discovery::build_confirmation(
            self.shared.hw_addr,
            packet,
            session_id,
            reason.as_deref(),
        ) {
            Ok(pads) => self.shared.send_packet(&pads).await,
            Err(e) => Err(e),
        };

        match (&session, sent) {
            (Some(session), Ok(())) => {
                self.shared.metrics.pads_sent.inc();
                info!(
                    session_id = session.id(),
                    peer = %session.peer(),
                    service = ?String::from_utf8_lossy(requested),
                    "Session opened"
                );
                Ok(())
            }
            (Some(session), Err(e)) => {
                self.shared
                    .close_session(session, "PADS could not be sent", false)
                    .await;
                Err(e)
            }
            (None, Ok(())) => {
                self.shared.metrics.pads_sent.inc();
                self.shared.metrics.pads_errors.inc();
                info!(
                    peer = %packet.src,
                    reason = reason.as_deref().unwrap_or_default(),
                    "Rejected PADR"
                );
                Ok(())
            }
            (None, Err(e)) => Err(e),
        }
    }

    async fn handle_padt(&mut self, packet: &DiscoveryPacket) -> Result<()> {
        self.shared.metrics.padt_received.inc();

        let session = self
            .registry
            .get(packet.session_id)
            .cloned()
            .ok_or(Error::UnknownSession(packet.session_id))?;

        if session.peer() != packet.src {
            return Err(Error::InvalidPacket(format!(
                "PADT for session 0x{:04x} from {}, session belongs to {}",
                packet.session_id,
                packet.src,
                session.peer()
            )));
        }

        self.shared
            .close_session(&session, "peer sent PADT", false)
            .await;
        Ok(())
    }

    fn register(&mut self, session: Arc<Session<S::Process>>) {
        if !self.registry.insert(Arc::clone(&session)) {
            // Ids are allocated against the registry on this same loop
            error!(session_id = session.id(), "Session id already registered");
        }
        self.shared.metrics.sessions_opened.inc();
        self.shared.metrics.set_active_sessions(self.registry.len());

        self.watchers.retain(|w| !w.is_finished());
        let completions = self.complete_tx.clone();
        self.watchers.push(tokio::spawn(async move {
            let status = session.process().wait().await;
            let _ = completions.send(Completion { session, status });
        }));
    }

    async fn handle_process_complete(&mut self, done: Completion<S::Process>) {
        let Completion { session, status } = done;
        let id = session.id();
        let unexpected = session.is_open();
        match &status {
            Ok(status) if unexpected && !status.success() => {
                error!(session_id = id, %status, "kl2tpd exited with failure")
            }
            Ok(status) => info!(session_id = id, %status, "kl2tpd exited"),
            Err(e) => error!(session_id = id, "Failed to reap kl2tpd: {}", e),
        }

        self.shared
            .close_session(&session, "l2tp daemon exited", true)
            .await;
        session.mark_closed();

        match self.registry.get(id) {
            Some(current) if Arc::ptr_eq(current, &session) => {
                self.registry.remove(id);
                self.shared.metrics.sessions_closed.inc();
                self.shared.metrics.set_active_sessions(self.registry.len());
            }
            _ => warn!(session_id = id, "Session already removed"),
        }
    }

    async fn handle_l2tp_event(&mut self, event: L2tpEvent) {
        let pppoe_session_id = event.pppoe_session_id();
        let Some(session) = self.registry.get(pppoe_session_id).cloned() else {
            debug!(session_id = pppoe_session_id, ?event, "L2TP event for unknown session");
            return;
        };

        match event {
            L2tpEvent::SessionUp {
                tunnel_id,
                session_id,
                ..
            } => self.handle_l2tp_up(session, tunnel_id, session_id).await,
            L2tpEvent::SessionDown {
                tunnel_id,
                session_id,
                ..
            } => {
                // Teardown follows when kl2tpd exits
                info!(
                    session_id = pppoe_session_id,
                    tunnel_id,
                    l2tp_session_id = session_id,
                    "L2TP session down"
                );
            }
        }
    }

    async fn handle_l2tp_up(
        &mut self,
        session: Arc<Session<S::Process>>,
        tunnel_id: u32,
        session_id: u32,
    ) {
        let pppoe_session_id = session.id();
        if tunnel_id == 0 || session_id == 0 {
            warn!(
                session_id = pppoe_session_id,
                tunnel_id,
                l2tp_session_id = session_id,
                "L2TP up without tunnel/session ids"
            );
            return;
        }

        {
            let mut state = session.lock();
            if !state.phase.is_open() || state.has_kernel_route {
                debug!(session_id = pppoe_session_id, phase = ?state.phase, "Ignoring L2TP up");
                return;
            }
            state.tunnel_id = tunnel_id;
            state.l2tp_session_id = session_id;
        }

        let key = self.shared.route_key(pppoe_session_id, tunnel_id, session_id);
        if let Err(e) = self.shared.routes.add_route(&key).await {
            self.shared.metrics.route_failures.inc();
            error!(session_id = pppoe_session_id, route = %key, "Failed to install route: {}", e);
            self.shared
                .close_session(&session, "kernel route install failed", true)
                .await;
            return;
        }
        self.shared.metrics.routes_installed.inc();

        let installed = {
            let mut state = session.lock();
            if state.phase.is_open() {
                state.has_kernel_route = true;
                state.phase = SessionPhase::Established;
                true
            } else {
                false
            }
        };

        if installed {
            info!(
                session_id = pppoe_session_id,
                tunnel_id,
                l2tp_session_id = session_id,
                "Session established"
            );
        } else {
            // Closed while the route was being installed
            match self.shared.routes.del_route(&key).await {
                Ok(()) => self.shared.metrics.routes_removed.inc(),
                Err(e) => {
                    self.shared.metrics.route_failures.inc();
                    warn!(
                        session_id = pppoe_session_id,
                        route = %key,
                        "Failed to remove route: {}", e
                    );
                }
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            warn!("Shutdown already in progress, ignoring request");
            return;
        }
        self.shutting_down = true;
        info!(sessions = self.registry.len(), "Shutting down");

        let coordinator = ShutdownCoordinator {
            shared: Arc::clone(&self.shared),
            sessions: self.registry.snapshot(),
            receiver: self.receiver.take(),
            watchers: std::mem::take(&mut self.watchers),
        };
        let closed = self.closed_tx.clone();
        tokio::spawn(async move {
            coordinator.run().await;
            let _ = closed.send(()).await;
        });
    }
}

/// Ordered teardown run off the dispatch loop
struct ShutdownCoordinator<L, R, P> {
    shared: Arc<Shared<L, R>>,
    sessions: Vec<Arc<Session<P>>>,
    receiver: Option<JoinHandle<()>>,
    watchers: Vec<JoinHandle<()>>,
}

impl<L, R, P> ShutdownCoordinator<L, R, P>
where
    L: DiscoveryLink,
    R: RouteManager,
    P: L2tpProcess,
{
    async fn run(self) {
        if !self.shared.link.close() {
            debug!("Discovery link already closed");
        }

        for session in &self.sessions {
            self.shared
                .close_session(session, "daemon shutting down", true)
                .await;
        }

        if let Some(receiver) = self.receiver {
            if let Err(e) = receiver.await {
                warn!("Receiver task failed: {}", e);
            }
        }

        for session in &self.sessions {
            session.process().terminate().await;
        }

        for watcher in self.watchers {
            if let Err(e) = watcher.await {
                warn!("Exit watcher failed: {}", e);
            }
        }
        debug!("All background tasks joined");
    }
}

async fn receive_frames<L: DiscoveryLink>(link: Arc<L>, frames: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut errors = 0;

    loop {
        match link.recv(&mut buf).await {
            Ok(len) => {
                errors = 0;
                if frames.send(buf[..len].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(Error::LinkClosed) => {
                debug!("Discovery link closed");
                break;
            }
            Err(e) => {
                errors += 1;
                warn!("Receive error: {}", e);
                if errors >= MAX_RECV_ERRORS {
                    error!("Giving up on discovery link after {} errors", errors);
                    break;
                }
            }
        }
    }
}
