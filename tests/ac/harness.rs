//! Access concentrator test harness
//!
//! Runs an `Orchestrator` on an in-memory link with the stub L2TP
//! supervisor and an in-memory route backend.

use kpppoed::ac::{AcSettings, Orchestrator, ServiceNames};
use kpppoed::capture::{memory_link, MemoryPeer};
use kpppoed::l2tp::{StubProcess, StubSupervisor};
use kpppoed::protocol::pppoe::tags;
use kpppoed::protocol::{parse_frame, DiscoveryCode, DiscoveryPacket, MacAddr};
use kpppoed::route::{NullRoutes, RouteKey, RouteManager};
use kpppoed::telemetry::AcMetrics;
use kpppoed::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const AC_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0xac]);
pub const CLIENT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const AC_NAME: &str = "test-ac";
pub const INTERFACE: &str = "eth1";
pub const LNS: &str = "192.0.2.1:1701";

/// How long to wait for a reply that should come
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to wait before concluding no reply is coming
pub const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// Route backend whose installs can be made to fail
#[derive(Debug, Default)]
pub struct TestRoutes {
    pub null: NullRoutes,
    fail_add: AtomicBool,
}

impl TestRoutes {
    pub fn set_fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn installed(&self) -> Vec<RouteKey> {
        self.null.installed()
    }
}

impl RouteManager for TestRoutes {
    async fn add_route(&self, key: &RouteKey) -> Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(Error::Route("injected failure".into()));
        }
        self.null.add_route(key).await
    }

    async fn del_route(&self, key: &RouteKey) -> Result<()> {
        self.null.del_route(key).await
    }
}

/// A running access concentrator and the wire it listens on
pub struct Harness {
    pub peer: MemoryPeer,
    pub supervisor: Arc<StubSupervisor>,
    pub routes: Arc<TestRoutes>,
    pub metrics: Arc<AcMetrics>,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    pub fn start(services: &[&str]) -> Self {
        let (link, peer) = memory_link(AC_MAC);
        let supervisor = Arc::new(StubSupervisor::new());
        let routes = Arc::new(TestRoutes::default());

        let settings = AcSettings {
            ac_name: AC_NAME.into(),
            interface: INTERFACE.into(),
            services: ServiceNames::new(services.iter().copied()),
            lns: LNS.into(),
        };
        let orchestrator = Orchestrator::new(
            settings,
            Arc::new(link),
            Arc::clone(&supervisor),
            Arc::clone(&routes),
        );
        let metrics = orchestrator.metrics();

        let (shutdown, shutdown_rx) = mpsc::channel(4);
        let task = tokio::spawn(orchestrator.run(shutdown_rx));

        Self {
            peer,
            supervisor,
            routes,
            metrics,
            shutdown,
            task,
        }
    }

    pub fn send(&self, packet: &DiscoveryPacket) {
        let frame = packet.encode().expect("encode request");
        assert!(self.peer.inject(frame), "link gone");
    }

    /// Next discovery packet sent by the AC
    pub async fn recv(&self) -> Option<DiscoveryPacket> {
        let frame = self.peer.next_frame(REPLY_TIMEOUT).await?;
        let mut packets = parse_frame(&frame).expect("AC sent a malformed frame");
        assert_eq!(packets.len(), 1);
        packets.pop()
    }

    /// Assert the AC sends nothing for a while
    pub async fn expect_silence(&self) {
        if let Some(frame) = self.peer.next_frame(SILENCE_WINDOW).await {
            panic!("unexpected frame from AC: {:?}", parse_frame(&frame));
        }
    }

    /// Negotiate a session for `svcA` and return its id
    pub async fn open_session(&self) -> u16 {
        self.send(&padr(b"svcA"));
        let pads = self.recv().await.expect("PADS");
        assert_eq!(pads.code, DiscoveryCode::Confirmation);
        assert_eq!(pads.service_name_error(), None);
        assert_ne!(pads.session_id, 0);
        pads.session_id
    }

    pub fn process(&self, session_id: u16) -> StubProcess {
        self.supervisor
            .process(session_id)
            .expect("no kl2tpd spawned for session")
    }

    pub async fn request_shutdown(&self) {
        self.shutdown.send(()).await.expect("orchestrator gone");
    }

    /// Request shutdown and wait for the orchestrator to return
    pub async fn shutdown(self) -> Result<()> {
        self.request_shutdown().await;
        self.join().await
    }

    pub async fn join(self) -> Result<()> {
        tokio::time::timeout(REPLY_TIMEOUT, self.task)
            .await
            .expect("orchestrator did not stop")
            .expect("orchestrator panicked")
    }
}

/// Poll `cond` until it holds or `REPLY_TIMEOUT` passes
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn padi(service: &[u8]) -> DiscoveryPacket {
    let mut packet =
        DiscoveryPacket::new(DiscoveryCode::Initiation, CLIENT_MAC, MacAddr::BROADCAST, 0);
    packet.add_tag(tags::SERVICE_NAME, service).unwrap();
    packet
}

pub fn padr(service: &[u8]) -> DiscoveryPacket {
    let mut packet = DiscoveryPacket::new(DiscoveryCode::Request, CLIENT_MAC, AC_MAC, 0);
    packet.add_tag(tags::SERVICE_NAME, service).unwrap();
    packet
}

pub fn padt(src: MacAddr, session_id: u16) -> DiscoveryPacket {
    DiscoveryPacket::new(DiscoveryCode::Terminate, src, AC_MAC, session_id)
}

/// Service-Name tags of a packet, in order
pub fn service_names(packet: &DiscoveryPacket) -> Vec<Vec<u8>> {
    packet
        .tags
        .iter()
        .filter(|t| t.tag_type == tags::SERVICE_NAME)
        .map(|t| t.data.clone())
        .collect()
}
