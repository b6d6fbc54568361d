//! In-memory L2TP supervisor
//!
//! Stands in for kl2tpd when exercising the access concentrator without
//! spawning processes. Lifecycle events are injected with `emit`.

use super::{L2tpEvent, L2tpProcess, L2tpSupervisor, SpawnRequest};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Default)]
struct StubState {
    processes: Vec<StubProcess>,
    events: Option<mpsc::Sender<L2tpEvent>>,
}

/// Supervisor that records spawn requests instead of starting processes
#[derive(Debug, Default)]
pub struct StubSupervisor {
    state: Mutex<StubState>,
    fail_spawn: AtomicBool,
}

impl StubSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following spawn fail
    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// All processes spawned so far, oldest first
    pub fn processes(&self) -> Vec<StubProcess> {
        self.lock().processes.clone()
    }

    /// Most recent process spawned for a PPPoE session
    pub fn process(&self, pppoe_session_id: u16) -> Option<StubProcess> {
        self.lock()
            .processes
            .iter()
            .rev()
            .find(|p| p.pppoe_session_id() == pppoe_session_id)
            .cloned()
    }

    /// Inject a lifecycle event as if a log tailer had produced it
    pub async fn emit(&self, event: L2tpEvent) -> bool {
        let sender = self.lock().events.clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl L2tpSupervisor for StubSupervisor {
    type Process = StubProcess;

    fn spawn(
        &self,
        request: SpawnRequest<'_>,
        events: mpsc::Sender<L2tpEvent>,
    ) -> Result<StubProcess> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(Error::L2tp("spawn refused".into()));
        }

        let (exit, _) = watch::channel(None);
        let process = StubProcess {
            inner: Arc::new(StubInner {
                pppoe_session_id: request.pppoe_session_id,
                peer: request.peer,
                lns: request.lns.to_string(),
                signals: AtomicUsize::new(0),
                exit,
            }),
        };

        let mut state = self.lock();
        state.events = Some(events);
        state.processes.push(process.clone());
        Ok(process)
    }
}

#[derive(Debug)]
struct StubInner {
    pppoe_session_id: u16,
    peer: MacAddr,
    lns: String,
    signals: AtomicUsize,
    exit: watch::Sender<Option<i32>>,
}

/// Fake process; exits when signalled or when `exit` is called
#[derive(Debug, Clone)]
pub struct StubProcess {
    inner: Arc<StubInner>,
}

impl StubProcess {
    pub fn pppoe_session_id(&self) -> u16 {
        self.inner.pppoe_session_id
    }

    pub fn peer(&self) -> MacAddr {
        self.inner.peer
    }

    pub fn lns(&self) -> &str {
        &self.inner.lns
    }

    /// Number of signals actually delivered (at most one)
    pub fn signal_count(&self) -> usize {
        self.inner.signals.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exit.borrow().is_some()
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self, code: i32) {
        self.inner.exit.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(code);
            true
        });
    }
}

impl L2tpProcess for StubProcess {
    async fn wait(&self) -> Result<ExitStatus> {
        let mut exit = self.inner.exit.subscribe();
        let code = exit
            .wait_for(|state| state.is_some())
            .await
            .map(|state| state.unwrap_or(0))
            .unwrap_or(0);
        Ok(ExitStatus::from_raw(code << 8))
    }

    fn signal_exit(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        if self
            .inner
            .signals
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.exit(0);
        }
        Ok(())
    }

    async fn terminate(&self) {
        let _ = self.signal_exit();
        let _ = self.wait().await;
    }
}
