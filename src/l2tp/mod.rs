//! L2TP side of the bridge
//!
//! Every PPPoE session gets its own kl2tpd process running a single tunnel
//! with a single session towards the LNS. The supervisor spawns it, tails
//! its diagnostic output and turns recognised log lines into
//! `L2tpEvent`s for the dispatch loop.

pub mod config;
mod kl2tpd;
mod log_watch;
pub mod stub;

pub use kl2tpd::{Kl2tpdProcess, Kl2tpdSupervisor};
pub use log_watch::{LogTracker, LogTransition};
pub use stub::{StubProcess, StubSupervisor};

use crate::protocol::MacAddr;
use crate::Result;
use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the lifecycle event queue shared by all log tailers
pub const EVENT_QUEUE_DEPTH: usize = 5;

/// Lifecycle transition reported by a supervised kl2tpd
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2tpEvent {
    /// Data plane of the L2TP session is up
    SessionUp {
        pppoe_session_id: u16,
        tunnel_id: u32,
        session_id: u32,
    },
    /// Data plane went down; the process is asked to exit
    SessionDown {
        pppoe_session_id: u16,
        tunnel_id: u32,
        session_id: u32,
    },
}

impl L2tpEvent {
    /// PPPoE session owning the kl2tpd instance that produced the event
    pub fn pppoe_session_id(&self) -> u16 {
        match *self {
            L2tpEvent::SessionUp {
                pppoe_session_id, ..
            }
            | L2tpEvent::SessionDown {
                pppoe_session_id, ..
            } => pppoe_session_id,
        }
    }
}

/// Parameters of one kl2tpd instance
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    pub pppoe_session_id: u16,
    pub peer: MacAddr,
    /// LNS address, "host:port"
    pub lns: &'a str,
}

/// Handle on one supervised L2TP process
pub trait L2tpProcess: Send + Sync + 'static {
    /// Wait until the process has exited and its log stream is drained.
    ///
    /// Every lifecycle event of the process is queued before this returns.
    fn wait(&self) -> impl Future<Output = Result<ExitStatus>> + Send;

    /// Ask the process to exit without waiting for it. Only the first call
    /// delivers a signal.
    fn signal_exit(&self) -> Result<()>;

    /// Signal the process and wait until its log stream is drained.
    fn terminate(&self) -> impl Future<Output = ()> + Send;
}

/// Starts L2TP processes
pub trait L2tpSupervisor: Send + Sync + 'static {
    type Process: L2tpProcess;

    /// Start one process; its lifecycle events are sent on `events`.
    fn spawn(
        &self,
        request: SpawnRequest<'_>,
        events: mpsc::Sender<L2tpEvent>,
    ) -> Result<Self::Process>;
}

impl<S: L2tpSupervisor> L2tpSupervisor for Arc<S> {
    type Process = S::Process;

    fn spawn(
        &self,
        request: SpawnRequest<'_>,
        events: mpsc::Sender<L2tpEvent>,
    ) -> Result<Self::Process> {
        (**self).spawn(request, events)
    }
}
