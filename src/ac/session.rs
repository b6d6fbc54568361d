//! Session records, the session registry and session id allocation

use crate::protocol::MacAddr;
use crate::{Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Attempts before the id space is reported exhausted
pub const MAX_ALLOCATION_ATTEMPTS: usize = 100;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// PADS sent, L2TP data plane not up yet
    Negotiating,
    /// Kernel route installed
    Established,
    /// Teardown started, waiting for the L2TP process to exit
    Closing,
    /// Removed from the registry
    Closed,
}

impl SessionPhase {
    pub fn is_open(self) -> bool {
        matches!(self, SessionPhase::Negotiating | SessionPhase::Established)
    }
}

/// State shared between the dispatch loop and the shutdown coordinator
#[derive(Debug, Clone, Copy)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub has_kernel_route: bool,
    /// 0 until kl2tpd reports the data plane up
    pub tunnel_id: u32,
    pub l2tp_session_id: u32,
}

/// What teardown has to undo, taken atomically from a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub had_kernel_route: bool,
    pub tunnel_id: u32,
    pub l2tp_session_id: u32,
}

/// One PPPoE session bridged to kl2tpd
#[derive(Debug)]
pub struct Session<P> {
    id: u16,
    peer: MacAddr,
    state: Mutex<SessionState>,
    process: Arc<P>,
}

impl<P> Session<P> {
    pub fn new(id: u16, peer: MacAddr, process: Arc<P>) -> Self {
        Self {
            id,
            peer,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Negotiating,
                has_kernel_route: false,
                tunnel_id: 0,
                l2tp_session_id: 0,
            }),
            process,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn peer(&self) -> MacAddr {
        self.peer
    }

    pub fn process(&self) -> &Arc<P> {
        &self.process
    }

    /// Lock the shared state. A poisoned lock is taken over since the
    /// state is plain data.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        *self.lock()
    }

    pub fn is_open(&self) -> bool {
        self.lock().phase.is_open()
    }

    /// Leave the open phases. Returns what has to be torn down, or None if
    /// teardown already started elsewhere.
    pub fn begin_close(&self) -> Option<Teardown> {
        let mut state = self.lock();
        if !state.phase.is_open() {
            return None;
        }
        let teardown = Teardown {
            had_kernel_route: state.has_kernel_route,
            tunnel_id: state.tunnel_id,
            l2tp_session_id: state.l2tp_session_id,
        };
        state.phase = SessionPhase::Closing;
        state.has_kernel_route = false;
        Some(teardown)
    }

    pub(crate) fn mark_closed(&self) {
        self.lock().phase = SessionPhase::Closed;
    }
}

/// Live sessions by PPPoE session id
///
/// Owned and mutated by the dispatch loop only.
#[derive(Debug)]
pub struct SessionRegistry<P> {
    sessions: HashMap<u16, Arc<Session<P>>>,
}

impl<P> Default for SessionRegistry<P> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<P> SessionRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. Returns false, leaving the registry unchanged, if
    /// the id is taken.
    pub fn insert(&mut self, session: Arc<Session<P>>) -> bool {
        match self.sessions.entry(session.id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn get(&self, id: u16) -> Option<&Arc<Session<P>>> {
        self.sessions.get(&id)
    }

    pub fn remove(&mut self, id: u16) -> Option<Arc<Session<P>>> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All sessions, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Session<P>>> {
        self.sessions.values().cloned().collect()
    }

    /// Pick an id not currently registered
    pub fn allocate_id<R: Rng>(&self, rng: &mut R) -> Result<u16> {
        allocate_session_id(rng, |id| self.contains(id))
    }
}

/// Draw a nonzero session id uniformly, rejecting ids for which `is_taken`
/// holds, for at most `MAX_ALLOCATION_ATTEMPTS` draws.
pub fn allocate_session_id<R, F>(rng: &mut R, is_taken: F) -> Result<u16>
where
    R: Rng,
    F: Fn(u16) -> bool,
{
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let candidate: u16 = rng.gen_range(1..=u16::MAX);
        if !is_taken(candidate) {
            return Ok(candidate);
        }
    }
    Err(Error::IdSpaceExhausted)
}
