//! Counters for discovery traffic and session lifecycle.
//!
//! All counters are relaxed atomics: they are written from the dispatch
//! loop and the shutdown coordinator, and only read for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Access concentrator metrics.
#[derive(Debug, Default)]
pub struct AcMetrics {
    // Discovery, inbound
    pub padi_received: Counter,
    pub padr_received: Counter,
    pub padt_received: Counter,
    /// Frames that failed to parse or carried a code the AC never accepts
    pub discovery_errors: Counter,

    // Discovery, outbound
    pub pado_sent: Counter,
    pub pads_sent: Counter,
    /// PADS carrying a Service-Name-Error tag
    pub pads_errors: Counter,
    pub padt_sent: Counter,
    pub tx_errors: Counter,

    // Sessions
    pub sessions_opened: Counter,
    pub sessions_closed: Counter,
    pub l2tp_spawn_failures: Counter,

    // Kernel routes
    pub routes_installed: Counter,
    pub routes_removed: Counter,
    pub route_failures: Counter,

    /// Current number of registered sessions
    pub active_sessions: AtomicU64,
}

impl AcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.store(count as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("padi_received".into(), self.padi_received.get()),
            ("padr_received".into(), self.padr_received.get()),
            ("padt_received".into(), self.padt_received.get()),
            ("discovery_errors".into(), self.discovery_errors.get()),
            ("pado_sent".into(), self.pado_sent.get()),
            ("pads_sent".into(), self.pads_sent.get()),
            ("pads_errors".into(), self.pads_errors.get()),
            ("padt_sent".into(), self.padt_sent.get()),
            ("tx_errors".into(), self.tx_errors.get()),
            ("sessions_opened".into(), self.sessions_opened.get()),
            ("sessions_closed".into(), self.sessions_closed.get()),
            ("l2tp_spawn_failures".into(), self.l2tp_spawn_failures.get()),
            ("routes_installed".into(), self.routes_installed.get()),
            ("routes_removed".into(), self.routes_removed.get()),
            ("route_failures".into(), self.route_failures.get()),
            (
                "active_sessions".into(),
                self.active_sessions.load(Ordering::Relaxed),
            ),
        ]
    }
}
