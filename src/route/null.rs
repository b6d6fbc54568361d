//! In-memory route backend

use super::{RouteKey, RouteManager};
use crate::Result;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOp {
    Add(RouteKey),
    Del(RouteKey),
}

/// Records route operations without touching the kernel
#[derive(Debug, Default)]
pub struct NullRoutes {
    ops: Mutex<Vec<RouteOp>>,
}

impl NullRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation in call order
    pub fn ops(&self) -> Vec<RouteOp> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Routes added and not yet removed
    pub fn installed(&self) -> Vec<RouteKey> {
        let mut installed = Vec::new();
        for op in self.ops() {
            match op {
                RouteOp::Add(key) => installed.push(key),
                RouteOp::Del(key) => installed.retain(|k| *k != key),
            }
        }
        installed
    }

    fn record(&self, op: RouteOp) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }
}

impl RouteManager for NullRoutes {
    async fn add_route(&self, key: &RouteKey) -> Result<()> {
        debug!(route = %key, "Route add (not installed)");
        self.record(RouteOp::Add(key.clone()));
        Ok(())
    }

    async fn del_route(&self, key: &RouteKey) -> Result<()> {
        debug!(route = %key, "Route del (not installed)");
        self.record(RouteOp::Del(key.clone()));
        Ok(())
    }
}
