//! Kernel routes binding a PPPoE session to its L2TP session
//!
//! Once kl2tpd reports its data plane up, frames for the PPPoE session
//! have to be switched into the L2TP session by the kernel. Installing
//! that binding is delegated to a `RouteManager`.

mod helper;
mod null;

pub use helper::HelperRoutes;
pub use null::{NullRoutes, RouteOp};

use crate::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Identifies one PPPoE to L2TP binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub tunnel_id: u32,
    pub session_id: u32,
    /// Always 0, the LNS side is not known to kl2tpd's log
    pub peer_session_id: u32,
    pub pppoe_session_id: u16,
    pub interface: String,
}

impl RouteKey {
    pub fn new(
        tunnel_id: u32,
        session_id: u32,
        pppoe_session_id: u16,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            tunnel_id,
            session_id,
            peer_session_id: 0,
            pppoe_session_id,
            interface: interface.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tunnel {} session {} <-> pppoe {:#06x} on {}",
            self.tunnel_id, self.session_id, self.pppoe_session_id, self.interface
        )
    }
}

/// Installs and removes kernel routes
pub trait RouteManager: Send + Sync + 'static {
    fn add_route(&self, key: &RouteKey) -> impl Future<Output = Result<()>> + Send;

    fn del_route(&self, key: &RouteKey) -> impl Future<Output = Result<()>> + Send;
}

impl<R: RouteManager> RouteManager for Arc<R> {
    fn add_route(&self, key: &RouteKey) -> impl Future<Output = Result<()>> + Send {
        (**self).add_route(key)
    }

    fn del_route(&self, key: &RouteKey) -> impl Future<Output = Result<()>> + Send {
        (**self).del_route(key)
    }
}

/// Route backend chosen from configuration
#[derive(Debug)]
pub enum RouteBackend {
    Null(NullRoutes),
    Helper(HelperRoutes),
}

impl RouteBackend {
    /// Helper program if one is configured, otherwise routes are only
    /// recorded in memory
    pub fn from_helper(helper: Option<&std::path::Path>) -> Self {
        match helper {
            Some(path) => RouteBackend::Helper(HelperRoutes::new(path)),
            None => RouteBackend::Null(NullRoutes::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RouteBackend::Null(_) => "null",
            RouteBackend::Helper(_) => "helper",
        }
    }
}

impl RouteManager for RouteBackend {
    async fn add_route(&self, key: &RouteKey) -> Result<()> {
        match self {
            RouteBackend::Null(r) => r.add_route(key).await,
            RouteBackend::Helper(r) => r.add_route(key).await,
        }
    }

    async fn del_route(&self, key: &RouteKey) -> Result<()> {
        match self {
            RouteBackend::Null(r) => r.del_route(key).await,
            RouteBackend::Helper(r) => r.del_route(key).await,
        }
    }
}
