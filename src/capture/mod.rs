//! Discovery link backends
//!
//! The access concentrator only needs raw access to PPPoE discovery frames
//! on one interface. AF_PACKET is the real backend; the in-memory link
//! backs the tests.

mod af_packet;
mod memory;

pub use af_packet::AfPacketSocket;
pub use memory::{memory_link, MemoryLink, MemoryPeer};

use crate::protocol::MacAddr;
use crate::Result;
use std::future::Future;

/// Raw link-layer connection carrying PPPoE discovery frames
///
/// Frames are complete Ethernet frames in both directions.
pub trait DiscoveryLink: Send + Sync + 'static {
    /// Receive one frame into `buf`, returning its length.
    ///
    /// Fails with `Error::LinkClosed` once `close` has been called.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Send one frame
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Hardware address of the bound interface
    fn hw_addr(&self) -> MacAddr;

    /// Stop reception. Pending and future `recv` calls fail with
    /// `Error::LinkClosed`; frames can still be sent until the link is
    /// dropped. Returns false if the link was already closed.
    fn close(&self) -> bool;
}
