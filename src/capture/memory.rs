//! In-memory discovery link
//!
//! `MemoryLink` is handed to the access concentrator, the matching
//! `MemoryPeer` plays the wire: frames injected on the peer are received
//! by the link and frames sent on the link show up at the peer.

use super::DiscoveryLink;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Create a connected link/peer pair
pub fn memory_link(hw_addr: MacAddr) -> (MemoryLink, MemoryPeer) {
    let (to_link, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_link) = mpsc::unbounded_channel();
    let (closed, _) = watch::channel(false);
    let send_fault = Arc::new(AtomicBool::new(false));

    let link = MemoryLink {
        hw_addr,
        inbound: Mutex::new(from_peer),
        outbound: to_peer,
        closed,
        send_fault: Arc::clone(&send_fault),
    };
    let peer = MemoryPeer {
        inbound: to_link,
        outbound: Mutex::new(from_link),
        send_fault,
    };
    (link, peer)
}

#[derive(Debug)]
pub struct MemoryLink {
    hw_addr: MacAddr,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: watch::Sender<bool>,
    send_fault: Arc<AtomicBool>,
}

impl MemoryLink {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl DiscoveryLink for MemoryLink {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        loop {
            if *closed.borrow_and_update() {
                return Err(Error::LinkClosed);
            }

            let frame = tokio::select! {
                _ = closed.changed() => continue,
                frame = inbound.recv() => frame.ok_or(Error::LinkClosed)?,
            };

            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            return Ok(len);
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<usize> {
        if self.send_fault.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::NotConnected,
            )));
        }
        self.outbound
            .send(frame.to_vec())
            .map_err(|_| Error::LinkClosed)?;
        Ok(frame.len())
    }

    fn hw_addr(&self) -> MacAddr {
        self.hw_addr
    }

    fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }
}

/// Wire side of a `MemoryLink`
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    outbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    send_fault: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Make every send on the link fail until cleared
    pub fn fail_sends(&self, fail: bool) {
        self.send_fault.store(fail, Ordering::SeqCst);
    }

    /// Deliver a frame to the link. Returns false once the link is gone.
    pub fn inject(&self, frame: Vec<u8>) -> bool {
        self.inbound.send(frame).is_ok()
    }

    /// Next frame sent by the link, waiting at most `timeout`
    pub async fn next_frame(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut outbound = self.outbound.lock().await;
        tokio::time::timeout(timeout, outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Frame already sent by the link, without waiting
    pub async fn try_frame(&self) -> Option<Vec<u8>> {
        self.outbound.lock().await.try_recv().ok()
    }
}
