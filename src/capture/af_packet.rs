//! AF_PACKET socket bound to the PPPoE discovery ethertype

use super::DiscoveryLink;
use crate::protocol::{EtherType, MacAddr};
use crate::{Error, Result};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tracing::debug;

/// AF_PACKET socket receiving only ethertype 0x8863
pub struct AfPacketSocket {
    async_fd: AsyncFd<RawFd>,
    hw_addr: MacAddr,
    closed: watch::Sender<bool>,
}

impl AfPacketSocket {
    /// Create a socket bound to `ifname`. Must run inside a tokio runtime.
    pub fn bind(ifname: &str) -> Result<Self> {
        let protocol = (EtherType::PppoeDiscovery as u16).to_be();
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as i32) };

        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(index) => index,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol,
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        let hw_addr = match Self::read_hw_addr(ifname) {
            Ok(mac) => mac,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let async_fd = match AsyncFd::new(fd) {
            Ok(async_fd) => async_fd,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(Error::Io(e));
            }
        };

        debug!(interface = ifname, ifindex, %hw_addr, "discovery socket bound");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            async_fd,
            hw_addr,
            closed,
        })
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };
        let ifname_c = CString::new(ifname).map_err(|_| not_found())?;

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(not_found());
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(not_found());
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    /// Read the interface address from /sys/class/net/<ifname>/address
    fn read_hw_addr(ifname: &str) -> Result<MacAddr> {
        let path = format!("/sys/class/net/{}/address", ifname);
        let content = std::fs::read_to_string(&path)?;
        let mac: MacAddr = content.trim().parse()?;
        if mac.is_zero() {
            return Err(Error::Config(format!(
                "interface {} has no hardware address",
                ifname
            )));
        }
        Ok(mac)
    }

    async fn recv_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(Error::LinkClosed);
            }

            let mut guard = tokio::select! {
                _ = closed.changed() => continue,
                guard = self.async_fd.readable() => guard.map_err(Error::Io)?,
            };

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::send(fd, frame.as_ptr() as *const _, frame.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        unsafe { libc::close(*self.async_fd.get_ref()) };
    }
}

impl DiscoveryLink for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv_frame(buf).await
    }

    async fn send(&self, frame: &[u8]) -> Result<usize> {
        self.send_frame(frame).await
    }

    fn hw_addr(&self) -> MacAddr {
        self.hw_addr
    }

    fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }
}
