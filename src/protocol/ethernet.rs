//! Ethernet II framing for PPPoE discovery

use super::MacAddr;
use crate::{Error, Result};

/// Ethernet header size (dst + src + ethertype)
pub const HEADER_SIZE: usize = 14;
/// Maximum Ethernet payload carried by the AC
pub const MAX_PAYLOAD: usize = 1500;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse(format!(
                "ethernet frame too short ({} bytes)",
                buffer.len()
            )));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[0..6]);
        MacAddr(mac)
    }

    pub fn src_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[6..12]);
        MacAddr(mac)
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    /// Everything after the header, including any trailing pad bytes
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Builder for outgoing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + MAX_PAYLOAD);
        buffer.extend_from_slice(&dst.0);
        buffer.extend_from_slice(&src.0);
        buffer.extend_from_slice(&ethertype.to_be_bytes());
        Self { buffer }
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EtherType;

    const DST: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const SRC: MacAddr = MacAddr([0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);

    #[test]
    fn test_frame_parse() {
        let mut data = Vec::new();
        data.extend_from_slice(&DST.0);
        data.extend_from_slice(&SRC.0);
        data.extend_from_slice(&[0x88, 0x63]);
        data.extend_from_slice(&[0x11, 0x09]);

        let frame = Frame::parse(&data).unwrap();
        assert_eq!(frame.dst_mac(), DST);
        assert_eq!(frame.src_mac(), SRC);
        assert_eq!(frame.ethertype(), EtherType::PppoeDiscovery as u16);
        assert_eq!(frame.payload(), &[0x11, 0x09]);
    }

    #[test]
    fn test_frame_parse_too_short() {
        assert!(Frame::parse(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(DST, SRC, EtherType::PppoeDiscovery as u16)
            .payload(&[0xde, 0xad])
            .build();

        assert_eq!(frame.len(), HEADER_SIZE + 2);
        assert_eq!(&frame[0..6], &DST.0);
        assert_eq!(&frame[6..12], &SRC.0);
        assert_eq!(&frame[12..14], &[0x88, 0x63]);
        assert_eq!(&frame[14..], &[0xde, 0xad]);
    }
}
