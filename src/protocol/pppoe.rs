//! PPPoE discovery protocol - RFC 2516
//!
//! Zero-copy frame access (`PppoeFrame`), a low-level encoder
//! (`PppoeBuilder`) and the owned, typed `DiscoveryPacket` the access
//! concentrator works with.

use super::ethernet::{self, Frame, FrameBuilder};
use super::{EtherType, MacAddr};
use crate::{Error, Result};
use std::fmt;

/// PPPoE header size (ver/type + code + session_id + length)
pub const PPPOE_HEADER_SIZE: usize = 6;

/// PPPoE version (must be 1)
pub const PPPOE_VERSION: u8 = 1;

/// PPPoE type (must be 1)
pub const PPPOE_TYPE: u8 = 1;

/// Largest tag payload a discovery packet may carry on a 1500 byte link
pub const MAX_DISCOVERY_PAYLOAD: usize = ethernet::MAX_PAYLOAD - PPPOE_HEADER_SIZE;

/// PPPoE Discovery codes
pub mod codes {
    /// Active Discovery Initiation (broadcast from client)
    pub const PADI: u8 = 0x09;
    /// Active Discovery Offer (unicast from the AC)
    pub const PADO: u8 = 0x07;
    /// Active Discovery Request (unicast to the AC)
    pub const PADR: u8 = 0x19;
    /// Active Discovery Session-confirmation (assigns session_id)
    pub const PADS: u8 = 0x65;
    /// Active Discovery Terminate
    pub const PADT: u8 = 0xa7;
}

/// PPPoE tag types used in Discovery packets
pub mod tags {
    pub const END_OF_LIST: u16 = 0x0000;
    /// Service name (empty = any service)
    pub const SERVICE_NAME: u16 = 0x0101;
    pub const AC_NAME: u16 = 0x0102;
    /// Opaque client value, echoed verbatim
    pub const HOST_UNIQ: u16 = 0x0103;
    /// Opaque AC value, echoed verbatim
    pub const AC_COOKIE: u16 = 0x0104;
    pub const VENDOR_SPECIFIC: u16 = 0x0105;
    /// Added by relay agents, echoed verbatim
    pub const RELAY_SESSION_ID: u16 = 0x0110;
    pub const SERVICE_NAME_ERROR: u16 = 0x0201;
    pub const AC_SYSTEM_ERROR: u16 = 0x0202;
    pub const GENERIC_ERROR: u16 = 0x0203;
}

/// Discovery message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DiscoveryCode {
    /// PADI
    Initiation = codes::PADI,
    /// PADO
    Offer = codes::PADO,
    /// PADR
    Request = codes::PADR,
    /// PADS
    Confirmation = codes::PADS,
    /// PADT
    Terminate = codes::PADT,
}

impl TryFrom<u8> for DiscoveryCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            codes::PADI => Ok(DiscoveryCode::Initiation),
            codes::PADO => Ok(DiscoveryCode::Offer),
            codes::PADR => Ok(DiscoveryCode::Request),
            codes::PADS => Ok(DiscoveryCode::Confirmation),
            codes::PADT => Ok(DiscoveryCode::Terminate),
            other => Err(Error::InvalidPacket(format!(
                "unknown discovery code 0x{other:02x}"
            ))),
        }
    }
}

impl fmt::Display for DiscoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryCode::Initiation => "PADI",
            DiscoveryCode::Offer => "PADO",
            DiscoveryCode::Request => "PADR",
            DiscoveryCode::Confirmation => "PADS",
            DiscoveryCode::Terminate => "PADT",
        };
        f.write_str(name)
    }
}

/// Parsed PPPoE frame (zero-copy reference)
#[derive(Debug)]
pub struct PppoeFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppoeFrame<'a> {
    /// Parse PPPoE frame from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PPPOE_HEADER_SIZE {
            return Err(Error::Parse("PPPoE frame too short".into()));
        }

        let frame = Self { buffer };

        if frame.version() != PPPOE_VERSION || frame.frame_type() != PPPOE_TYPE {
            return Err(Error::Parse(format!(
                "invalid PPPoE version/type: {}/{}",
                frame.version(),
                frame.frame_type()
            )));
        }

        let payload_len = frame.length() as usize;
        if buffer.len() < PPPOE_HEADER_SIZE + payload_len {
            return Err(Error::Parse("PPPoE payload truncated".into()));
        }

        Ok(frame)
    }

    /// Version (4 bits, should be 1)
    pub fn version(&self) -> u8 {
        (self.buffer[0] >> 4) & 0x0f
    }

    /// Type (4 bits, should be 1)
    pub fn frame_type(&self) -> u8 {
        self.buffer[0] & 0x0f
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn session_id(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Tag area, excluding any Ethernet padding after it
    pub fn payload(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[PPPOE_HEADER_SIZE..PPPOE_HEADER_SIZE + len]
    }

    pub fn iter_tags(&self) -> PppoeTagIterator<'a> {
        PppoeTagIterator {
            data: self.payload(),
            offset: 0,
            truncated: false,
        }
    }
}

/// A PPPoE tag during iteration
#[derive(Debug, Clone)]
pub struct PppoeTag<'a> {
    pub tag_type: u16,
    pub data: &'a [u8],
}

/// Iterator over PPPoE tags
pub struct PppoeTagIterator<'a> {
    data: &'a [u8],
    offset: usize,
    truncated: bool,
}

impl PppoeTagIterator<'_> {
    /// True once iteration stopped on a tag running past the payload
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for PppoeTagIterator<'a> {
    type Item = PppoeTag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset == self.data.len() {
            return None;
        }
        if self.offset + 4 > self.data.len() {
            self.truncated = true;
            return None;
        }

        let tag_type = u16::from_be_bytes([self.data[self.offset], self.data[self.offset + 1]]);
        let tag_len =
            u16::from_be_bytes([self.data[self.offset + 2], self.data[self.offset + 3]]) as usize;

        if tag_type == tags::END_OF_LIST && tag_len == 0 {
            return None;
        }

        let data_start = self.offset + 4;
        let data_end = data_start + tag_len;

        if data_end > self.data.len() {
            self.truncated = true;
            return None;
        }

        let tag = PppoeTag {
            tag_type,
            data: &self.data[data_start..data_end],
        };

        self.offset = data_end;
        Some(tag)
    }
}

/// Low-level builder for PPPoE discovery frames
#[derive(Debug, Default)]
pub struct PppoeBuilder {
    code: u8,
    session_id: u16,
    payload: Vec<u8>,
}

impl PppoeBuilder {
    pub fn new(code: u8, session_id: u16) -> Self {
        Self {
            code,
            session_id,
            payload: Vec::new(),
        }
    }

    /// Append a raw tag; the caller guarantees `data.len() <= u16::MAX`
    pub fn add_tag(mut self, tag_type: u16, data: &[u8]) -> Self {
        self.payload.extend_from_slice(&tag_type.to_be_bytes());
        self.payload
            .extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.payload.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(PPPOE_HEADER_SIZE + self.payload.len());
        frame.push((PPPOE_VERSION << 4) | PPPOE_TYPE);
        frame.push(self.code);
        frame.extend_from_slice(&self.session_id.to_be_bytes());
        frame.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// An owned discovery tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub tag_type: u16,
    pub data: Vec<u8>,
}

/// A decoded (or to-be-encoded) discovery packet with its link addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub code: DiscoveryCode,
    pub session_id: u16,
    pub tags: Vec<Tag>,
}

impl DiscoveryPacket {
    pub fn new(code: DiscoveryCode, src: MacAddr, dst: MacAddr, session_id: u16) -> Self {
        Self {
            src,
            dst,
            code,
            session_id,
            tags: Vec::new(),
        }
    }

    /// Offer answering a PADI. `services` lists every Service-Name tag to
    /// include, in order.
    pub fn offer(src: MacAddr, dst: MacAddr, ac_name: &str, services: &[&str]) -> Result<Self> {
        let mut pado = Self::new(DiscoveryCode::Offer, src, dst, 0);
        pado.add_tag(tags::AC_NAME, ac_name.as_bytes())?;
        for service in services {
            pado.add_tag(tags::SERVICE_NAME, service.as_bytes())?;
        }
        Ok(pado)
    }

    /// Session confirmation. With `error` set the session id is forced to 0
    /// and a Service-Name-Error tag carries the reason.
    pub fn confirmation(
        src: MacAddr,
        dst: MacAddr,
        session_id: u16,
        service_name: &[u8],
        error: Option<&str>,
    ) -> Result<Self> {
        let session_id = if error.is_some() { 0 } else { session_id };
        let mut pads = Self::new(DiscoveryCode::Confirmation, src, dst, session_id);
        pads.add_tag(tags::SERVICE_NAME, service_name)?;
        if let Some(reason) = error {
            pads.add_tag(tags::SERVICE_NAME_ERROR, reason.as_bytes())?;
        }
        Ok(pads)
    }

    pub fn terminate(src: MacAddr, dst: MacAddr, session_id: u16) -> Self {
        Self::new(DiscoveryCode::Terminate, src, dst, session_id)
    }

    pub fn add_tag(&mut self, tag_type: u16, data: &[u8]) -> Result<()> {
        if data.len() > u16::MAX as usize {
            return Err(Error::InvalidPacket(format!(
                "tag 0x{tag_type:04x} too long ({} bytes)",
                data.len()
            )));
        }
        self.tags.push(Tag {
            tag_type,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Copy the listed tags from `request` verbatim, preserving empty values
    pub fn echo_tags(&mut self, request: &DiscoveryPacket, tag_types: &[u16]) -> Result<()> {
        for &tag_type in tag_types {
            if let Some(data) = request.find_tag(tag_type) {
                self.add_tag(tag_type, data)?;
            }
        }
        Ok(())
    }

    /// First tag of the given type
    pub fn find_tag(&self, tag_type: u16) -> Option<&[u8]> {
        self.tags
            .iter()
            .find(|t| t.tag_type == tag_type)
            .map(|t| t.data.as_slice())
    }

    pub fn service_name(&self) -> Option<&[u8]> {
        self.find_tag(tags::SERVICE_NAME)
    }

    pub fn host_uniq(&self) -> Option<&[u8]> {
        self.find_tag(tags::HOST_UNIQ)
    }

    pub fn relay_session_id(&self) -> Option<&[u8]> {
        self.find_tag(tags::RELAY_SESSION_ID)
    }

    pub fn ac_cookie(&self) -> Option<&[u8]> {
        self.find_tag(tags::AC_COOKIE)
    }

    pub fn ac_name(&self) -> Option<&[u8]> {
        self.find_tag(tags::AC_NAME)
    }

    pub fn service_name_error(&self) -> Option<&[u8]> {
        self.find_tag(tags::SERVICE_NAME_ERROR)
    }

    /// Encode as a complete Ethernet frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_len: usize = self.tags.iter().map(|t| 4 + t.data.len()).sum();
        if payload_len > MAX_DISCOVERY_PAYLOAD {
            return Err(Error::InvalidPacket(format!(
                "{} payload of {} bytes exceeds {}",
                self.code, payload_len, MAX_DISCOVERY_PAYLOAD
            )));
        }

        let pppoe = self
            .tags
            .iter()
            .fold(
                PppoeBuilder::new(self.code as u8, self.session_id),
                |builder, tag| builder.add_tag(tag.tag_type, &tag.data),
            )
            .build();

        Ok(FrameBuilder::new(self.dst, self.src, EtherType::PppoeDiscovery as u16)
            .payload(&pppoe)
            .build())
    }
}

/// Parse a raw link-layer buffer into the discovery packets it carries.
///
/// Frames of any other ethertype yield no packets.
pub fn parse_frame(buffer: &[u8]) -> Result<Vec<DiscoveryPacket>> {
    let frame = Frame::parse(buffer)?;
    if EtherType::from_u16(frame.ethertype()) != Some(EtherType::PppoeDiscovery) {
        return Ok(Vec::new());
    }

    let pppoe = PppoeFrame::parse(frame.payload())?;
    let code = DiscoveryCode::try_from(pppoe.code())?;

    let mut iter = pppoe.iter_tags();
    let tags: Vec<Tag> = iter
        .by_ref()
        .map(|t| Tag {
            tag_type: t.tag_type,
            data: t.data.to_vec(),
        })
        .collect();
    if iter.truncated() {
        return Err(Error::Parse(format!("{code} tag list truncated")));
    }

    Ok(vec![DiscoveryPacket {
        src: frame.src_mac(),
        dst: frame.dst_mac(),
        code,
        session_id: pppoe.session_id(),
        tags,
    }])
}
