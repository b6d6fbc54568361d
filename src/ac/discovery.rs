//! Discovery replies
//!
//! Builds PADO and PADS packets answering a peer's PADI or PADR. The
//! dispatch loop decides whether to answer; these only shape the reply.

use super::ServiceNames;
use crate::protocol::pppoe::tags;
use crate::protocol::{DiscoveryPacket, MacAddr};
use crate::Result;

/// Tags copied verbatim from PADI into PADO
pub const OFFER_ECHO_TAGS: &[u16] = &[tags::HOST_UNIQ, tags::RELAY_SESSION_ID];

/// Tags copied verbatim from PADR into PADS
pub const CONFIRMATION_ECHO_TAGS: &[u16] =
    &[tags::HOST_UNIQ, tags::RELAY_SESSION_ID, tags::AC_COOKIE];

/// PADO answering `request`. An empty `service` (wildcard request) offers
/// the empty Service-Name followed by every configured one.
pub fn build_offer(
    ac_mac: MacAddr,
    request: &DiscoveryPacket,
    ac_name: &str,
    service: &str,
    services: &ServiceNames,
) -> Result<DiscoveryPacket> {
    let offered: Vec<&str> = if service.is_empty() {
        std::iter::once("").chain(services.iter()).collect()
    } else {
        vec![service]
    };

    let mut pado = DiscoveryPacket::offer(ac_mac, request.src, ac_name, &offered)?;
    pado.echo_tags(request, OFFER_ECHO_TAGS)?;
    Ok(pado)
}

/// PADS answering `request`. With `error` set the PADS carries session id
/// 0 and the error text in a Service-Name-Error tag.
pub fn build_confirmation(
    ac_mac: MacAddr,
    request: &DiscoveryPacket,
    session_id: u16,
    error: Option<&str>,
) -> Result<DiscoveryPacket> {
    let service_name = request.service_name().unwrap_or_default();
    let mut pads =
        DiscoveryPacket::confirmation(ac_mac, request.src, session_id, service_name, error)?;
    pads.echo_tags(request, CONFIRMATION_ECHO_TAGS)?;
    Ok(pads)
}
