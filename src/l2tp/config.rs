//! kl2tpd configuration generation

use super::SpawnRequest;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Name of the single tunnel in every generated file
pub const TUNNEL_NAME: &str = "t1";
/// Name of the single session inside that tunnel
pub const SESSION_NAME: &str = "s1";

#[derive(Debug, Serialize)]
struct Kl2tpdConfig<'a> {
    tunnel: BTreeMap<&'static str, TunnelSection<'a>>,
}

#[derive(Debug, Serialize)]
struct TunnelSection<'a> {
    peer: &'a str,
    version: &'static str,
    encap: &'static str,
    session: BTreeMap<&'static str, SessionSection<'a>>,
}

#[derive(Debug, Serialize)]
struct SessionSection<'a> {
    pseudowire: &'static str,
    pppoe_session_id: u16,
    pppoe_peer_mac: String,
    interface_name: &'a str,
}

/// Render the kl2tpd configuration for one PPPoE session
pub fn render(request: &SpawnRequest<'_>, interface: &str) -> Result<String> {
    let session = SessionSection {
        pseudowire: "pppac",
        pppoe_session_id: request.pppoe_session_id,
        pppoe_peer_mac: request.peer.to_string(),
        interface_name: interface,
    };
    let tunnel = TunnelSection {
        peer: request.lns,
        version: "l2tpv2",
        encap: "udp",
        session: BTreeMap::from([(SESSION_NAME, session)]),
    };
    let config = Kl2tpdConfig {
        tunnel: BTreeMap::from([(TUNNEL_NAME, tunnel)]),
    };

    let body = toml::to_string(&config).map_err(|e| Error::L2tp(e.to_string()))?;
    Ok(format!(
        "# generated by kpppoed for PPPoE session {:#06x} at {}\n\n{}",
        request.pppoe_session_id,
        chrono::Utc::now().to_rfc3339(),
        body
    ))
}
