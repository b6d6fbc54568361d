//! Wire formats handled by the access concentrator

pub mod ethernet;
pub mod pppoe;
pub mod types;

pub use pppoe::{parse_frame, DiscoveryCode, DiscoveryPacket, Tag};
pub use types::*;
