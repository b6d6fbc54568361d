//! kpppoed - PPPoE Access Concentrator
//!
//! Answers PPPoE discovery on one interface and bridges every negotiated
//! session into an L2TP session run by a dedicated kl2tpd process. Once
//! kl2tpd reports the data plane up, a kernel route switches PPPoE session
//! frames into the L2TP session.

pub mod ac;
pub mod capture;
pub mod config;
pub mod error;
pub mod l2tp;
pub mod protocol;
pub mod route;
pub mod telemetry;

pub use error::{Error, Result};
