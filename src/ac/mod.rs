//! PPPoE access concentrator
//!
//! Answers discovery, hands each accepted session to its own kl2tpd and
//! binds the two with a kernel route once the L2TP data plane is up.

pub mod discovery;
mod orchestrator;
mod service;
mod session;

pub use orchestrator::{AcSettings, Orchestrator};
pub use service::ServiceNames;
pub use session::{
    allocate_session_id, Session, SessionPhase, SessionRegistry, SessionState, Teardown,
    MAX_ALLOCATION_ATTEMPTS,
};
