use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("service {name:?} unavailable")]
    ServiceUnavailable { name: String },

    #[error("session ID space exhausted")]
    IdSpaceExhausted,

    #[error("unknown session 0x{0:04x}")]
    UnknownSession(u16),

    #[error("unexpected discovery code 0x{0:02x} from peer")]
    UnexpectedCode(u8),

    #[error("l2tp daemon: {0}")]
    L2tp(String),

    #[error("kernel route: {0}")]
    Route(String),

    #[error("discovery link closed")]
    LinkClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
