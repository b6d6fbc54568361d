//! kl2tpd log scraping
//!
//! kl2tpd writes logfmt lines to stderr. A fixed table maps recognised
//! lines to transitions of a small state machine tracking the tunnel id,
//! the session id and whether the data plane is established. Any change to
//! kl2tpd's log wording breaks this table.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    TunnelCreated,
    SessionCreated,
    Established,
    SessionClosed,
    TunnelClosed,
}

struct LinePattern {
    kind: LineKind,
    /// Substring identifying the line
    marker: &'static str,
    /// logfmt key whose numeric value the line must carry
    capture: Option<&'static str>,
}

const LINE_PATTERNS: &[LinePattern] = &[
    LinePattern {
        kind: LineKind::TunnelCreated,
        marker: r#"message="new tunnel""#,
        capture: Some("tunnel_id"),
    },
    LinePattern {
        kind: LineKind::SessionCreated,
        marker: r#"message="new session""#,
        capture: Some("session_id"),
    },
    LinePattern {
        kind: LineKind::Established,
        marker: r#"message="data plane established""#,
        capture: None,
    },
    LinePattern {
        kind: LineKind::SessionClosed,
        marker: r#"message="session closed""#,
        capture: None,
    },
    LinePattern {
        kind: LineKind::TunnelClosed,
        marker: r#"message="tunnel closed""#,
        capture: None,
    },
];

/// Value of `key=<n>` in a logfmt line, matching whole keys only
fn logfmt_u32(line: &str, key: &str) -> Option<u32> {
    line.split_whitespace()
        .filter_map(|token| token.strip_prefix(key)?.strip_prefix('='))
        .find_map(|value| value.trim_matches('"').parse().ok())
}

fn classify(line: &str) -> Option<(LineKind, Option<u32>)> {
    let pattern = LINE_PATTERNS.iter().find(|p| line.contains(p.marker))?;
    match pattern.capture {
        Some(key) => logfmt_u32(line, key).map(|value| (pattern.kind, Some(value))),
        None => Some((pattern.kind, None)),
    }
}

/// Data plane transition derived from the log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTransition {
    Up { tunnel_id: u32, session_id: u32 },
    Down { tunnel_id: u32, session_id: u32 },
}

/// Log-derived state of one kl2tpd instance
#[derive(Debug, Default)]
pub struct LogTracker {
    tunnel_id: Option<u32>,
    session_id: Option<u32>,
    established: bool,
}

impl LogTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tunnel_id(&self) -> Option<u32> {
        self.tunnel_id
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Feed one log line. Returns a transition at most once per change of
    /// the established flag.
    pub fn feed(&mut self, line: &str) -> Option<LogTransition> {
        let (kind, value) = classify(line)?;

        match kind {
            LineKind::TunnelCreated => {
                if self.tunnel_id.is_none() {
                    self.tunnel_id = value;
                }
                None
            }
            LineKind::SessionCreated => {
                if self.session_id.is_none() {
                    self.session_id = value;
                }
                None
            }
            LineKind::Established => {
                if self.established {
                    return None;
                }
                match (self.tunnel_id, self.session_id) {
                    (Some(tunnel_id), Some(session_id)) => {
                        self.established = true;
                        Some(LogTransition::Up {
                            tunnel_id,
                            session_id,
                        })
                    }
                    _ => {
                        warn!(
                            tunnel_id = ?self.tunnel_id,
                            session_id = ?self.session_id,
                            "kl2tpd reported data plane up before tunnel/session ids"
                        );
                        None
                    }
                }
            }
            LineKind::SessionClosed | LineKind::TunnelClosed => {
                if !self.established {
                    return None;
                }
                self.established = false;
                Some(LogTransition::Down {
                    tunnel_id: self.tunnel_id.unwrap_or(0),
                    session_id: self.session_id.unwrap_or(0),
                })
            }
        }
    }
}
