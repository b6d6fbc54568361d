//! Service-Name resolution

use crate::{Error, Result};

/// Service names the AC accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNames {
    names: Vec<String>,
}

impl ServiceNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !list.contains(&name) {
                list.push(name);
            }
        }
        Self { names: list }
    }

    /// Resolve a requested Service-Name. The empty name is a wildcard and
    /// resolves to itself; anything else must be configured.
    pub fn resolve(&self, requested: &str) -> Result<String> {
        if requested.is_empty() || self.contains(requested) {
            return Ok(requested.to_string());
        }
        Err(Error::ServiceUnavailable {
            name: requested.to_string(),
        })
    }

    /// Resolve a Service-Name tag value as received on the wire
    pub fn resolve_bytes(&self, requested: &[u8]) -> Result<String> {
        match std::str::from_utf8(requested) {
            Ok(name) => self.resolve(name),
            Err(_) => Err(Error::ServiceUnavailable {
                name: String::from_utf8_lossy(requested).into_owned(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
