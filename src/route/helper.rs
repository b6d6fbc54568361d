//! Route backend driving an external helper program
//!
//! The helper is invoked as
//! `<helper> add|del <tunnel_id> <session_id> <peer_session_id> <pppoe_session_id> <interface>`
//! and must exit 0 on success.

use super::{RouteKey, RouteManager};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct HelperRoutes {
    program: PathBuf,
}

impl HelperRoutes {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    async fn run(&self, action: &str, key: &RouteKey) -> Result<()> {
        debug!(helper = %self.program.display(), action, route = %key, "Running route helper");

        let output = Command::new(&self.program)
            .arg(action)
            .arg(key.tunnel_id.to_string())
            .arg(key.session_id.to_string())
            .arg(key.peer_session_id.to_string())
            .arg(key.pppoe_session_id.to_string())
            .arg(&key.interface)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Route(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Route(format!(
                "{} {} failed ({}): {}",
                self.program.display(),
                action,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl RouteManager for HelperRoutes {
    async fn add_route(&self, key: &RouteKey) -> Result<()> {
        self.run("add", key).await?;
        info!(route = %key, "Route installed");
        Ok(())
    }

    async fn del_route(&self, key: &RouteKey) -> Result<()> {
        self.run("del", key).await?;
        info!(route = %key, "Route removed");
        Ok(())
    }
}
