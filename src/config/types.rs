//! Configuration types

use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_AC_NAME: &str = "kpppoed";
pub const DEFAULT_KL2TPD_PATH: &str = "kl2tpd";

/// Daemon configuration (kpppoed.toml)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name advertised in the AC-Name tag
    #[serde(default = "default_ac_name")]
    pub ac_name: String,
    /// Interface PPPoE discovery runs on
    pub interface_name: String,
    /// Accepted service names
    pub services: Vec<String>,
    /// LNS address, "host:port"
    pub lns_ipaddr: String,
    /// kl2tpd executable
    #[serde(default = "default_kl2tpd_path")]
    pub kl2tpd_path: PathBuf,
    /// Where generated kl2tpd configuration files are written
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,
    /// Program that installs and removes kernel PPPoE/L2TP routes
    #[serde(default)]
    pub route_helper: Option<PathBuf>,
}

fn default_ac_name() -> String {
    DEFAULT_AC_NAME.to_string()
}

fn default_kl2tpd_path() -> PathBuf {
    PathBuf::from(DEFAULT_KL2TPD_PATH)
}

impl Config {
    /// Directory for generated kl2tpd configuration files
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
