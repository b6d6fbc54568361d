//! Configuration validation

use super::Config;
use std::collections::HashSet;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn log_diagnostics(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        for e in &self.errors {
            error!("{}", e);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_identity(config, &mut result);
    validate_services(config, &mut result);
    validate_lns(config, &mut result);
    validate_routes(config, &mut result);

    result
}

fn validate_identity(config: &Config, result: &mut ValidationResult) {
    if config.interface_name.trim().is_empty() {
        result.error("interface_name: must not be empty");
    }

    if config.ac_name.is_empty() {
        result.warn("ac_name: empty, PADO will carry an empty AC-Name tag");
    }
}

fn validate_services(config: &Config, result: &mut ValidationResult) {
    if config.services.is_empty() {
        result.error("services: at least one service name is required");
        return;
    }

    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if service.is_empty() {
            result.error(format!(
                "services[{}]: empty service name (an empty request already matches any service)",
                i
            ));
        } else if !seen.insert(service.as_str()) {
            result.warn(format!("services[{}]: duplicate service {:?}", i, service));
        }
    }
}

fn validate_lns(config: &Config, result: &mut ValidationResult) {
    match config.lns_ipaddr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            if port.parse::<u16>().is_err() {
                result.error(format!(
                    "lns_ipaddr: invalid port {:?} in {:?}",
                    port, config.lns_ipaddr
                ));
            }
        }
        _ => result.error(format!(
            "lns_ipaddr: expected host:port, got {:?}",
            config.lns_ipaddr
        )),
    }
}

fn validate_routes(config: &Config, result: &mut ValidationResult) {
    if config.route_helper.is_none() {
        result.warn("route_helper: not set, kernel routes will not be installed");
    }
}
