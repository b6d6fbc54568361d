//! Configuration management
//!
//! Loads kpppoed.toml and checks it before the daemon starts.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Parse configuration from TOML text
pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
interface_name = "eth1"
services = ["svcA"]
lns_ipaddr = "10.0.0.1:1701"
"#
        )
        .unwrap();

        let config = load(file.path()).unwrap();
        assert_eq!(config.ac_name, DEFAULT_AC_NAME);
        assert_eq!(config.interface_name, "eth1");
        assert_eq!(config.services, vec!["svcA".to_string()]);
        assert_eq!(config.lns_ipaddr, "10.0.0.1:1701");
        assert_eq!(config.kl2tpd_path, Path::new(DEFAULT_KL2TPD_PATH));
        assert!(config.route_helper.is_none());
        assert_eq!(config.runtime_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_missing_required_field() {
        let err = parse(
            r#"
interface_name = "eth1"
lns_ipaddr = "10.0.0.1:1701"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = parse(
            r#"
ac_name = "one"
ac_name = "two"
interface_name = "eth1"
services = ["svcA"]
lns_ipaddr = "10.0.0.1:1701"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse(
            r#"
interface_name = "eth1"
services = ["svcA"]
lns_ipaddr = "10.0.0.1:1701"
lns_port = 1701
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
