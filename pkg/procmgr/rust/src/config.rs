// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::relay::DEFAULT_RELAY_CAPACITY;
use crate::transport::default_socket_path;
use anyhow::{Context, Result, bail};
use log::{LevelFilter, debug};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DD_PROCMUX_CONFIG";
pub const SOCKET_ENV: &str = "DD_PROCMUX_SOCKET";

fn default_log_level() -> String {
    "info".to_string()
}

fn default_relay_capacity() -> usize {
    DEFAULT_RELAY_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Queue length of each relay subscriber.
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
            relay_capacity: default_relay_capacity(),
        }
    }
}

impl ServiceConfig {
    /// Build the service configuration: the YAML file named by `file` (or
    /// `DD_PROCMUX_CONFIG`) if any, then `DD_PROCMUX_SOCKET`, then `socket`.
    pub fn load(file: Option<&Path>, socket: Option<PathBuf>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(path) => parse_config(&path)?,
            None => {
                debug!("no configuration file, using defaults");
                Self::default()
            }
        };

        if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(path) = socket {
            config.socket_path = path;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay_capacity == 0 {
            bail!("relay_capacity must be at least 1");
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .trim()
            .parse()
            .with_context(|| format!("invalid log_level {:?}", self.log_level))
    }
}

fn parse_config(path: &Path) -> Result<ServiceConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: ServiceConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procmux.yaml");
        let yaml = r#"
socket_path: /run/procmux/control.sock
log_level: debug
relay_capacity: 32
"#;
        fs::write(&path, yaml).unwrap();

        let cfg = parse_config(&path).unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/run/procmux/control.sock"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.relay_capacity, 32);
        assert_eq!(cfg.level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn test_parse_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procmux.yaml");
        fs::write(&path, "log_level: warn\n").unwrap();

        let cfg = parse_config(&path).unwrap();
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.relay_capacity, DEFAULT_RELAY_CAPACITY);
        assert_eq!(cfg.socket_path, default_socket_path());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procmux.yaml");
        fs::write(&path, "sockt_path: /tmp/x.sock\n").unwrap();
        assert!(parse_config(&path).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procmux.yaml");
        fs::write(&path, "not: valid: yaml: [").unwrap();
        assert!(parse_config(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(parse_config(Path::new("/nonexistent/procmux.yaml")).is_err());
    }

    #[test]
    fn test_cli_socket_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procmux.yaml");
        fs::write(&path, "socket_path: /from/file.sock\n").unwrap();

        let cfg = ServiceConfig::load(Some(&path), Some(PathBuf::from("/from/cli.sock"))).unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/from/cli.sock"));
    }

    #[test]
    fn test_validation() {
        let cfg = ServiceConfig {
            relay_capacity: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = ServiceConfig {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        assert!(ServiceConfig::default().validate().is_ok());
    }
}
