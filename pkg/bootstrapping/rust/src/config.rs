// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[cfg(not(windows))]
const DEFAULT_CONFIG_PATH: &str = "/etc/cmp/client.yaml";
#[cfg(windows)]
const DEFAULT_CONFIG_PATH: &str = r"C:\cmp\client.yaml";

#[cfg(not(windows))]
const DEFAULT_STATE_DIR: &str = "/var/lib/cmp/bootstrapping";
#[cfg(windows)]
const DEFAULT_STATE_DIR: &str = r"C:\cmp\bootstrapping";

const PID_FILE_NAME: &str = "bootstrapping.pid";
const LEDGER_FILE_NAME: &str = "applied-policyfiles.json";
const RUN_DIR_NAME: &str = "run";

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_chef_client() -> String {
    "chef-client".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Client certificate used to authenticate against the platform API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CertificateConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    #[serde(default)]
    pub ca: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub certificate: Option<CertificateConfig>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_chef_client")]
    pub chef_client: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            certificate: None,
            state_dir: default_state_dir(),
            chef_client: default_chef_client(),
            request_timeout_secs: default_request_timeout(),
            log_level: None,
        }
    }
}

impl ClientConfig {
    /// Load the configuration file. A missing file yields the defaults so
    /// that `stop` keeps working on hosts that were never fully configured.
    /// Runs before logging is set up, so it logs nothing itself.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ClientConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join(PID_FILE_NAME)
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE_NAME)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.state_dir.join(RUN_DIR_NAME)
    }
}

pub fn config_path() -> PathBuf {
    env::var("CMP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn parse_log_level(level: &str) -> log::Level {
    match level.to_lowercase().as_str() {
        "trace" => log::Level::Trace,
        "debug" => log::Level::Debug,
        "info" => log::Level::Info,
        "warn" | "warning" => log::Level::Warn,
        "error" | "critical" => log::Level::Error,
        _ => log::Level::Info,
    }
}

/// Priority: CMP_LOG_LEVEL > `log_level` in the config file > Info
pub fn log_level(config: &ClientConfig) -> log::Level {
    if let Ok(level) = env::var("CMP_LOG_LEVEL") {
        return parse_log_level(&level);
    }
    config
        .log_level
        .as_deref()
        .map(parse_log_level)
        .unwrap_or(log::Level::Info)
}
