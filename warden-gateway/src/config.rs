// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::path::PathBuf;

use serde::Deserialize;
use warden_policy_engine::{AdmissionConfig, ConfigError, FailSafeMode, StartupMode};

/// Configuration loaded from environment variables.
///
/// All configuration is externalized to support 12-factor app deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 8443)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty" (default: json)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Directory holding one policy per YAML file (default: /etc/warden/policies)
    #[serde(default = "default_policy_dir")]
    pub policy_dir: PathBuf,

    /// How often the policy directory is scanned for changes, in seconds (default: 5)
    #[serde(default = "default_policy_watch_interval")]
    pub policy_watch_interval_secs: u64,

    /// Full reload interval in seconds, regardless of detected changes (default: 30)
    #[serde(default = "default_reload_poll_interval")]
    pub reload_poll_interval_secs: u64,

    /// Hard evaluation deadline in milliseconds (default: 2000)
    #[serde(default = "default_evaluation_deadline")]
    pub evaluation_deadline_ms: u64,

    /// "allow" or "deny" (default: deny)
    #[serde(default = "default_fail_safe_mode")]
    pub fail_safe_mode: String,

    /// "failOpen" or "failClosed" (default: failClosed)
    #[serde(default = "default_startup_mode")]
    pub startup_mode: String,

    /// Maximum simultaneously in-flight evaluations (default: 64)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Violation webhook; events are only logged when unset
    #[serde(default)]
    pub notifier_url: Option<String>,

    /// Violation webhook timeout in seconds (default: 5)
    #[serde(default = "default_notifier_timeout")]
    pub notifier_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_policy_dir() -> PathBuf {
    PathBuf::from("/etc/warden/policies")
}

fn default_policy_watch_interval() -> u64 {
    5
}

fn default_reload_poll_interval() -> u64 {
    30
}

fn default_evaluation_deadline() -> u64 {
    2000
}

fn default_fail_safe_mode() -> String {
    "deny".to_string()
}

fn default_startup_mode() -> String {
    "failClosed".to_string()
}

fn default_max_in_flight() -> usize {
    64
}

fn default_notifier_timeout() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are uppercase with underscore separators.
    /// Example: `POLICY_DIR`, `FAIL_SAFE_MODE`, etc.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Decision pipeline settings derived from the environment
    pub fn admission(&self) -> Result<AdmissionConfig, ConfigError> {
        let config = AdmissionConfig {
            evaluation_deadline_ms: self.evaluation_deadline_ms,
            fail_safe_mode: self.fail_safe_mode.parse::<FailSafeMode>()?,
            max_in_flight: self.max_in_flight,
            reload_poll_interval_secs: self.reload_poll_interval_secs,
            startup_mode: self.startup_mode.parse::<StartupMode>()?,
            ..AdmissionConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
