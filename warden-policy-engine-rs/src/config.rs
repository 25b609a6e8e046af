// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Admission Configuration
//!
//! Operator-set knobs for the decision pipeline. Fail-safe and startup
//! behaviour are explicit values, never hardcoded:
//! - `failSafeMode`: how errors, deadline expiry and overload resolve
//! - `startupMode`: what is enforced before any policy has ever loaded

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Fail-safe Mode
// =============================================================================

/// Resolution applied when a decision cannot be derived from the policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailSafeMode {
    /// Admit the request and attach a warning (fail-open)
    Allow,

    /// Reject the request (fail-closed)
    #[default]
    Deny,
}

impl FailSafeMode {
    /// Whether requests are admitted under this mode.
    pub fn allows_requests(&self) -> bool {
        matches!(self, FailSafeMode::Allow)
    }
}

impl FromStr for FailSafeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" | "fail-open" | "fail_open" | "failopen" => Ok(FailSafeMode::Allow),
            "deny" | "fail-closed" | "fail_closed" | "failclosed" => Ok(FailSafeMode::Deny),
            other => Err(ConfigError::UnknownValue {
                option: "failSafeMode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FailSafeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailSafeMode::Allow => write!(f, "allow"),
            FailSafeMode::Deny => write!(f, "deny"),
        }
    }
}

// =============================================================================
// Startup Mode
// =============================================================================

/// What is enforced while no policy set has ever been loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StartupMode {
    /// Empty policy set; everything is admitted
    #[serde(alias = "fail_open", alias = "fail-open")]
    FailOpen,

    /// Synthetic deny-all set; everything is rejected
    #[default]
    #[serde(alias = "fail_closed", alias = "fail-closed")]
    FailClosed,
}

impl StartupMode {
    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            StartupMode::FailOpen => "Admit all requests until policies load",
            StartupMode::FailClosed => "Reject all requests until policies load",
        }
    }
}

impl FromStr for StartupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "failopen" | "fail-open" | "fail_open" | "allow" => Ok(StartupMode::FailOpen),
            "failclosed" | "fail-closed" | "fail_closed" | "deny" => Ok(StartupMode::FailClosed),
            other => Err(ConfigError::UnknownValue {
                option: "startupMode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupMode::FailOpen => write!(f, "failOpen"),
            StartupMode::FailClosed => write!(f, "failClosed"),
        }
    }
}

// =============================================================================
// Admission Config
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown value '{value}' for {option}")]
    UnknownValue { option: &'static str, value: String },

    #[error("Invalid value for {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: &'static str,
    },
}

/// Static configuration of the decision pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionConfig {
    /// Hard evaluation deadline in milliseconds (default: 2000)
    #[serde(rename = "evaluationDeadline", default = "default_evaluation_deadline")]
    pub evaluation_deadline_ms: u64,

    /// Resolution of errors, deadline expiry and overload (default: deny)
    #[serde(default)]
    pub fail_safe_mode: FailSafeMode,

    /// Maximum simultaneously in-flight evaluations (default: 64)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Policy source poll interval in seconds (default: 30)
    #[serde(rename = "reloadPollInterval", default = "default_reload_poll_interval")]
    pub reload_poll_interval_secs: u64,

    /// Behaviour before the first successful load (default: failClosed)
    #[serde(default)]
    pub startup_mode: StartupMode,

    /// Interpreter step budget per policy evaluation (default: 100000)
    #[serde(default = "default_max_evaluation_steps")]
    pub max_evaluation_steps: u64,

    /// Fraction of a reload batch that must compile for it to publish (default: 0.5)
    #[serde(default = "default_min_valid_policy_ratio")]
    pub min_valid_policy_ratio: f64,

    /// Capacity of the violation notification queue (default: 1024)
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,

    /// Retention of delivered request identifiers in seconds (default: 600)
    #[serde(rename = "dedupTtl", default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,

    /// Maximum remembered request identifiers (default: 10000)
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_evaluation_deadline() -> u64 {
    2000
}

fn default_max_in_flight() -> usize {
    64
}

fn default_reload_poll_interval() -> u64 {
    30
}

fn default_max_evaluation_steps() -> u64 {
    100_000
}

fn default_min_valid_policy_ratio() -> f64 {
    0.5
}

fn default_notification_buffer() -> usize {
    1024
}

fn default_dedup_ttl() -> u64 {
    600
}

fn default_dedup_capacity() -> usize {
    10_000
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            evaluation_deadline_ms: default_evaluation_deadline(),
            fail_safe_mode: FailSafeMode::default(),
            max_in_flight: default_max_in_flight(),
            reload_poll_interval_secs: default_reload_poll_interval(),
            startup_mode: StartupMode::default(),
            max_evaluation_steps: default_max_evaluation_steps(),
            min_valid_policy_ratio: default_min_valid_policy_ratio(),
            notification_buffer: default_notification_buffer(),
            dedup_ttl_secs: default_dedup_ttl(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl AdmissionConfig {
    /// Parse and validate a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_deadline_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "evaluationDeadline",
                reason: "must be greater than zero",
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                option: "maxInFlight",
                reason: "must be greater than zero",
            });
        }
        if self.reload_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                option: "reloadPollInterval",
                reason: "must be greater than zero",
            });
        }
        if self.max_evaluation_steps == 0 {
            return Err(ConfigError::Invalid {
                option: "maxEvaluationSteps",
                reason: "must be greater than zero",
            });
        }
        if !(0.0..=1.0).contains(&self.min_valid_policy_ratio) {
            return Err(ConfigError::Invalid {
                option: "minValidPolicyRatio",
                reason: "must be between 0 and 1",
            });
        }
        if self.notification_buffer == 0 {
            return Err(ConfigError::Invalid {
                option: "notificationBuffer",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn evaluation_deadline(&self) -> Duration {
        Duration::from_millis(self.evaluation_deadline_ms)
    }

    pub fn reload_poll_interval(&self) -> Duration {
        Duration::from_secs(self.reload_poll_interval_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}
