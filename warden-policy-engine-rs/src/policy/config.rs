// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::rule::Operator;

/// Severity a policy triggers when it derives a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Deny,
    Warn,
}

/// Definition of a single policy as written in the policy source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefinition {
    /// Informational; the source identifier is authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, rename = "match")]
    pub target: MatchDefinition,
    pub rules: Vec<RuleDefinition>,
}

/// Which requests a policy applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchDefinition {
    #[serde(default = "wildcard")]
    pub kinds: Vec<String>,
    #[serde(default = "wildcard")]
    pub groups: Vec<String>,
    #[serde(default = "wildcard")]
    pub versions: Vec<String>,
    #[serde(default = "wildcard")]
    pub operations: Vec<String>,
    #[serde(default = "wildcard")]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

impl Default for MatchDefinition {
    fn default() -> Self {
        Self {
            kinds: wildcard(),
            groups: wildcard(),
            versions: wildcard(),
            operations: wildcard(),
            namespaces: wildcard(),
            excluded_namespaces: Vec::new(),
        }
    }
}

/// One rule: a violation condition and the message it derives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub message: String,
    /// Evaluate the condition once per element of this sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,
    pub when: ExprDefinition,
}

/// Source form of a predicate expression.
///
/// Exactly one form must be present: `all`, `any`, `not`, a comparison
/// (`field` + `operator` [+ `value`]), or a quantifier (`some`/`every` +
/// `where`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExprDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<ExprDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<ExprDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ExprDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub some: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<String>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Box<ExprDefinition>>,
}

fn default_enabled() -> bool {
    true
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

impl PolicyDefinition {
    /// Parse a PolicyDefinition from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the PolicyDefinition to YAML string
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
