// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::config::Severity;
use crate::policy::engine::Policy;

/// Outcome of one policy evaluated against one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Deny,
    Warn,
    Error,
}

/// A fault raised by a policy predicate during evaluation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationFault {
    #[error("unknown reference '${root}' in path '{path}'")]
    UnknownReference { root: String, path: String },

    #[error("cannot iterate over non-sequence value at '{path}'")]
    NotASequence { path: String },

    #[error("evaluation step budget of {budget} exhausted")]
    BudgetExhausted { budget: u64 },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("evaluator panicked: {0}")]
    Panicked(String),
}

/// Result of one policy against one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub policy_id: String,
    pub policy_version: String,
    pub outcome: Outcome,
    pub messages: Vec<String>,
}

impl Verdict {
    /// The policy derived no violation
    pub fn allow(policy: &Policy) -> Self {
        Self {
            policy_id: policy.id.clone(),
            policy_version: policy.version.clone(),
            outcome: Outcome::Allow,
            messages: Vec::new(),
        }
    }

    /// Outcome follows the policy severity when any message was derived
    pub fn from_messages(policy: &Policy, messages: Vec<String>) -> Self {
        if messages.is_empty() {
            return Self::allow(policy);
        }

        let outcome = match policy.severity {
            Severity::Deny => Outcome::Deny,
            Severity::Warn => Outcome::Warn,
        };

        Self {
            policy_id: policy.id.clone(),
            policy_version: policy.version.clone(),
            outcome,
            messages,
        }
    }

    /// The policy predicate faulted
    pub fn fault(policy: &Policy, fault: &EvaluationFault) -> Self {
        Self {
            policy_id: policy.id.clone(),
            policy_version: policy.version.clone(),
            outcome: Outcome::Error,
            messages: vec![format!("policy evaluation failed: {}", fault)],
        }
    }

    /// Messages joined into one human-readable line
    pub fn message(&self) -> String {
        self.messages.join("; ")
    }
}
