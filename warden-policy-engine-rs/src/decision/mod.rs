// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Decision Synthesizer
//!
//! Aggregates per-policy verdicts into one admission decision:
//! 1. Verdicts are stable-sorted by policy identifier (then version)
//! 2. Error outcomes are resolved by the fail-safe mode
//! 3. Any deny wins; warnings survive only on allowed decisions
//!
//! Identical verdict sets always produce identical decisions.

pub mod event;
pub mod notifier;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::admission::response::MALFORMED_CODE;
use crate::admission::{AdmissionResponse, ResponseBuilder};
use crate::config::FailSafeMode;
use crate::policy::{Outcome, Verdict};

pub use event::{ViolationDeduplicator, ViolationEvent};
pub use notifier::{DispatchStats, LogNotifier, Notifier, NotifyError, ViolationDispatcher};

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCause {
    /// Derived from policy verdicts
    Evaluated,
    /// Evaluation did not finish within the deadline
    DeadlineExceeded,
    /// Too many evaluations already in flight
    Overloaded,
    /// The request body could not be decoded
    MalformedRequest,
    /// The evaluation task itself failed
    EvaluatorCrashed,
}

impl DecisionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCause::Evaluated => "evaluated",
            DecisionCause::DeadlineExceeded => "deadline_exceeded",
            DecisionCause::Overloaded => "overloaded",
            DecisionCause::MalformedRequest => "malformed_request",
            DecisionCause::EvaluatorCrashed => "evaluator_crashed",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            DecisionCause::Evaluated => "request evaluated",
            DecisionCause::DeadlineExceeded => "policy evaluation exceeded its deadline",
            DecisionCause::Overloaded => "too many admission requests in flight",
            DecisionCause::MalformedRequest => "malformed admission request",
            DecisionCause::EvaluatorCrashed => "policy evaluation aborted unexpectedly",
        }
    }
}

impl fmt::Display for DecisionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate admission result for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// Denial messages, `[<policy-id>] <message>`, ordered by policy id
    pub messages: Vec<String>,
    /// Warnings, same format and ordering
    pub warnings: Vec<String>,
    pub denied_by: Vec<String>,
    pub warned_by: Vec<String>,
    pub errored: Vec<String>,
    pub cause: DecisionCause,
    /// Generation of the policy set the decision was derived from
    pub generation: u64,
}

impl AdmissionDecision {
    fn empty(cause: DecisionCause, generation: u64) -> Self {
        Self {
            allowed: true,
            messages: Vec::new(),
            warnings: Vec::new(),
            denied_by: Vec::new(),
            warned_by: Vec::new(),
            errored: Vec::new(),
            cause,
            generation,
        }
    }

    /// A clean allow: admitted with nothing to report
    pub fn is_clean(&self) -> bool {
        self.allowed && self.warnings.is_empty()
    }

    /// Decision taken without policy verdicts, resolved by the fail-safe mode
    pub fn fail_safe(cause: DecisionCause, mode: FailSafeMode, generation: u64) -> Self {
        let mut decision = Self::empty(cause, generation);
        let text = format!("{} (failSafeMode={})", cause.describe(), mode);
        if mode.allows_requests() {
            decision.warnings.push(text);
        } else {
            decision.allowed = false;
            decision.messages.push(text);
        }
        decision
    }

    /// Undecodable requests are always denied
    pub fn malformed(detail: &str) -> Self {
        let mut decision = Self::empty(DecisionCause::MalformedRequest, 0);
        decision.allowed = false;
        decision
            .messages
            .push(format!("{}: {}", DecisionCause::MalformedRequest.describe(), detail));
        decision
    }

    /// Messages joined into the wire message
    pub fn message(&self) -> Option<String> {
        if !self.allowed {
            Some(self.messages.join("; "))
        } else if !self.warnings.is_empty() {
            Some(self.warnings.join("; "))
        } else {
            None
        }
    }

    /// Wire response echoing the request uid
    pub fn to_response(&self, uid: &str) -> AdmissionResponse {
        let mut builder = ResponseBuilder::new(uid);
        if !self.allowed {
            builder = builder.deny();
        }
        if self.cause == DecisionCause::MalformedRequest {
            builder = builder.code(MALFORMED_CODE);
        }
        for message in &self.messages {
            builder = builder.message(message.as_str());
        }
        for warning in &self.warnings {
            builder = builder.warning(warning.as_str());
        }
        builder.build()
    }
}

/// Aggregate verdicts into a decision. Any deny wins.
pub fn synthesize(verdicts: &[Verdict], fail_safe: FailSafeMode, generation: u64) -> AdmissionDecision {
    let mut ordered: Vec<&Verdict> = verdicts.iter().collect();
    ordered.sort_by(|a, b| {
        a.policy_id
            .cmp(&b.policy_id)
            .then_with(|| a.policy_version.cmp(&b.policy_version))
    });

    let mut decision = AdmissionDecision::empty(DecisionCause::Evaluated, generation);

    for verdict in ordered {
        let id = &verdict.policy_id;
        let rendered = verdict.messages.iter().map(|m| format!("[{}] {}", id, m));

        match verdict.outcome {
            Outcome::Allow => {}
            Outcome::Deny => {
                decision.allowed = false;
                decision.denied_by.push(id.clone());
                decision.messages.extend(rendered);
            }
            Outcome::Warn => {
                decision.warned_by.push(id.clone());
                decision.warnings.extend(rendered);
            }
            Outcome::Error => {
                decision.errored.push(id.clone());
                if fail_safe.allows_requests() {
                    decision.warnings.extend(rendered);
                } else {
                    decision.allowed = false;
                    decision.denied_by.push(id.clone());
                    decision.messages.extend(rendered);
                }
            }
        }
    }

    decision
}
