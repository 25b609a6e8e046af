use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::admission::AdmissionRequest;
use crate::config::StartupMode;
use crate::policy::config::{PolicyDefinition, Severity};
use crate::policy::interpreter::{EvaluationInput, Interpreter};
use crate::policy::rule::Rule;
use crate::policy::selector::TargetSelector;
use crate::policy::verdict::{EvaluationFault, Outcome, Verdict};

/// Policy identifier carried by the synthetic fail-closed verdict
pub const BOOTSTRAP_POLICY_ID: &str = "_bootstrap";

/// Errors that can occur while compiling a policy definition
#[derive(Debug, Error)]
pub enum PolicyCompileError {
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Invalid policy configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Dry run failed: {0}")]
    DryRun(String),
}

/// A compiled policy ready for evaluation
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub version: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub enabled: bool,
    pub selector: TargetSelector,
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Parse and compile one policy definition
    pub fn compile(id: &str, version: &str, definition: &str) -> Result<Self, PolicyCompileError> {
        let def = PolicyDefinition::from_yaml(definition)?;
        Self::from_definition(id, version, &def)
    }

    pub fn from_definition(
        id: &str,
        version: &str,
        def: &PolicyDefinition,
    ) -> Result<Self, PolicyCompileError> {
        if id.trim().is_empty() {
            return Err(PolicyCompileError::InvalidConfig(
                "policy identifier must not be empty".to_string(),
            ));
        }

        let rules = def
            .rules
            .iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.to_string(),
            version: version.to_string(),
            description: def.description.clone(),
            severity: def.severity,
            enabled: def.enabled,
            selector: TargetSelector::from(&def.target),
            rules,
        })
    }

    /// Semantic dry run against a synthetic empty request.
    ///
    /// Every referenced path is resolved once, so unknown roots are caught
    /// even behind branches the empty object never reaches.
    pub fn validate(&self) -> Result<(), PolicyCompileError> {
        let request = AdmissionRequest::synthetic();
        let input = EvaluationInput::new(&request);

        for rule in &self.rules {
            for path in rule.paths() {
                path.resolve(&Value::Null, &input)
                    .map_err(|fault| PolicyCompileError::DryRun(fault.to_string()))?;
            }
        }

        Interpreter::default()
            .violations(self, &input, &CancelFlag::new())
            .map(|_| ())
            .map_err(|fault| PolicyCompileError::DryRun(fault.to_string()))
    }

    /// Check if this policy applies to the given request
    pub fn matches(&self, request: &AdmissionRequest) -> bool {
        self.enabled && self.selector.matches(request)
    }
}

/// Where a policy set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOrigin {
    Loaded,
    Bootstrap(StartupMode),
}

/// Immutable, versioned collection of compiled policies
#[derive(Debug)]
pub struct PolicySet {
    generation: u64,
    policies: Vec<Policy>,
    origin: SetOrigin,
    loaded_at: DateTime<Utc>,
}

impl PolicySet {
    /// Published policy set; policies are ordered by identifier
    pub fn new(generation: u64, mut policies: Vec<Policy>) -> Self {
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            generation,
            policies,
            origin: SetOrigin::Loaded,
            loaded_at: Utc::now(),
        }
    }

    /// Placeholder set enforced until the first successful load
    pub fn bootstrap(mode: StartupMode) -> Self {
        Self {
            generation: 0,
            policies: Vec::new(),
            origin: SetOrigin::Bootstrap(mode),
            loaded_at: Utc::now(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.policies
            .binary_search_by(|p| p.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.policies[idx])
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn origin(&self) -> SetOrigin {
        self.origin
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self.origin, SetOrigin::Bootstrap(_))
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Enabled policies whose selector matches the request, in identifier order
    pub fn matching<'a>(
        &'a self,
        request: &'a AdmissionRequest,
    ) -> impl Iterator<Item = &'a Policy> + 'a {
        self.policies.iter().filter(move |p| p.matches(request))
    }

    /// The synthetic deny-all verdict of a fail-closed bootstrap set
    pub fn bootstrap_verdict(&self) -> Option<Verdict> {
        match self.origin {
            SetOrigin::Bootstrap(StartupMode::FailClosed) => Some(Verdict {
                policy_id: BOOTSTRAP_POLICY_ID.to_string(),
                policy_version: "0".to_string(),
                outcome: Outcome::Deny,
                messages: vec![
                    "no policy set has been loaded; all requests are rejected (startupMode=failClosed)"
                        .to_string(),
                ],
            }),
            _ => None,
        }
    }
}

/// Cooperative cancellation signal shared with in-flight evaluation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Evaluates one policy against one request.
///
/// Implementations must be pure with respect to the request: the same
/// (policy, input) pair always yields the same verdict.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, policy: &Policy, input: &EvaluationInput<'_>, cancel: &CancelFlag) -> Verdict;
}

/// Evaluates a request against every matching policy of a snapshot
#[derive(Clone)]
pub struct EvaluationEngine {
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl EvaluationEngine {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Engine backed by the in-process interpreter
    pub fn interpreted(max_steps: u64) -> Self {
        Self::new(Arc::new(Interpreter::new(max_steps)))
    }

    /// One verdict per matching policy, in policy identifier order.
    ///
    /// A fault or panic in one policy becomes an error verdict for that policy
    /// only; evaluation continues with the rest.
    pub fn evaluate(
        &self,
        request: &AdmissionRequest,
        snapshot: &PolicySet,
        cancel: &CancelFlag,
    ) -> Vec<Verdict> {
        if let Some(verdict) = snapshot.bootstrap_verdict() {
            return vec![verdict];
        }

        let input = EvaluationInput::new(request);

        snapshot
            .matching(request)
            .map(|policy| {
                let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.evaluator.evaluate(policy, &input, cancel)
                }))
                .unwrap_or_else(|payload| {
                    Verdict::fault(policy, &EvaluationFault::Panicked(panic_message(&*payload)))
                });

                if verdict.outcome == Outcome::Error {
                    warn!(
                        uid = %request.uid,
                        policy = %policy.id,
                        version = %policy.version,
                        error = %verdict.message(),
                        "Policy evaluation faulted"
                    );
                }
                verdict
            })
            .collect()
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new(Arc::new(Interpreter::default()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
