//! Warden Policy Engine - admission decisions for cluster resource requests
//!
//! This crate decides, before persistence, whether an admission request
//! complies with administrator-defined policies written in YAML. It holds a
//! hot-reloadable policy store, an iterative rule interpreter, the decision
//! synthesizer and the request listener that drives them under a deadline.
//!
//! # Example
//!
//! ```rust
//! use warden_policy_engine::admission::{AdmissionRequest, GroupVersionKind, Operation};
//! use warden_policy_engine::{evaluate_request, FailSafeMode};
//! use serde_json::json;
//!
//! let policy = r#"
//! match:
//!   kinds: ["Pod"]
//! rules:
//!   - message: "Privileged containers are not allowed."
//!     foreach: spec.containers
//!     when:
//!       field: securityContext.privileged
//!       operator: eq
//!       value: true
//! "#;
//!
//! let request = AdmissionRequest::new("uid-1", GroupVersionKind::new("", "v1", "Pod"), Operation::Create)
//!     .with_object(json!({"spec": {"containers": [{"securityContext": {"privileged": true}}]}}));
//!
//! let decision = evaluate_request(&[("disallow-privileged", policy)], &request, FailSafeMode::Deny).unwrap();
//! assert!(!decision.allowed);
//! ```

pub mod admission;
pub mod config;
pub mod decision;
pub mod listener;
pub mod observe;
pub mod policy;
pub mod store;

// Re-export commonly used types at the crate root
pub use admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
pub use config::{AdmissionConfig, ConfigError, FailSafeMode, StartupMode};
pub use decision::{AdmissionDecision, DecisionCause, Notifier, ViolationEvent};
pub use listener::AdmissionListener;
pub use observe::{AdmissionObserver, DecisionRecord, ReloadRecord, TracingObserver};
pub use policy::{EvaluationEngine, Policy, PolicyCompileError, PolicySet, Verdict};
pub use store::{InMemoryPolicySource, PolicySource, PolicyStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Evaluate one request against policies given as `(id, yaml)` pairs
///
/// This is a convenience function for simple use cases. Each policy is
/// compiled and dry-run; the first invalid definition is returned as an error.
///
/// # Example
///
/// ```rust
/// use warden_policy_engine::admission::{AdmissionRequest, GroupVersionKind, Operation};
/// use warden_policy_engine::{evaluate_request, FailSafeMode};
///
/// let request = AdmissionRequest::new("uid", GroupVersionKind::new("", "v1", "Pod"), Operation::Create);
/// let decision = evaluate_request(&[("noop", "rules: []")], &request, FailSafeMode::Deny).unwrap();
/// assert!(decision.allowed);
/// ```
pub fn evaluate_request(
    policies: &[(&str, &str)],
    request: &AdmissionRequest,
    fail_safe: FailSafeMode,
) -> Result<AdmissionDecision, PolicyCompileError> {
    let compiled = policies
        .iter()
        .map(|(id, yaml)| {
            let policy = Policy::compile(id, "local", yaml)?;
            policy.validate()?;
            Ok::<_, PolicyCompileError>(policy)
        })
        .collect::<Result<Vec<_>, PolicyCompileError>>()?;

    let set = PolicySet::new(1, compiled);
    let verdicts = EvaluationEngine::default().evaluate(request, &set, &policy::CancelFlag::new());
    Ok(decision::synthesize(&verdicts, fail_safe, set.generation()))
}
