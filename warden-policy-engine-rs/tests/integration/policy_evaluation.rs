use serde_json::{json, Value};
use warden_policy_engine::admission::{AdmissionRequest, GroupVersionKind, Operation};
use warden_policy_engine::policy::{CancelFlag, Outcome};
use warden_policy_engine::{
    evaluate_request, EvaluationEngine, FailSafeMode, Policy, PolicyCompileError, PolicySet,
};

const DISALLOW_PRIVILEGED: &str = include_str!("../fixtures/disallow-privileged.yaml");
const RESOURCE_LIMITS: &str = include_str!("../fixtures/resource-limits.yaml");
const REQUIRE_TEAM_LABEL: &str = include_str!("../fixtures/require-team-label.yaml");
const LATEST_TAG: &str = include_str!("../fixtures/latest-tag.yaml");

const ALL_FIXTURES: [(&str, &str); 4] = [
    ("disallow-privileged", DISALLOW_PRIVILEGED),
    ("resource-limits", RESOURCE_LIMITS),
    ("require-team-label", REQUIRE_TEAM_LABEL),
    ("latest-tag", LATEST_TAG),
];

fn pod(containers: Value) -> AdmissionRequest {
    AdmissionRequest::new("7b1c2f0e", GroupVersionKind::new("", "v1", "Pod"), Operation::Create)
        .with_namespace("payments")
        .with_name("web")
        .with_object(json!({
            "metadata": {"name": "web", "labels": {"team": "payments"}},
            "spec": {"containers": containers}
        }))
}

fn limited(name: &str) -> Value {
    json!({
        "name": name,
        "image": "registry.local/web:1.4.2",
        "resources": {"limits": {"cpu": "500m", "memory": "256Mi"}}
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_privileged_container_denied() {
    let mut container = limited("app");
    container["securityContext"] = json!({"privileged": true});

    let decision = evaluate_request(
        &[("disallow-privileged", DISALLOW_PRIVILEGED)],
        &pod(json!([container])),
        FailSafeMode::Deny,
    )
    .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.denied_by, vec!["disallow-privileged"]);
    assert!(decision
        .message()
        .unwrap()
        .contains("Privileged containers are not allowed."));
}

#[test]
fn test_unprivileged_container_allowed() {
    let mut container = limited("app");
    container["securityContext"] = json!({"privileged": false});

    let decision = evaluate_request(
        &[("disallow-privileged", DISALLOW_PRIVILEGED)],
        &pod(json!([container])),
        FailSafeMode::Deny,
    )
    .unwrap();

    assert!(decision.allowed);
    assert!(decision.is_clean());
}

#[test]
fn test_missing_resource_limits_denied() {
    let policies = [("resource-limits", RESOURCE_LIMITS)];

    let bare = pod(json!([{"name": "app", "image": "registry.local/web:1.4.2"}]));
    let decision = evaluate_request(&policies, &bare, FailSafeMode::Deny).unwrap();
    assert!(!decision.allowed);
    assert_eq!(
        decision.messages,
        vec!["[resource-limits] Container app must set resources.limits.cpu and resources.limits.memory."]
    );

    let complete = pod(json!([limited("app")]));
    let decision = evaluate_request(&policies, &complete, FailSafeMode::Deny).unwrap();
    assert!(decision.allowed);
}

#[test]
fn test_partial_resource_limits_denied_per_container() {
    let request = pod(json!([
        limited("app"),
        {"name": "sidecar", "resources": {"limits": {"cpu": "100m"}}},
        {"name": "init", "resources": {"limits": {"memory": "64Mi"}}}
    ]));

    let decision =
        evaluate_request(&[("resource-limits", RESOURCE_LIMITS)], &request, FailSafeMode::Deny).unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.messages.len(), 2);
    assert!(decision.messages[0].contains("Container sidecar"));
    assert!(decision.messages[1].contains("Container init"));
}

#[test]
fn test_multiple_violations_ordered_by_policy_id() {
    let mut container = json!({"name": "app"});
    container["securityContext"] = json!({"privileged": true});

    // Declared out of order on purpose
    let policies = [
        ("resource-limits", RESOURCE_LIMITS),
        ("disallow-privileged", DISALLOW_PRIVILEGED),
    ];
    let decision = evaluate_request(&policies, &pod(json!([container])), FailSafeMode::Deny).unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.denied_by, vec!["disallow-privileged", "resource-limits"]);
    assert_eq!(decision.messages.len(), 2);
    assert!(decision.messages[0].starts_with("[disallow-privileged] Privileged containers"));
    assert!(decision.messages[1].starts_with("[resource-limits] Container app"));
}

#[test]
fn test_fixture_set_on_compliant_pod() {
    let decision = evaluate_request(&ALL_FIXTURES, &pod(json!([limited("app")])), FailSafeMode::Deny).unwrap();

    assert!(decision.is_clean());
    assert!(decision.denied_by.is_empty());
    assert!(decision.warned_by.is_empty());
}

// =============================================================================
// Severity and selectors
// =============================================================================

#[test]
fn test_warn_severity_admits_with_warning() {
    let request = AdmissionRequest::new("uid-2", GroupVersionKind::new("apps", "v1", "Deployment"), Operation::Create)
        .with_namespace("payments")
        .with_object(json!({"metadata": {"name": "api", "labels": {}}}));

    let decision = evaluate_request(&ALL_FIXTURES, &request, FailSafeMode::Deny).unwrap();

    assert!(decision.allowed);
    assert!(!decision.is_clean());
    assert_eq!(decision.warned_by, vec!["require-team-label"]);
    assert_eq!(
        decision.warnings,
        vec!["[require-team-label] Deployment api has no team label."]
    );

    let response = decision.to_response("uid-2");
    assert!(response.allowed);
    assert_eq!(response.warnings.len(), 1);
}

#[test]
fn test_excluded_namespace_wildcard() {
    let mut container = json!({"name": "proxy"});
    container["securityContext"] = json!({"privileged": true});
    let request = pod(json!([container])).with_namespace("kube-system");

    let decision = evaluate_request(
        &[("disallow-privileged", DISALLOW_PRIVILEGED)],
        &request,
        FailSafeMode::Deny,
    )
    .unwrap();
    assert!(decision.allowed);
}

#[test]
fn test_operation_and_kind_filtering() {
    let mut container = json!({"name": "app"});
    container["securityContext"] = json!({"privileged": true});
    let policies = [("disallow-privileged", DISALLOW_PRIVILEGED)];

    let mut delete = pod(json!([container.clone()]));
    delete.operation = Operation::Delete;
    assert!(evaluate_request(&policies, &delete, FailSafeMode::Deny).unwrap().allowed);

    let mut job = pod(json!([container]));
    job.kind = GroupVersionKind::new("batch", "v1", "Job");
    assert!(evaluate_request(&policies, &job, FailSafeMode::Deny).unwrap().allowed);
}

#[test]
fn test_disabled_policy_not_evaluated() {
    let request = pod(json!([{
        "name": "app",
        "image": "registry.local/web:latest",
        "resources": {"limits": {"cpu": "1", "memory": "1Gi"}}
    }]));

    let decision = evaluate_request(&[("latest-tag", LATEST_TAG)], &request, FailSafeMode::Deny).unwrap();
    assert!(decision.is_clean());

    let enabled = LATEST_TAG.replace("enabled: false", "enabled: true");
    let decision = evaluate_request(&[("latest-tag", enabled.as_str())], &request, FailSafeMode::Deny).unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.messages, vec!["[latest-tag] Image tag 'latest' is not allowed."]);
}

// =============================================================================
// Absent values and faults
// =============================================================================

#[test]
fn test_absent_field_is_not_an_error() {
    let policy = r#"
rules:
  - message: "replicas above ten"
    when:
      field: spec.replicas
      operator: gt
      value: 10
"#;
    let request = AdmissionRequest::new("uid-3", GroupVersionKind::new("apps", "v1", "Deployment"), Operation::Update)
        .with_object(json!({"spec": {}}));

    let decision = evaluate_request(&[("replicas", policy)], &request, FailSafeMode::Deny).unwrap();
    assert!(decision.is_clean());
    assert!(decision.errored.is_empty());
}

#[test]
fn test_delete_without_object_compares_old_object() {
    let policy = r#"
match:
  operations: ["DELETE"]
rules:
  - message: "protected namespaces cannot be deleted"
    when:
      field: $oldObject.metadata.labels.protected
      operator: eq
      value: "true"
"#;
    let request = AdmissionRequest::new("uid-4", GroupVersionKind::new("", "v1", "Namespace"), Operation::Delete)
        .with_old_object(json!({"metadata": {"labels": {"protected": "true"}}}));

    let decision = evaluate_request(&[("protect", policy)], &request, FailSafeMode::Deny).unwrap();
    assert!(!decision.allowed);
}

#[test]
fn test_faulting_policy_isolated() {
    // `spec.containers` is a scalar here, which a quantifier cannot walk
    let faulty = r#"
rules:
  - message: "unreachable"
    foreach: spec.containers
    when:
      field: name
      operator: exists
"#;
    let request = AdmissionRequest::new("uid-5", GroupVersionKind::new("", "v1", "Pod"), Operation::Create)
        .with_object(json!({
            "metadata": {"name": "web", "labels": {"team": "payments"}},
            "spec": {"containers": "oops"}
        }));
    let policies = [("faulty", faulty), ("require-team-label", REQUIRE_TEAM_LABEL)];

    let denied = evaluate_request(&policies, &request, FailSafeMode::Deny).unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.errored, vec!["faulty"]);
    assert_eq!(denied.denied_by, vec!["faulty"]);

    let admitted = evaluate_request(&policies, &request, FailSafeMode::Allow).unwrap();
    assert!(admitted.allowed);
    assert_eq!(admitted.errored, vec!["faulty"]);
    assert!(admitted.denied_by.is_empty());
    assert_eq!(admitted.warnings.len(), 1);
    assert!(admitted.warnings[0].starts_with("[faulty] policy evaluation failed"));
}

#[test]
fn test_engine_verdicts_per_policy() {
    let policies = ALL_FIXTURES
        .iter()
        .map(|(id, yaml)| Policy::compile(id, "3", yaml).unwrap())
        .collect();
    let set = PolicySet::new(7, policies);

    let mut container = json!({"name": "app"});
    container["securityContext"] = json!({"privileged": true});
    let verdicts = EvaluationEngine::default().evaluate(&pod(json!([container])), &set, &CancelFlag::new());

    // The disabled fixture is skipped; the rest come back in identifier order
    let summary: Vec<(&str, Outcome)> = verdicts
        .iter()
        .map(|v| (v.policy_id.as_str(), v.outcome))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("disallow-privileged", Outcome::Deny),
            ("require-team-label", Outcome::Allow),
            ("resource-limits", Outcome::Deny),
        ]
    );
    assert!(verdicts.iter().all(|v| v.policy_version == "3"));
}

#[test]
fn test_decision_is_deterministic() {
    let mut container = json!({"name": "app"});
    container["securityContext"] = json!({"privileged": true});
    let request = pod(json!([container, {"name": "sidecar"}]));

    let first = evaluate_request(&ALL_FIXTURES, &request, FailSafeMode::Deny).unwrap();
    for _ in 0..10 {
        let again = evaluate_request(&ALL_FIXTURES, &request, FailSafeMode::Deny).unwrap();
        assert_eq!(first, again);
    }
}

// =============================================================================
// Compile-time rejection
// =============================================================================

#[test]
fn test_invalid_definitions_rejected() {
    let request = pod(json!([]));

    let bad_regex = r#"
rules:
  - message: "bad"
    when:
      field: image
      operator: matches
      value: "(unclosed"
"#;
    assert!(matches!(
        evaluate_request(&[("bad", bad_regex)], &request, FailSafeMode::Deny),
        Err(PolicyCompileError::InvalidRegex { .. })
    ));

    let unknown_root = r#"
rules:
  - message: "bad"
    when:
      field: $params.limit
      operator: exists
"#;
    assert!(matches!(
        evaluate_request(&[("bad", unknown_root)], &request, FailSafeMode::Deny),
        Err(PolicyCompileError::DryRun(_))
    ));

    let non_numeric = r#"
rules:
  - message: "bad"
    when:
      field: spec.replicas
      operator: gt
      value: "three"
"#;
    assert!(matches!(
        evaluate_request(&[("bad", non_numeric)], &request, FailSafeMode::Deny),
        Err(PolicyCompileError::InvalidConfig(_))
    ));
}

#[test]
fn test_fixtures_compile_and_validate() {
    for (id, yaml) in ALL_FIXTURES {
        let policy = Policy::compile(id, "1", yaml).unwrap();
        policy.validate().unwrap();
        assert_eq!(policy.id, id);
    }
}
