#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Map, Value};
use warden_policy_engine::admission::{AdmissionRequest, GroupVersionKind, Operation};
use warden_policy_engine::{evaluate_request, FailSafeMode};

const POLICIES: [(&str, &str); 2] = [
    (
        "limits",
        r#"
match:
  kinds: ["Pod"]
rules:
  - message: "Container {{ name }} has no limits"
    foreach: spec.containers
    when:
      any:
        - field: resources.limits.cpu
          operator: absent
        - field: resources.limits.memory
          operator: lte
          value: 0
"#,
    ),
    (
        "labels",
        r#"
rules:
  - message: "Team label {{ metadata.labels.team }} is not allowed"
    when:
      all:
        - field: metadata.labels.team
          operator: exists
        - not:
            field: metadata.labels.team
            operator: in
            value: ["payments", "search"]
"#,
    ),
];

#[derive(Arbitrary, Debug)]
struct FuzzContainer {
    name: Option<String>,
    cpu: Option<String>,
    memory: Option<i64>,
    scalar_resources: bool,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    kind: String,
    delete: bool,
    team: Option<String>,
    containers: Vec<FuzzContainer>,
    containers_as_scalar: bool,
}

fuzz_target!(|input: FuzzInput| {
    let containers: Vec<Value> = input
        .containers
        .iter()
        .map(|c| {
            let mut container = Map::new();
            if let Some(ref name) = c.name {
                container.insert("name".to_string(), json!(name));
            }
            let resources = if c.scalar_resources {
                json!("none")
            } else {
                json!({"limits": {"cpu": c.cpu, "memory": c.memory}})
            };
            container.insert("resources".to_string(), resources);
            Value::Object(container)
        })
        .collect();

    let spec = if input.containers_as_scalar {
        json!({"containers": 42})
    } else {
        json!({"containers": containers})
    };

    let operation = if input.delete { Operation::Delete } else { Operation::Create };
    let request = AdmissionRequest::new("fuzz", GroupVersionKind::new("", "v1", input.kind), operation)
        .with_object(json!({"metadata": {"labels": {"team": input.team}}, "spec": spec}));

    // Faults become error verdicts; evaluation itself must never panic
    let decision = evaluate_request(&POLICIES, &request, FailSafeMode::Allow).expect("valid policies");
    assert!(decision.allowed || !decision.denied_by.is_empty());
});
