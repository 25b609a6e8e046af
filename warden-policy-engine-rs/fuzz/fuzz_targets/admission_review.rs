#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_policy_engine::admission::AdmissionReview;
use warden_policy_engine::{evaluate_request, FailSafeMode};

const POLICIES: [(&str, &str); 2] = [
    (
        "disallow-privileged",
        r#"
rules:
  - message: "Privileged containers are not allowed."
    foreach: spec.containers
    when:
      field: securityContext.privileged
      operator: eq
      value: true
"#,
    ),
    (
        "owner",
        r#"
rules:
  - message: "{{ $request.userInfo.username }} left {{ metadata.name }} without an owner"
    when:
      every: metadata.ownerReferences
      where:
        field: controller
        operator: neq
        value: true
"#,
    ),
];

fuzz_target!(|data: &[u8]| {
    // Undecodable bodies are answered by the listener; decodable ones must evaluate
    let review = match serde_json::from_slice::<AdmissionReview>(data) {
        Ok(review) => review,
        Err(_) => return,
    };

    if let Some(request) = review.request {
        let decision = evaluate_request(&POLICIES, &request, FailSafeMode::Deny).expect("valid policies");
        let _ = decision.to_response(&request.uid);
    }
});
