use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use serde_json::json;
use warden_policy_engine::admission::response::MALFORMED_CODE;
use warden_policy_engine::admission::{AdmissionRequest, AdmissionReview, GroupVersionKind, Operation};
use warden_policy_engine::decision::{NotifyError, ViolationEvent};
use warden_policy_engine::policy::{CancelFlag, EvaluationInput, PolicyEvaluator};
use warden_policy_engine::{
    AdmissionConfig, AdmissionListener, AdmissionObserver, DecisionCause, DecisionRecord,
    FailSafeMode, InMemoryPolicySource, Notifier, Policy, PolicyStore, ReloadRecord, StartupMode,
    Verdict,
};

const PRIVILEGED: &str = r#"
match:
  kinds: ["Pod"]
rules:
  - message: "Privileged containers are not allowed."
    foreach: spec.containers
    when:
      field: securityContext.privileged
      operator: eq
      value: true
"#;

fn versioned(marker: &str) -> String {
    format!(
        r#"
rules:
  - message: "{marker} first"
    when:
      field: metadata.name
      operator: exists
  - message: "{marker} second"
    when:
      field: metadata.name
      operator: exists
"#
    )
}

fn pod(uid: &str, privileged: bool) -> AdmissionRequest {
    AdmissionRequest::new(uid, GroupVersionKind::new("", "v1", "Pod"), Operation::Create)
        .with_namespace("default")
        .with_name("web")
        .with_object(json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{"name": "app", "securityContext": {"privileged": privileged}}]}
        }))
}

fn config() -> AdmissionConfig {
    AdmissionConfig {
        evaluation_deadline_ms: 200,
        ..AdmissionConfig::default()
    }
}

async fn loaded_store(source: Arc<InMemoryPolicySource>, config: &AdmissionConfig) -> Arc<PolicyStore> {
    let store = Arc::new(PolicyStore::new(source, config));
    store.reload().await.unwrap();
    store
}

#[derive(Default)]
struct CollectingNotifier {
    events: Mutex<Vec<ViolationEvent>>,
}

impl CollectingNotifier {
    fn events(&self) -> Vec<ViolationEvent> {
        self.events.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) {
        for _ in 0..200 {
            if self.events.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn deliver(&self, event: &ViolationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CollectingObserver {
    decisions: Mutex<Vec<DecisionRecord>>,
    reloads: Mutex<Vec<ReloadRecord>>,
}

impl AdmissionObserver for CollectingObserver {
    fn decision(&self, record: &DecisionRecord) {
        self.decisions.lock().unwrap().push(record.clone());
    }

    fn reload(&self, record: &ReloadRecord) {
        self.reloads.lock().unwrap().push(record.clone());
    }
}

/// Notifier that holds the first event until the gate opens
struct GatedNotifier {
    gate: Semaphore,
    holding: AtomicBool,
    inner: CollectingNotifier,
}

impl GatedNotifier {
    fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            holding: AtomicBool::new(false),
            inner: CollectingNotifier::default(),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Notifier for GatedNotifier {
    async fn deliver(&self, event: &ViolationEvent) -> Result<(), NotifyError> {
        self.holding.store(true, Ordering::SeqCst);
        let _pass = self
            .gate
            .acquire()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.inner.deliver(event).await
    }
}

/// Evaluator that keeps working until cancelled or `limit` elapses
struct SlowEvaluator {
    limit: Duration,
}

impl PolicyEvaluator for SlowEvaluator {
    fn evaluate(&self, policy: &Policy, _input: &EvaluationInput<'_>, cancel: &CancelFlag) -> Verdict {
        let started = Instant::now();
        while !cancel.is_cancelled() && started.elapsed() < self.limit {
            std::thread::sleep(Duration::from_millis(2));
        }
        Verdict::allow(policy)
    }
}

// =============================================================================
// Decisions
// =============================================================================

#[tokio::test]
async fn test_response_echoes_uid() {
    let config = config();
    let source = Arc::new(InMemoryPolicySource::new().with_policy("disallow-privileged", "1", PRIVILEGED));
    let listener = AdmissionListener::new(loaded_store(source, &config).await, &config);

    let review = AdmissionReview::for_request(pod("0f3c9a", true));
    let body = serde_json::to_vec(&review).unwrap();
    let answer = listener.admit_bytes(&body).await;

    let response = answer.response.unwrap();
    assert_eq!(response.uid, "0f3c9a");
    assert!(!response.allowed);
    assert!(response.message().unwrap().contains("Privileged containers are not allowed."));
    assert!(answer.request.is_none());
}

#[tokio::test]
async fn test_malformed_request_denied_with_uid() {
    let config = AdmissionConfig {
        fail_safe_mode: FailSafeMode::Allow,
        ..config()
    };
    let store = loaded_store(Arc::new(InMemoryPolicySource::new()), &config).await;
    let notifier = Arc::new(CollectingNotifier::default());
    let listener = AdmissionListener::new(store, &config).with_notifier(notifier.clone());

    let body = br#"{
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {"uid": "abc-123", "operation": "EXPLODE"}
    }"#;
    let response = listener.admit_bytes(body).await.response.unwrap();

    // Malformed input is never admitted, whatever the fail-safe mode
    assert_eq!(response.uid, "abc-123");
    assert!(!response.allowed);
    assert_eq!(response.status.as_ref().unwrap().code, MALFORMED_CODE);

    notifier.wait_for(1).await;
    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].decision.cause, DecisionCause::MalformedRequest);
}

#[tokio::test]
async fn test_review_without_request_denied() {
    let config = config();
    let store = loaded_store(Arc::new(InMemoryPolicySource::new()), &config).await;
    let listener = AdmissionListener::new(store, &config);

    let answer = listener
        .admit_bytes(br#"{"apiVersion": "admission.k8s.io/v1beta1", "kind": "AdmissionReview"}"#)
        .await;
    assert_eq!(answer.api_version, "admission.k8s.io/v1beta1");
    let response = answer.response.unwrap();
    assert_eq!(response.uid, "");
    assert!(!response.allowed);
}

#[tokio::test]
async fn test_startup_modes_before_first_load() {
    let source = Arc::new(InMemoryPolicySource::new().with_policy("disallow-privileged", "1", PRIVILEGED));

    let closed = AdmissionConfig {
        startup_mode: StartupMode::FailClosed,
        ..config()
    };
    let listener = AdmissionListener::new(Arc::new(PolicyStore::new(source.clone(), &closed)), &closed);
    let decision = listener.decide(Arc::new(pod("uid-closed", false))).await;
    assert!(!decision.allowed);
    assert_eq!(decision.generation, 0);
    assert_eq!(decision.denied_by, vec!["_bootstrap"]);

    let open = AdmissionConfig {
        startup_mode: StartupMode::FailOpen,
        ..config()
    };
    let listener = AdmissionListener::new(Arc::new(PolicyStore::new(source, &open)), &open);
    let decision = listener.decide(Arc::new(pod("uid-open", true))).await;
    assert!(decision.allowed);
    assert!(decision.is_clean());

    // The first successful load replaces the bootstrap set
    listener.store().reload().await.unwrap();
    let decision = listener.decide(Arc::new(pod("uid-loaded", true))).await;
    assert!(!decision.allowed);
    assert_eq!(decision.generation, 1);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_violation_notified_once_per_uid() {
    let config = config();
    let source = Arc::new(InMemoryPolicySource::new().with_policy("disallow-privileged", "1", PRIVILEGED));
    let notifier = Arc::new(CollectingNotifier::default());
    let listener = AdmissionListener::new(loaded_store(source, &config).await, &config)
        .with_notifier(notifier.clone());

    // Retried deliveries of the same request
    for _ in 0..3 {
        let decision = listener.decide(Arc::new(pod("retry-1", true))).await;
        assert!(!decision.allowed);
    }
    listener.decide(Arc::new(pod("retry-2", true))).await;
    listener.decide(Arc::new(pod("clean-1", false))).await;

    notifier.wait_for(2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let uids: Vec<String> = notifier.events().into_iter().map(|e| e.request_uid).collect();
    assert_eq!(uids, vec!["retry-1", "retry-2"]);
    assert_eq!(listener.dispatcher().stats().enqueued(), 2);

    let event = &notifier.events()[0];
    assert_eq!(event.namespace.as_deref(), Some("default"));
    assert_eq!(event.decision.denied_by, vec!["disallow-privileged"]);
}

#[tokio::test]
async fn test_dropped_violation_is_notified_on_redelivery() {
    let config = AdmissionConfig {
        notification_buffer: 1,
        ..config()
    };
    let source = Arc::new(InMemoryPolicySource::new().with_policy("disallow-privileged", "1", PRIVILEGED));
    let notifier = Arc::new(GatedNotifier::closed());
    let listener = AdmissionListener::new(loaded_store(source, &config).await, &config)
        .with_notifier(notifier.clone());

    // The worker takes the first event and holds it
    listener.decide(Arc::new(pod("blocker", true))).await;
    for _ in 0..200 {
        if notifier.holding.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(notifier.holding.load(Ordering::SeqCst));

    // One queue slot: the second event waits, the third is dropped
    listener.decide(Arc::new(pod("filler", true))).await;
    listener.decide(Arc::new(pod("late", true))).await;
    assert_eq!(listener.dispatcher().stats().dropped(), 1);

    notifier.open();
    notifier.inner.wait_for(2).await;

    // The retried request is notified since its event never left
    listener.decide(Arc::new(pod("late", true))).await;
    notifier.inner.wait_for(3).await;

    let uids: Vec<String> = notifier.inner.events().into_iter().map(|e| e.request_uid).collect();
    assert_eq!(uids, vec!["blocker", "filler", "late"]);

    // Once delivered it is deduplicated again
    listener.decide(Arc::new(pod("late", true))).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifier.inner.events().len(), 3);
}

#[tokio::test]
async fn test_observer_receives_decisions_and_reloads() {
    let config = config();
    let observer = Arc::new(CollectingObserver::default());
    let source = Arc::new(InMemoryPolicySource::new().with_policy("disallow-privileged", "4", PRIVILEGED));
    let store = Arc::new(PolicyStore::new(source, &config).with_observer(observer.clone()));
    store.reload().await.unwrap();

    let listener = AdmissionListener::new(store, &config).with_observer(observer.clone());
    listener.decide(Arc::new(pod("observed", true))).await;

    let reloads = observer.reloads.lock().unwrap().clone();
    assert_eq!(reloads.len(), 1);
    assert!(reloads[0].success);
    assert_eq!(reloads[0].generation, Some(1));

    let decisions = observer.decisions.lock().unwrap().clone();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].uid, "observed");
    assert!(!decisions[0].allowed);
    assert_eq!(decisions[0].cause, DecisionCause::Evaluated);
}

// =============================================================================
// Deadline and capacity
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_exceeded_resolves_fail_safe() {
    for (mode, allowed) in [(FailSafeMode::Deny, false), (FailSafeMode::Allow, true)] {
        let config = AdmissionConfig {
            evaluation_deadline_ms: 100,
            fail_safe_mode: mode,
            ..AdmissionConfig::default()
        };
        let source = Arc::new(InMemoryPolicySource::new().with_policy("slow", "1", PRIVILEGED));
        let listener = AdmissionListener::new(loaded_store(source, &config).await, &config)
            .with_evaluator(Arc::new(SlowEvaluator {
                limit: Duration::from_secs(5),
            }));

        let started = Instant::now();
        let decision = listener.decide(Arc::new(pod("slow-1", false))).await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(100 + 400), "took {:?}", elapsed);
        assert_eq!(decision.cause, DecisionCause::DeadlineExceeded);
        assert_eq!(decision.allowed, allowed);
        assert!(!decision.is_clean());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_cancels_interpreter() {
    // Every container is compared against every other one
    let quadratic = r#"
rules:
  - message: "Container {{ name }} duplicates another container."
    foreach: spec.containers
    when:
      some: $object.spec.containers
      where:
        field: name
        operator: eq
        value: "never-matches"
"#;
    let config = AdmissionConfig {
        evaluation_deadline_ms: 50,
        max_evaluation_steps: u64::MAX,
        ..AdmissionConfig::default()
    };
    let source = Arc::new(InMemoryPolicySource::new().with_policy("quadratic", "1", quadratic));
    let listener = AdmissionListener::new(loaded_store(source, &config).await, &config);

    let containers: Vec<_> = (0..5_000)
        .map(|i| json!({"name": format!("c-{}", i), "image": "nginx"}))
        .collect();
    let request = AdmissionRequest::new("big-1", GroupVersionKind::new("", "v1", "Pod"), Operation::Create)
        .with_namespace("default")
        .with_object(json!({"spec": {"containers": containers}}));

    let started = Instant::now();
    let decision = listener.decide(Arc::new(request)).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(50 + 400), "took {:?}", elapsed);
    assert_eq!(decision.cause, DecisionCause::DeadlineExceeded);
    assert!(!decision.allowed);

    // The abandoned work notices the cancel flag and releases its permit
    for _ in 0..250 {
        if listener.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(listener.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overload_fast_fails() {
    let config = AdmissionConfig {
        evaluation_deadline_ms: 2_000,
        max_in_flight: 1,
        ..AdmissionConfig::default()
    };
    let source = Arc::new(InMemoryPolicySource::new().with_policy("slow", "1", PRIVILEGED));
    let listener = Arc::new(
        AdmissionListener::new(loaded_store(source, &config).await, &config).with_evaluator(Arc::new(
            SlowEvaluator {
                limit: Duration::from_millis(300),
            },
        )),
    );

    let busy = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.decide(Arc::new(pod("busy", false))).await })
    };
    for _ in 0..100 {
        if listener.in_flight() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(listener.in_flight(), 1);

    let started = Instant::now();
    let rejected = listener.decide(Arc::new(pod("extra", false))).await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(rejected.cause, DecisionCause::Overloaded);
    assert!(!rejected.allowed);

    let finished = busy.await.unwrap();
    assert_eq!(finished.cause, DecisionCause::Evaluated);
    assert!(finished.allowed);
    assert_eq!(listener.in_flight(), 0);
}

// =============================================================================
// Reload under load
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reload_never_mixes_versions() {
    let config = config();
    let source = Arc::new(InMemoryPolicySource::new().with_policy("a", "1", &versioned("v1")));
    let store = loaded_store(Arc::clone(&source), &config).await;
    let listener = Arc::new(AdmissionListener::new(Arc::clone(&store), &config));

    let reloader = {
        let source = Arc::clone(&source);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for round in 0..50u32 {
                // Generation 1 is v1; every reload flips the version
                let (version, marker) = if round % 2 == 0 { ("2", "v2") } else { ("1", "v1") };
                source.upsert("a", version, &versioned(marker));
                store.reload().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut workers = Vec::new();
    for worker in 0..8 {
        let listener = Arc::clone(&listener);
        workers.push(tokio::spawn(async move {
            let mut decisions = Vec::new();
            for i in 0..50 {
                let uid = format!("req-{}-{}", worker, i);
                decisions.push(listener.decide(Arc::new(pod(&uid, false))).await);
            }
            decisions
        }));
    }

    reloader.await.unwrap();
    for worker in workers {
        for decision in worker.await.unwrap() {
            assert_eq!(decision.cause, DecisionCause::Evaluated);
            assert!(decision.errored.is_empty());

            let marker = if decision.generation % 2 == 1 { "v1" } else { "v2" };
            assert_eq!(
                decision.messages,
                vec![format!("[a] {} first", marker), format!("[a] {} second", marker)]
            );
        }
    }
    assert_eq!(store.current().generation(), 51);
}
