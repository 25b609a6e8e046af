// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Request Listener
//!
//! Entry point of the decision pipeline. Per call:
//! 1. Take an in-flight permit, or fast-fail when none is free
//! 2. Take the current policy snapshot once
//! 3. Evaluate on the blocking pool under the deadline
//! 4. Synthesize, record, and hand non-clean decisions to the notifier
//!
//! Every path ends in a well-formed response echoing the request uid.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use crate::config::{AdmissionConfig, FailSafeMode};
use crate::decision::{
    synthesize, AdmissionDecision, DecisionCause, LogNotifier, Notifier, ViolationDeduplicator,
    ViolationDispatcher, ViolationEvent,
};
use crate::observe::{AdmissionObserver, DecisionRecord, TracingObserver};
use crate::policy::{CancelFlag, EvaluationEngine, PolicyEvaluator};
use crate::store::PolicyStore;

pub struct AdmissionListener {
    store: Arc<PolicyStore>,
    engine: EvaluationEngine,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    deadline: Duration,
    fail_safe: FailSafeMode,
    observer: Arc<dyn AdmissionObserver>,
    dispatcher: ViolationDispatcher,
    dedup: ViolationDeduplicator,
    notification_buffer: usize,
}

impl AdmissionListener {
    /// Build a listener over a store. Must be called within a Tokio runtime.
    pub fn new(store: Arc<PolicyStore>, config: &AdmissionConfig) -> Self {
        Self {
            store,
            engine: EvaluationEngine::interpreted(config.max_evaluation_steps),
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            max_in_flight: config.max_in_flight,
            deadline: config.evaluation_deadline(),
            fail_safe: config.fail_safe_mode,
            observer: Arc::new(TracingObserver),
            dispatcher: ViolationDispatcher::spawn(Arc::new(LogNotifier), config.notification_buffer),
            dedup: ViolationDeduplicator::new(config.dedup_ttl(), config.dedup_capacity),
            notification_buffer: config.notification_buffer,
        }
    }

    /// Replace the in-process interpreter with another evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        self.engine = EvaluationEngine::new(evaluator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.dispatcher = ViolationDispatcher::spawn(notifier, self.notification_buffer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AdmissionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &ViolationDispatcher {
        &self.dispatcher
    }

    /// Evaluations currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Decode a raw AdmissionReview body and answer it
    pub async fn admit_bytes(&self, body: &[u8]) -> AdmissionReview {
        match serde_json::from_slice::<AdmissionReview>(body) {
            Ok(review) => self.review(review).await,
            Err(e) => self.reject_malformed(&recover_uid(body), &e.to_string()),
        }
    }

    /// Answer an AdmissionReview carrying a request
    pub async fn review(&self, review: AdmissionReview) -> AdmissionReview {
        let AdmissionReview {
            api_version,
            request,
            ..
        } = review;

        let mut answer = match request {
            Some(request) => AdmissionReview::for_response(self.admit(request).await),
            None => self.reject_malformed("", "review carries no request"),
        };
        answer.api_version = api_version;
        answer
    }

    pub async fn admit(&self, request: AdmissionRequest) -> AdmissionResponse {
        let request = Arc::new(request);
        let decision = self.decide(Arc::clone(&request)).await;
        decision.to_response(&request.uid)
    }

    /// Decide one request, recording it and notifying on violations
    pub async fn decide(&self, request: Arc<AdmissionRequest>) -> AdmissionDecision {
        let started = Instant::now();
        let decision = self.evaluate(Arc::clone(&request)).await;

        self.observer
            .decision(&DecisionRecord::new(&request.uid, &decision, started.elapsed()));

        if let Some(event) = ViolationEvent::from_decision(&request, &decision) {
            self.notify(event);
        }
        decision
    }

    async fn evaluate(&self, request: Arc<AdmissionRequest>) -> AdmissionDecision {
        // Held by the evaluation work itself, so abandoned work still counts
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    uid = %request.uid,
                    max_in_flight = self.max_in_flight,
                    category = "overloaded",
                    "admission capacity exhausted, fast-failing request"
                );
                return AdmissionDecision::fail_safe(
                    DecisionCause::Overloaded,
                    self.fail_safe,
                    self.store.current().generation(),
                );
            }
        };

        let snapshot = self.store.current();
        let generation = snapshot.generation();
        let cancel = CancelFlag::new();

        let work = {
            let engine = self.engine.clone();
            let request = Arc::clone(&request);
            let cancel = cancel.clone();
            let fail_safe = self.fail_safe;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let verdicts = engine.evaluate(&request, &snapshot, &cancel);
                synthesize(&verdicts, fail_safe, snapshot.generation())
            })
        };

        match tokio::time::timeout(self.deadline, work).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                error!(
                    uid = %request.uid,
                    generation,
                    error = %e,
                    category = "evaluator_crashed",
                    "policy evaluation task failed"
                );
                AdmissionDecision::fail_safe(DecisionCause::EvaluatorCrashed, self.fail_safe, generation)
            }
            Err(_) => {
                cancel.cancel();
                error!(
                    uid = %request.uid,
                    generation,
                    deadline_ms = self.deadline.as_millis() as u64,
                    fail_safe = %self.fail_safe,
                    category = "deadline_exceeded",
                    "policy evaluation exceeded deadline"
                );
                AdmissionDecision::fail_safe(DecisionCause::DeadlineExceeded, self.fail_safe, generation)
            }
        }
    }

    fn reject_malformed(&self, uid: &str, detail: &str) -> AdmissionReview {
        warn!(
            uid = %uid,
            error = %detail,
            category = "malformed_request",
            "rejecting malformed admission request"
        );

        let decision = AdmissionDecision::malformed(detail);
        self.observer
            .decision(&DecisionRecord::new(uid, &decision, Duration::ZERO));
        self.notify(ViolationEvent::undecoded(uid, &decision));

        AdmissionReview::for_response(decision.to_response(uid))
    }

    fn notify(&self, event: ViolationEvent) {
        // Requests without an identifier cannot be deduplicated
        if event.request_uid.is_empty() {
            self.dispatcher.dispatch(event);
            return;
        }
        if !self.dedup.first_delivery(&event.request_uid) {
            debug!(uid = %event.request_uid, "violation already notified for this request");
            return;
        }

        let uid = event.request_uid.clone();
        if !self.dispatcher.dispatch(event) {
            // Dropped events do not count as delivered
            self.dedup.forget(&uid);
        }
    }
}

/// Best-effort uid recovery from a body that failed to decode
fn recover_uid(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("request")?.get("uid")?.as_str().map(str::to_string))
        .unwrap_or_default()
}
