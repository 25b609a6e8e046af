use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;

use crate::admission::{AdmissionRequest, GroupVersionKind, Operation};
use crate::decision::AdmissionDecision;

/// Notification payload for a decision that is not a clean allow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub request_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<GroupVersionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub decision: AdmissionDecision,
    pub occurred_at: DateTime<Utc>,
}

impl ViolationEvent {
    /// Event for a decided request; `None` for a clean allow
    pub fn from_decision(request: &AdmissionRequest, decision: &AdmissionDecision) -> Option<Self> {
        if decision.is_clean() {
            return None;
        }
        let username = &request.user_info.username;

        Some(Self {
            request_uid: request.uid.clone(),
            kind: Some(request.kind.clone()),
            operation: Some(request.operation),
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            username: (!username.is_empty()).then(|| username.clone()),
            decision: decision.clone(),
            occurred_at: Utc::now(),
        })
    }

    /// Event for a request that could not be decoded
    pub fn undecoded(uid: &str, decision: &AdmissionDecision) -> Self {
        Self {
            request_uid: uid.to_string(),
            kind: None,
            operation: None,
            namespace: None,
            name: None,
            username: None,
            decision: decision.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Remembers recently notified request identifiers.
///
/// Bounded both by age (`ttl`) and by count (`capacity`).
#[derive(Debug, Clone)]
pub struct ViolationDeduplicator {
    seen: Cache<String, ()>,
}

impl ViolationDeduplicator {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let seen = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity.max(1) as u64)
            .build();
        Self { seen }
    }

    /// True the first time an identifier is seen within the retention window
    pub fn first_delivery(&self, uid: &str) -> bool {
        self.seen.entry(uid.to_string()).or_insert(()).is_fresh()
    }

    /// Drop an identifier so a later redelivery notifies again
    pub fn forget(&self, uid: &str) {
        self.seen.invalidate(uid);
    }

    pub fn len(&self) -> usize {
        self.seen.run_pending_tasks();
        self.seen.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
