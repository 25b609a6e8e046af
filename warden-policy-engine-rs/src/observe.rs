//! Observability interface.
//!
//! One record per decision and one per reload attempt. Sinks implement
//! [`AdmissionObserver`]; the library only ships a `tracing` sink.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::decision::{AdmissionDecision, DecisionCause};

/// Summary of one admission decision
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub uid: String,
    pub allowed: bool,
    pub cause: DecisionCause,
    pub denied_by: Vec<String>,
    pub warned_by: Vec<String>,
    pub errored: Vec<String>,
    pub generation: u64,
    pub latency: Duration,
}

impl DecisionRecord {
    pub fn new(uid: &str, decision: &AdmissionDecision, latency: Duration) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: decision.allowed,
            cause: decision.cause,
            denied_by: decision.denied_by.clone(),
            warned_by: decision.warned_by.clone(),
            errored: decision.errored.clone(),
            generation: decision.generation,
            latency,
        }
    }
}

/// Summary of one reload attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadRecord {
    pub success: bool,
    /// Generation published, when the attempt succeeded
    pub generation: Option<u64>,
    pub loaded: usize,
    pub rejected: Vec<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Sink for decision and reload records
pub trait AdmissionObserver: Send + Sync {
    fn decision(&self, record: &DecisionRecord);
    fn reload(&self, record: &ReloadRecord);
}

/// Emits every record as a structured log event
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl AdmissionObserver for TracingObserver {
    fn decision(&self, record: &DecisionRecord) {
        info!(
            uid = %record.uid,
            allowed = record.allowed,
            cause = %record.cause,
            denied_by = ?record.denied_by,
            warned_by = ?record.warned_by,
            errored = ?record.errored,
            generation = record.generation,
            latency_ms = record.latency.as_secs_f64() * 1000.0,
            "admission decision"
        );
    }

    fn reload(&self, record: &ReloadRecord) {
        if record.success {
            info!(
                generation = ?record.generation,
                loaded = record.loaded,
                rejected = ?record.rejected,
                duration_ms = record.duration.as_millis() as u64,
                "policy reload succeeded"
            );
        } else {
            warn!(
                loaded = record.loaded,
                rejected = ?record.rejected,
                error = record.error.as_deref().unwrap_or("unknown"),
                duration_ms = record.duration.as_millis() as u64,
                "policy reload failed"
            );
        }
    }
}

impl<A: AdmissionObserver, B: AdmissionObserver> AdmissionObserver for (A, B) {
    fn decision(&self, record: &DecisionRecord) {
        self.0.decision(record);
        self.1.decision(record);
    }

    fn reload(&self, record: &ReloadRecord) {
        self.0.reload(record);
        self.1.reload(record);
    }
}

impl<T: AdmissionObserver + ?Sized> AdmissionObserver for Arc<T> {
    fn decision(&self, record: &DecisionRecord) {
        (**self).decision(record);
    }

    fn reload(&self, record: &ReloadRecord) {
        (**self).reload(record);
    }
}
