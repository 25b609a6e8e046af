// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Policy Store
//!
//! Holds the current immutable `PolicySet` and replaces it wholesale on
//! reload.
//!
//! Reload flow:
//! 1. List raw definitions from the source
//! 2. Compile and dry-run each; failures are excluded and reported
//! 3. Accept the batch if enough of it survived
//! 4. Publish the new set with the next generation in one pointer swap
//!
//! Reloads are serialized. Readers clone an `Arc` and never wait on a reload.

pub mod source;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::config::{AdmissionConfig, StartupMode};
use crate::observe::{AdmissionObserver, ReloadRecord, TracingObserver};
use crate::policy::{Policy, PolicySet};

pub use source::{ChangeKind, InMemoryPolicySource, PolicySource, SourceChange, SourceEntry, SourceError};

// =============================================================================
// Reload outcome
// =============================================================================

/// A definition excluded from a reload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedPolicy {
    pub id: String,
    pub version: String,
    pub reason: String,
}

/// Result of a successful reload
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub generation: u64,
    pub loaded: usize,
    pub rejected: Vec<RejectedPolicy>,
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Policy source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Only {valid} of {total} policies compiled; keeping the current policy set")]
    BelowMinimum {
        valid: usize,
        total: usize,
        rejected: Vec<RejectedPolicy>,
    },
}

impl ReloadError {
    /// Policies rejected by the failed attempt, if it got that far
    pub fn rejected(&self) -> &[RejectedPolicy] {
        match self {
            ReloadError::SourceUnavailable(_) => &[],
            ReloadError::BelowMinimum { rejected, .. } => rejected,
        }
    }
}

/// Point-in-time view of the store, for readiness probes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub generation: u64,
    pub policies: usize,
    pub loaded_once: bool,
    pub startup_mode: StartupMode,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ReloadState {
    loaded_once: bool,
    last_reload_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

// =============================================================================
// Policy Store
// =============================================================================

pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    current: RwLock<Arc<PolicySet>>,
    /// Single-writer discipline for reloads
    reload_lock: tokio::sync::Mutex<()>,
    trigger: Notify,
    state: Mutex<ReloadState>,
    observer: Arc<dyn AdmissionObserver>,
    startup_mode: StartupMode,
    min_valid_ratio: f64,
    poll_interval: Duration,
}

impl PolicyStore {
    /// Store serving the `startupMode` bootstrap set until the first load
    pub fn new(source: Arc<dyn PolicySource>, config: &AdmissionConfig) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(PolicySet::bootstrap(config.startup_mode))),
            reload_lock: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
            state: Mutex::new(ReloadState::default()),
            observer: Arc::new(TracingObserver),
            startup_mode: config.startup_mode,
            min_valid_ratio: config.min_valid_policy_ratio,
            poll_interval: config.reload_poll_interval(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AdmissionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The policy set currently enforced.
    ///
    /// The read lock is held only to clone the `Arc`; a reader can wait for
    /// a concurrent publish to swap the pointer, never for a whole reload.
    pub fn current(&self) -> Arc<PolicySet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn status(&self) -> StoreStatus {
        let current = self.current();
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        StoreStatus {
            generation: current.generation(),
            policies: current.len(),
            loaded_once: state.loaded_once,
            startup_mode: self.startup_mode,
            last_reload_at: state.last_reload_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Ask the background loop for a reload; repeated requests coalesce
    pub fn request_reload(&self) {
        self.trigger.notify_one();
    }

    /// Fetch, compile and publish the source's current definitions
    pub async fn reload(&self) -> Result<ReloadReport, ReloadError> {
        let _guard = self.reload_lock.lock().await;
        let started = Instant::now();

        let result = self.reload_locked().await;

        let record = match &result {
            Ok(report) => ReloadRecord {
                success: true,
                generation: Some(report.generation),
                loaded: report.loaded,
                rejected: report.rejected.iter().map(|r| r.id.clone()).collect(),
                error: None,
                duration: started.elapsed(),
            },
            Err(e) => ReloadRecord {
                success: false,
                generation: None,
                loaded: 0,
                rejected: e.rejected().iter().map(|r| r.id.clone()).collect(),
                error: Some(e.to_string()),
                duration: started.elapsed(),
            },
        };
        self.observer.reload(&record);

        result
    }

    async fn reload_locked(&self) -> Result<ReloadReport, ReloadError> {
        let entries = match self.source.list().await {
            Ok(entries) => entries,
            Err(e) => {
                let current = self.current();
                warn!(
                    error = %e,
                    generation = current.generation(),
                    bootstrap = current.is_bootstrap(),
                    "policy source unavailable, keeping current policy set"
                );
                self.record_failure(e.to_string());
                return Err(ReloadError::SourceUnavailable(e));
            }
        };

        let total = entries.len();
        let mut seen = HashSet::new();
        let mut policies = Vec::with_capacity(total);
        let mut rejected = Vec::new();

        for entry in entries {
            if !seen.insert(entry.id.clone()) {
                warn!(policy = %entry.id, version = %entry.version, "duplicate policy identifier, keeping the first definition");
                rejected.push(RejectedPolicy {
                    id: entry.id,
                    version: entry.version,
                    reason: "duplicate policy identifier".to_string(),
                });
                continue;
            }

            let compiled = Policy::compile(&entry.id, &entry.version, &entry.definition)
                .and_then(|policy| policy.validate().map(|_| policy));

            match compiled {
                Ok(policy) => policies.push(policy),
                Err(e) => {
                    warn!(policy = %entry.id, version = %entry.version, error = %e, "policy rejected");
                    rejected.push(RejectedPolicy {
                        id: entry.id,
                        version: entry.version,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if total > 0 && !self.meets_minimum(policies.len(), total) {
            error!(
                valid = policies.len(),
                total,
                min_ratio = self.min_valid_ratio,
                "too few policies compiled, keeping current policy set"
            );
            let err = ReloadError::BelowMinimum {
                valid: policies.len(),
                total,
                rejected,
            };
            self.record_failure(err.to_string());
            return Err(err);
        }

        let generation = self.current().generation() + 1;
        let loaded = policies.len();
        self.publish(Arc::new(PolicySet::new(generation, policies)));

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.loaded_once = true;
            state.last_reload_at = Some(Utc::now());
            state.last_error = None;
        }

        info!(generation, loaded, rejected = rejected.len(), "policy set published");

        Ok(ReloadReport {
            generation,
            loaded,
            rejected,
        })
    }

    fn meets_minimum(&self, valid: usize, total: usize) -> bool {
        valid >= 1 && valid as f64 >= self.min_valid_ratio * total as f64
    }

    fn publish(&self, set: Arc<PolicySet>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = set;
    }

    fn record_failure(&self, error: String) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_reload_at = Some(Utc::now());
        state.last_error = Some(error);
    }

    /// Reload loop: initial load, then on source changes, on the poll
    /// interval and on explicit requests, until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut changes = self.source.watch();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            startup_mode = %self.startup_mode,
            "starting policy store"
        );

        loop {
            // The first tick completes immediately and performs the initial load
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("policy store received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    debug!("policy poll interval elapsed");
                }
                _ = self.trigger.notified() => {
                    debug!("policy reload requested");
                }
                change = changes.next() => match change {
                    Some(change) => {
                        debug!(policy = %change.id, kind = ?change.kind, "policy source changed");
                        // Fold every pending notification into this reload
                        while let Some(Some(_)) = changes.next().now_or_never() {}
                    }
                    None => {
                        warn!("policy source watch ended, relying on polling");
                        changes = futures::stream::pending().boxed();
                        continue;
                    }
                },
            }

            if let Err(e) = self.reload().await {
                debug!(error = %e, "policy reload attempt failed");
            }
        }

        info!("policy store stopped");
    }
}
