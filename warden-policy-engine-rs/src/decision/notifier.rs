//! Violation notification.
//!
//! Fire-and-forget: `dispatch()` never blocks the decision path. Events are
//! queued on a bounded channel and delivered by a background worker; when
//! the queue is full the event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::decision::event::ViolationEvent;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notifier rejected event with status {status}")]
    Rejected { status: u16 },
}

/// External collaborator receiving violation events.
///
/// Retry and backoff are the notifier's own concern.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &ViolationEvent) -> Result<(), NotifyError>;
}

/// Default notifier: writes each event to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &ViolationEvent) -> Result<(), NotifyError> {
        warn!(
            uid = %event.request_uid,
            allowed = event.decision.allowed,
            cause = %event.decision.cause,
            namespace = event.namespace.as_deref().unwrap_or(""),
            name = event.name.as_deref().unwrap_or(""),
            denied_by = ?event.decision.denied_by,
            warned_by = ?event.decision.warned_by,
            "admission violation"
        );
        Ok(())
    }
}

/// Counters for monitoring the dispatcher
#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Bounded queue in front of a notifier
pub struct ViolationDispatcher {
    sender: mpsc::Sender<ViolationEvent>,
    stats: Arc<DispatchStats>,
}

impl ViolationDispatcher {
    /// Start the delivery worker. Must be called within a Tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<ViolationEvent>(capacity.max(1));
        let stats = Arc::new(DispatchStats::default());

        let worker_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match notifier.deliver(&event).await {
                    Ok(()) => {
                        worker_stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(uid = %event.request_uid, error = %e, "violation notification failed");
                    }
                }
            }
            debug!("violation dispatcher stopped");
        });

        Self { sender, stats }
    }

    /// Enqueue an event without waiting. Returns false when it was dropped.
    pub fn dispatch(&self, event: ViolationEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(uid = %event.request_uid, "violation queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(uid = %event.request_uid, "violation dispatcher stopped, dropping event");
                false
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}
