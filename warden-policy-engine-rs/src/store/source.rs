use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Policy source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read policy '{id}': {reason}")]
    Read { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One raw policy definition as listed by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub id: String,
    pub version: String,
    pub definition: String,
}

impl SourceEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            definition: definition.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Change notification for one policy identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChange {
    pub id: String,
    pub kind: ChangeKind,
}

/// External store of raw policy definitions.
///
/// `list()` pulls the full current set; `watch()` pushes change
/// notifications. The store only consumes this pair.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn list(&self) -> Result<Vec<SourceEntry>, SourceError>;

    fn watch(&self) -> BoxStream<'static, SourceChange>;
}

/// Policy source held in memory
#[derive(Debug)]
pub struct InMemoryPolicySource {
    entries: RwLock<BTreeMap<String, SourceEntry>>,
    available: AtomicBool,
    changes: broadcast::Sender<SourceChange>,
}

impl Default for InMemoryPolicySource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPolicySource {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            changes,
        }
    }

    /// Builder form of [`upsert`](Self::upsert)
    pub fn with_policy(self, id: &str, version: &str, definition: &str) -> Self {
        self.upsert(id, version, definition);
        self
    }

    /// Insert or replace a definition and notify watchers
    pub fn upsert(&self, id: &str, version: &str, definition: &str) {
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), SourceEntry::new(id, version, definition));

        let kind = if previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        self.notify(id, kind);
    }

    /// Remove a definition and notify watchers
    pub fn remove(&self, id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();

        if removed {
            self.notify(id, ChangeKind::Deleted);
        }
        removed
    }

    /// Simulate the backing store becoming (un)reachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn notify(&self, id: &str, kind: ChangeKind) {
        // No receivers is fine
        let _ = self.changes.send(SourceChange {
            id: id.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl PolicySource for InMemoryPolicySource {
    async fn list(&self) -> Result<Vec<SourceEntry>, SourceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("in-memory source disabled".to_string()));
        }

        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn watch(&self) -> BoxStream<'static, SourceChange> {
        stream::unfold(self.changes.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    // Missed notifications still end in one reload
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
