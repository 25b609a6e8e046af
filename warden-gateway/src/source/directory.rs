// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Directory Policy Source
//!
//! One policy per `*.yaml` / `*.yml` file:
//! - id: file stem
//! - version: modification time in milliseconds since the epoch
//!
//! Changes are detected by polling the directory listing; each poll is
//! compared with the previous one and the differences are emitted as
//! created / updated / deleted notifications.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use warden_policy_engine::store::{ChangeKind, PolicySource, SourceChange, SourceEntry, SourceError};

/// A policy file as seen by one directory scan
#[derive(Debug, Clone)]
struct PolicyFile {
    path: PathBuf,
    version: String,
    len: u64,
}

pub struct DirectoryPolicySource {
    dir: PathBuf,
    watch_interval: Duration,
}

impl DirectoryPolicySource {
    pub fn new(dir: impl Into<PathBuf>, watch_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            watch_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_policy_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Policy files of `dir` keyed by id. On duplicate stems the first file
/// name in lexical order wins.
async fn scan(dir: &Path) -> Result<BTreeMap<String, PolicyFile>, SourceError> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SourceError::Unavailable(format!("{}: {}", dir.display(), e)))?;

    let mut found = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        if !is_policy_file(&path) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            // Removed between listing and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let modified_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        found.push(PolicyFile {
            path,
            version: modified_ms.to_string(),
            len: metadata.len(),
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));

    let mut files = BTreeMap::new();
    for file in found {
        let Some(id) = file.path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if files.contains_key(&id) {
            warn!(policy = %id, path = %file.path.display(), "duplicate policy file ignored");
            continue;
        }
        files.insert(id, file);
    }
    Ok(files)
}

fn diff(
    previous: &BTreeMap<String, PolicyFile>,
    current: &BTreeMap<String, PolicyFile>,
) -> Vec<SourceChange> {
    let mut changes = Vec::new();

    for (id, file) in current {
        let kind = match previous.get(id) {
            None => ChangeKind::Created,
            Some(old) if old.version != file.version || old.len != file.len => ChangeKind::Updated,
            Some(_) => continue,
        };
        changes.push(SourceChange { id: id.clone(), kind });
    }
    for id in previous.keys() {
        if !current.contains_key(id) {
            changes.push(SourceChange {
                id: id.clone(),
                kind: ChangeKind::Deleted,
            });
        }
    }
    changes
}

struct WatchState {
    dir: PathBuf,
    interval: Interval,
    known: Option<BTreeMap<String, PolicyFile>>,
    pending: VecDeque<SourceChange>,
}

#[async_trait]
impl PolicySource for DirectoryPolicySource {
    async fn list(&self) -> Result<Vec<SourceEntry>, SourceError> {
        let files = scan(&self.dir).await?;

        let mut entries = Vec::with_capacity(files.len());
        for (id, file) in files {
            let definition = tokio::fs::read_to_string(&file.path)
                .await
                .map_err(|e| SourceError::Read {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;
            entries.push(SourceEntry::new(id, file.version, definition));
        }

        debug!(dir = %self.dir.display(), policies = entries.len(), "listed policy directory");
        Ok(entries)
    }

    fn watch(&self) -> BoxStream<'static, SourceChange> {
        let mut interval = tokio::time::interval(self.watch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let state = WatchState {
            dir: self.dir.clone(),
            interval,
            known: None,
            pending: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(change) = state.pending.pop_front() {
                    return Some((change, state));
                }

                state.interval.tick().await;
                let current = match scan(&state.dir).await {
                    Ok(current) => current,
                    Err(e) => {
                        debug!(dir = %state.dir.display(), error = %e, "policy directory scan failed");
                        continue;
                    }
                };

                // The first successful scan is the baseline
                if let Some(previous) = &state.known {
                    state.pending.extend(diff(previous, &current));
                }
                state.known = Some(current);
            }
        })
        .boxed()
    }
}
