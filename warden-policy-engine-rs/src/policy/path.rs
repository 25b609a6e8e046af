//! Field paths into the document tree.
//!
//! A path is a dot-separated list of segments resolved against the current
//! scope. Numeric segments index into sequences. A leading `$name` segment
//! switches to a named root (`$object`, `$oldObject`, `$request`); unknown
//! roots are reported when the path is resolved, not when it is parsed.

use std::fmt;

use serde_json::Value;

use crate::policy::engine::PolicyCompileError;
use crate::policy::interpreter::EvaluationInput;
use crate::policy::verdict::EvaluationFault;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathRoot {
    Scope,
    Named(String),
}

/// A parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    root: PathRoot,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dot-separated path
    pub fn parse(raw: &str) -> Result<Self, PolicyCompileError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PolicyCompileError::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty",
            });
        }

        let mut parts = trimmed.split('.');
        let mut segments = Vec::new();
        let root = match parts.next() {
            Some(first) if first.starts_with('$') => {
                let name = &first[1..];
                if name.is_empty() {
                    return Err(PolicyCompileError::InvalidPath {
                        path: raw.to_string(),
                        reason: "root reference has no name",
                    });
                }
                PathRoot::Named(name.to_string())
            }
            Some(first) => {
                segments.push(first.to_string());
                PathRoot::Scope
            }
            None => PathRoot::Scope,
        };

        for part in parts {
            segments.push(part.to_string());
        }

        if segments.iter().any(|s| s.is_empty()) {
            return Err(PolicyCompileError::InvalidPath {
                path: raw.to_string(),
                reason: "path contains an empty segment",
            });
        }

        Ok(Self {
            raw: trimmed.to_string(),
            root,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve this path. `Ok(None)` means the field is absent.
    pub fn resolve<'v>(
        &self,
        scope: &'v Value,
        input: &'v EvaluationInput<'_>,
    ) -> Result<Option<&'v Value>, EvaluationFault> {
        let start = match &self.root {
            PathRoot::Scope => Some(scope),
            PathRoot::Named(name) => match name.as_str() {
                "object" => input.object(),
                "oldObject" => input.old_object(),
                "request" => Some(input.request()),
                other => {
                    return Err(EvaluationFault::UnknownReference {
                        root: other.to_string(),
                        path: self.raw.clone(),
                    })
                }
            },
        };

        Ok(start.and_then(|value| {
            self.segments
                .iter()
                .try_fold(value, |v, key| lookup(v, key))
        }))
    }
}

fn lookup<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
