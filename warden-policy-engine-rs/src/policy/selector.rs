use crate::admission::AdmissionRequest;
use crate::policy::config::MatchDefinition;

/// Target selector deciding which requests a policy applies to
#[derive(Debug, Clone)]
pub struct TargetSelector {
    kinds: Vec<String>,
    groups: Vec<String>,
    versions: Vec<String>,
    operations: Vec<String>,
    namespaces: Vec<String>,
    excluded_namespaces: Vec<String>,
}

impl From<&MatchDefinition> for TargetSelector {
    fn from(def: &MatchDefinition) -> Self {
        Self {
            kinds: def.kinds.clone(),
            groups: def.groups.clone(),
            versions: def.versions.clone(),
            // Operations compare case-insensitively
            operations: def.operations.iter().map(|o| o.to_uppercase()).collect(),
            namespaces: def.namespaces.clone(),
            excluded_namespaces: def.excluded_namespaces.clone(),
        }
    }
}

impl TargetSelector {
    /// Selector matching every request
    pub fn any() -> Self {
        Self::from(&MatchDefinition::default())
    }

    /// Check if this selector applies to the given request
    pub fn matches(&self, request: &AdmissionRequest) -> bool {
        // Cluster-scoped resources match as the empty namespace
        let namespace = request.namespace.as_deref().unwrap_or("");

        matches_any(&self.kinds, &request.kind.kind)
            && matches_any(&self.groups, &request.kind.group)
            && matches_any(&self.versions, &request.kind.version)
            && matches_any(&self.operations, request.operation.as_str())
            && matches_any(&self.namespaces, namespace)
            && !self
                .excluded_namespaces
                .iter()
                .any(|p| wildcard_match(p, namespace))
    }
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| wildcard_match(p, value))
}

/// Match `value` against a pattern where `*` stands for any substring
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return false,
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return pattern == value,
    };

    if value.len() < first.len() + last.len()
        || !value.starts_with(first)
        || !value.ends_with(last)
    {
        return false;
    }

    let mut remaining = &value[first.len()..value.len() - last.len()];
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    true
}
