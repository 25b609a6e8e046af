// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// API version of the review envelope.
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Kind of the review envelope.
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Operation requested on the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// Group/version/kind of the object under review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }
}

/// Group/version/resource (plural) of the object under review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// Identity of the caller that issued the request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

/// A proposed resource operation submitted for a go/no-go decision.
///
/// Requests are immutable once decoded and shared behind an `Arc` for the
/// lifetime of one admission call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<GroupVersionResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default)]
    pub dry_run: bool,
}

impl AdmissionRequest {
    /// Create a request with an empty object
    pub fn new(uid: impl Into<String>, kind: GroupVersionKind, operation: Operation) -> Self {
        Self {
            uid: uid.into(),
            kind,
            resource: None,
            sub_resource: None,
            operation,
            namespace: None,
            name: None,
            object: None,
            old_object: None,
            user_info: UserInfo::default(),
            dry_run: false,
        }
    }

    /// Synthetic request used to dry-run freshly compiled policies
    pub fn synthetic() -> Self {
        Self::new("dry-run", GroupVersionKind::new("", "v1", "Object"), Operation::Create)
            .with_object(json!({}))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_old_object(mut self, old_object: Value) -> Self {
        self.old_object = Some(old_object);
        self
    }

    pub fn with_user(mut self, username: impl Into<String>) -> Self {
        self.user_info.username = username.into();
        self
    }

    /// Request metadata exposed to policies under the `$request` root
    pub fn metadata(&self) -> Value {
        json!({
            "uid": self.uid,
            "operation": self.operation.as_str(),
            "namespace": self.namespace,
            "name": self.name,
            "dryRun": self.dry_run,
            "kind": {
                "group": self.kind.group,
                "version": self.kind.version,
                "kind": self.kind.kind,
            },
            "userInfo": {
                "username": self.user_info.username,
                "uid": self.user_info.uid,
                "groups": self.user_info.groups,
            },
        })
    }
}

/// Status attached to a response that denies or warns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
}

/// Wire-level admission verdict for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    /// Always echoes the request uid
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    /// Message carried by the status, if any
    pub fn message(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.message.as_str())
    }
}

/// Review envelope carrying either a request or a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_review_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_string()
}

fn default_review_kind() -> String {
    ADMISSION_REVIEW_KIND.to_string()
}

impl AdmissionReview {
    /// Wrap a request in a review envelope
    pub fn for_request(request: AdmissionRequest) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_review_kind(),
            request: Some(request),
            response: None,
        }
    }

    /// Wrap a response in a review envelope
    pub fn for_response(response: AdmissionResponse) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_review_kind(),
            request: None,
            response: Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW: &str = r#"{
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "operation": "CREATE",
            "namespace": "team-a",
            "name": "web",
            "object": {"spec": {"containers": [{"name": "web", "image": "nginx"}]}},
            "userInfo": {"username": "alice", "groups": ["system:authenticated"]}
        }
    }"#;

    #[test]
    fn test_review_deserialize() {
        let review: AdmissionReview = serde_json::from_str(REVIEW).unwrap();
        let request = review.request.unwrap();
        assert_eq!(request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(request.kind.kind, "Pod");
        assert_eq!(request.operation, Operation::Create);
        assert_eq!(request.namespace.as_deref(), Some("team-a"));
        assert_eq!(request.user_info.username, "alice");
        assert!(request.old_object.is_none());
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let json = r#"{"uid": "1", "kind": {"version": "v1", "kind": "Pod"}, "operation": "PATCH"}"#;
        assert!(serde_json::from_str::<AdmissionRequest>(json).is_err());
    }

    #[test]
    fn test_response_serialize_omits_empty() {
        let response = AdmissionResponse {
            uid: "abc".to_string(),
            allowed: true,
            status: None,
            warnings: vec![],
        };
        let json = serde_json::to_string(&AdmissionReview::for_response(response)).unwrap();
        assert!(json.contains("\"uid\":\"abc\""));
        assert!(!json.contains("warnings"));
        assert!(!json.contains("status"));
        assert!(json.contains("\"apiVersion\":\"admission.k8s.io/v1\""));
    }

    #[test]
    fn test_request_metadata() {
        let request = AdmissionRequest::new("1", GroupVersionKind::new("apps", "v1", "Deployment"), Operation::Update)
            .with_namespace("prod")
            .with_user("bob");
        let meta = request.metadata();
        assert_eq!(meta["operation"], "UPDATE");
        assert_eq!(meta["namespace"], "prod");
        assert_eq!(meta["userInfo"]["username"], "bob");
        assert_eq!(meta["kind"]["group"], "apps");
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("create".parse::<Operation>().unwrap(), Operation::Create);
        assert_eq!("DELETE".parse::<Operation>().unwrap(), Operation::Delete);
        assert!("connect".parse::<Operation>().is_err());
    }
}
