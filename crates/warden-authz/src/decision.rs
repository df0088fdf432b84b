//! Policy evaluation input and output documents.
use crate::AuthContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a policy evaluation.
///
/// `allowed == true` implies `violations` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub violations: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            violations: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            violations: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn deny_with(reason: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            violations,
            metadata: serde_json::Map::new(),
        }
    }
}

/// The authorization query document handed to the policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    pub request: RequestInfo,
    pub user: UserInfo,
    pub resource: ResourceInfo,
    pub context: EvalContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub tenant: Option<String>,
}

/// Resource coordinates derived from REST-shaped paths like
/// `/api/v1/{type}/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub action: Option<String>,
}

impl ResourceInfo {
    /// Skips empty segments, the literal `api`, and version segments
    /// (`v1`, `v2`, ...). The first remaining segment is the type, the
    /// segment immediately after it is the id.
    pub fn from_path(path: &str) -> Self {
        let mut resource_type = None;
        let mut id = None;
        let mut previous_was_type = false;

        for segment in path.split('/') {
            if segment.is_empty() || segment == "api" || is_version_segment(segment) {
                previous_was_type = false;
                continue;
            }
            if resource_type.is_none() {
                resource_type = Some(segment.to_string());
                previous_was_type = true;
            } else if previous_was_type {
                id = Some(segment.to_string());
                break;
            }
        }

        Self {
            resource_type,
            id,
            action: None,
        }
    }
}

fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next() == Some('v') && {
        let rest = chars.as_str();
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalContext {
    pub timestamp: i64,
    pub source: String,
}

impl PolicyInput {
    pub fn new(
        context: &AuthContext,
        method: &str,
        path: &str,
        headers: BTreeMap<String, String>,
        query_params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            request: RequestInfo {
                method: method.to_string(),
                path: path.to_string(),
                headers,
                query_params,
            },
            user: UserInfo {
                id: context.user_id.clone(),
                email: context.email.clone(),
                roles: context.roles.iter().cloned().collect(),
                permissions: context.permissions.iter().cloned().collect(),
                tenant: context.tenant.clone(),
            },
            resource: ResourceInfo::from_path(path),
            context: EvalContext {
                timestamp: now_epoch_millis(),
                source: "sidecar".to_string(),
            },
        }
    }

    /// Canonical bytes for decision caching. The volatile timestamp is
    /// stripped so that identical queries hit the cache.
    pub fn cache_key(&self) -> String {
        serde_json::json!({
            "request": self.request,
            "user": self.user,
            "resource": self.resource,
            "context": { "source": self.context.source },
        })
        .to_string()
    }
}

fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
