//! Policy evaluation subsystem.
//!
//! # Purpose
//! Decides allow/deny for each request against a Rego policy. Two
//! interchangeable backends exist: in-process evaluation of the loaded
//! policy module, or an external decision service reached over HTTP.
//! Both sit behind the same decision cache and resilience envelope, and
//! both fail closed: if no decision can be produced, access is denied.
mod embedded;
mod external;
mod loader;

pub use embedded::{EmbeddedBackend, PolicyModule, PolicySlot};
pub use external::ExternalBackend;
pub use loader::{PolicyLoader, PolicyWatcher};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_authz::{AuthContext, PolicyDecision, PolicyInput};

use crate::resilience::{guard, CircuitBreaker, RetryPolicy};

/// Reason attached to fail-closed outcomes.
pub const UNAVAILABLE_REASON: &str = "Policy subsystem unavailable. Access denied for security.";

/// The policy subsystem could not produce a decision; the gateway answers
/// 503 without consulting the upstream.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PolicyUnavailable(pub String);

#[async_trait]
pub trait DecisionBackend: Send + Sync {
    async fn decide(&self, input: &PolicyInput) -> anyhow::Result<PolicyDecision>;
}

pub struct PolicyEngine {
    enabled: bool,
    backend: Arc<dyn DecisionBackend>,
    cache: Arc<DashMap<String, CachedDecision>>,
    cache_ttl: Duration,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
}

#[derive(Debug, Clone)]
struct CachedDecision {
    decision: PolicyDecision,
    expires_at: Instant,
}

impl PolicyEngine {
    pub fn new(
        enabled: bool,
        backend: Arc<dyn DecisionBackend>,
        cache_ttl: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            enabled,
            backend,
            cache: Arc::new(DashMap::new()),
            cache_ttl,
            breaker: CircuitBreaker::new(10, 0.5, Duration::from_secs(10)),
            policy: RetryPolicy {
                max_retries: 2,
                delay: Duration::from_millis(200),
                attempt_timeout,
            },
        }
    }

    /// Drops all cached decisions. Called on policy hot-reload so stale
    /// outcomes do not outlive the module that produced them.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub async fn evaluate(
        &self,
        context: &AuthContext,
        method: &str,
        path: &str,
        headers: BTreeMap<String, String>,
        query_params: BTreeMap<String, String>,
    ) -> Result<PolicyDecision, PolicyUnavailable> {
        if !self.enabled {
            return Ok(PolicyDecision::allow());
        }

        let input = PolicyInput::new(context, method, path, headers, query_params);
        let cache_key = input.cache_key();

        if let Some(entry) = self.cache.get(&cache_key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.decision.clone());
            }
        }

        let outcome = guard(self.policy, &self.breaker, || self.backend.decide(&input)).await;

        match outcome {
            Ok(decision) => {
                if decision.allowed {
                    metrics::counter!("warden_authz_allow_total").increment(1);
                } else {
                    metrics::counter!("warden_authz_deny_total").increment(1);
                }
                self.cache.insert(
                    cache_key,
                    CachedDecision {
                        decision: decision.clone(),
                        expires_at: Instant::now() + self.cache_ttl,
                    },
                );
                Ok(decision)
            }
            Err(err) => {
                tracing::error!(error = %err, path = %path, "policy evaluation unavailable, failing closed");
                metrics::counter!("warden_authz_deny_total").increment(1);
                Err(PolicyUnavailable(UNAVAILABLE_REASON.to_string()))
            }
        }
    }
}

/// Interprets a decision document shared by both backends: a bare boolean,
/// or an object carrying `allow` plus optional `reason` / `violations`.
pub(crate) fn parse_result(result: &Value) -> PolicyDecision {
    if let Some(allowed) = result.as_bool() {
        return if allowed {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny("Access denied by policy")
        };
    }

    if let Some(object) = result.as_object() {
        if let Some(allow) = object.get("allow") {
            let allowed = allow.as_bool().unwrap_or(false);
            if allowed {
                return PolicyDecision::allow();
            }
            let reason = object
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Access denied by policy");
            let violations = object
                .get("violations")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|value| value.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            return PolicyDecision::deny_with(reason, violations);
        }
    }

    PolicyDecision::deny("Unexpected evaluation result")
}
