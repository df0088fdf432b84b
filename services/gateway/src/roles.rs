//! Roles-service enrichment client.
//!
//! # Purpose
//! Augments an authenticated [`AuthContext`] with roles and permissions
//! from the external roles service. Lookups are cached per
//! `(userId, tenant)` and wrapped in the shared resilience envelope;
//! when the service is unreachable the caller keeps its token-derived
//! roles instead of failing the request.
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_authz::{AuthContext, RolesResponse, TENANT_HEADER};

use crate::config::RolesServiceConfig;
use crate::resilience::{guard, CircuitBreaker, GuardError, RetryPolicy};

pub struct RolesEnricher {
    config: RolesServiceConfig,
    client: reqwest::Client,
    cache: Arc<DashMap<String, CachedRoles>>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
}

#[derive(Debug, Clone)]
struct CachedRoles {
    response: RolesResponse,
    expires_at: Instant,
}

impl RolesEnricher {
    pub fn new(config: RolesServiceConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            cache: Arc::new(DashMap::new()),
            breaker: CircuitBreaker::new(10, 0.5, Duration::from_secs(10)),
            policy: RetryPolicy {
                max_retries: 2,
                delay: Duration::from_millis(500),
                attempt_timeout: Duration::from_millis(3000),
            },
        }
    }

    /// Returns the input unchanged when enrichment is disabled or the
    /// caller is anonymous; otherwise unions service roles into the
    /// context. Degrades to the original context on failure.
    pub async fn enrich(&self, context: AuthContext) -> AuthContext {
        if !self.config.enabled || !context.is_authenticated() {
            return context;
        }

        let user_id = context.user_id.clone();
        let tenant = context.tenant.clone();
        let cache_key = format!("{user_id}|{}", tenant.as_deref().unwrap_or(""));

        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(&cache_key) {
                if entry.expires_at > Instant::now() {
                    return context.with_enrichment(&entry.response);
                }
            }
        }

        let outcome = guard(self.policy, &self.breaker, || {
            self.fetch_roles(&user_id, tenant.as_deref())
        })
        .await;

        match outcome {
            Ok(response) => {
                if self.config.cache_enabled {
                    self.cache.insert(
                        cache_key,
                        CachedRoles {
                            response: response.clone(),
                            expires_at: Instant::now() + self.config.cache_ttl,
                        },
                    );
                }
                context.with_enrichment(&response)
            }
            Err(GuardError::Open) => {
                tracing::warn!(user_id = %user_id, "roles service circuit open, using token roles only");
                context.with_enrichment(&RolesResponse::empty(&user_id))
            }
            Err(GuardError::Exhausted(detail)) => {
                tracing::warn!(user_id = %user_id, error = %detail, "roles lookup failed, using token roles only");
                context.with_enrichment(&RolesResponse::empty(&user_id))
            }
        }
    }

    async fn fetch_roles(
        &self,
        user_id: &str,
        tenant: Option<&str>,
    ) -> anyhow::Result<RolesResponse> {
        let path = self.config.path.replace("{userId}", user_id);
        let url = format!("{}{}", self.config.base_url, path);

        let mut request = self.client.get(&url);
        if let Some(tenant) = tenant.filter(|tenant| !tenant.is_empty()) {
            request = request.header(TENANT_HEADER, tenant);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<RolesResponse>().await?)
    }
}
