//! Per-request orchestration.
//!
//! # Purpose
//! Drives the ordered filter chain for every proxied request: request-id
//! tagging, public-path bypass, rate limiting, authentication, claim
//! normalization, roles enrichment, policy evaluation, upstream
//! forwarding, and the final audit record. Every stage returns a
//! [`Flow`] value; nothing is thrown across stages and errors never
//! bubble past this module.
use axum::body::Bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use warden_authz::{claims, matcher, tenant, AuthContext, IdpDialect, TokenValidator};

use crate::audit::AuditLogger;
use crate::config::GatewayConfig;
use crate::error;
use crate::policy::PolicyEngine;
use crate::proxy::Proxy;
use crate::rate_limit::{client_ip, RateDecision, RateLimiter};
use crate::roles::RolesEnricher;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Outcome of one pipeline stage: carry on with the (possibly replaced)
/// context, or answer immediately.
enum Flow {
    Continue(AuthContext),
    Respond(Response),
}

pub struct Pipeline {
    config: Arc<GatewayConfig>,
    validator: TokenValidator,
    enricher: RolesEnricher,
    engine: Arc<PolicyEngine>,
    proxy: Proxy,
    limiter: Arc<RateLimiter>,
    audit: AuditLogger,
}

impl Pipeline {
    pub fn new(
        config: Arc<GatewayConfig>,
        validator: TokenValidator,
        enricher: RolesEnricher,
        engine: Arc<PolicyEngine>,
        proxy: Proxy,
        limiter: Arc<RateLimiter>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            config,
            validator,
            enricher,
            engine,
            proxy,
            limiter,
            audit,
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let start = Instant::now();
        let (parts, body) = request.into_parts();
        let method = parts.method;
        let uri = parts.uri;
        let headers = parts.headers;
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let path = uri.path().to_string();
        let path_and_query = uri
            .path_and_query()
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| path.clone());
        let query = uri.query().map(str::to_string);

        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Armed until the normal emit below; fires from Drop when the
        // caller disconnects and this future is cancelled, so every
        // request leaves exactly one audit record.
        let mut pending = PendingAudit {
            audit: self.audit.clone(),
            request_id: request_id.clone(),
            method: method.as_str().to_string(),
            path: path.clone(),
            query: query.clone(),
            remote_address: client_ip(&headers, remote),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            headers: header_snapshot(&headers),
            start,
            armed: true,
        };

        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read request body");
                Bytes::new()
            }
        };

        let run = self.run(
            &method,
            &path,
            &path_and_query,
            query.as_deref(),
            &headers,
            body,
            remote,
            &request_id,
        );
        let (response, context) = match tokio::time::timeout(self.config.request_budget, run).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(path = %path, "request budget exceeded");
                (error::gateway_timeout(), AuthContext::anonymous())
            }
        };

        pending.armed = false;
        self.audit.emit(
            &request_id,
            &context,
            method.as_str(),
            &path,
            query.as_deref(),
            &pending.remote_address,
            pending.user_agent.as_deref(),
            &pending.headers,
            response.status().as_u16(),
            start.elapsed().as_millis() as u64,
        );

        response
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        method: &Method,
        path: &str,
        path_and_query: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
        remote: Option<SocketAddr>,
        request_id: &str,
    ) -> (Response, AuthContext) {
        // Public paths skip authentication and authorization entirely.
        if matcher::matches_any(path, &self.config.auth.public_paths) {
            let context = AuthContext::anonymous();
            let response = self
                .proxy
                .forward(method, path_and_query, headers, body, &context, request_id)
                .await;
            return (response, context);
        }

        // Cheap pre-auth limit protects the validation path itself.
        if self.config.rate_limit.enabled {
            let key = format!("ip:{}", client_ip(headers, remote));
            if let RateDecision::Limited { retry_after_secs } = self.limiter.check(&key) {
                tracing::warn!(key = %key, "rate limit exceeded");
                metrics::counter!("warden_rate_limit_exceeded_total").increment(1);
                return (
                    error::too_many_requests(retry_after_secs),
                    AuthContext::anonymous(),
                );
            }
        }

        let context = if self.config.auth.enabled {
            match self.authenticate(headers).await {
                Flow::Continue(context) => context,
                Flow::Respond(response) => return (response, AuthContext::anonymous()),
            }
        } else {
            AuthContext::anonymous()
        };

        // Principal-keyed limit once the caller is known.
        if self.config.rate_limit.enabled && context.is_authenticated() {
            let key = format!("user:{}", context.user_id);
            if let RateDecision::Limited { retry_after_secs } = self.limiter.check(&key) {
                tracing::warn!(key = %key, "rate limit exceeded");
                metrics::counter!("warden_rate_limit_exceeded_total").increment(1);
                return (error::too_many_requests(retry_after_secs), context);
            }
        }

        let context = self.enricher.enrich(context).await;

        if self.config.auth.enabled && self.config.authz.enabled {
            let outcome = self
                .engine
                .evaluate(
                    &context,
                    method.as_str(),
                    path,
                    header_snapshot(headers),
                    parse_query(query),
                )
                .await;
            match outcome {
                Ok(decision) if !decision.allowed => {
                    tracing::warn!(
                        user_id = %context.user_id,
                        method = %method,
                        path = %path,
                        reason = decision.reason.as_deref().unwrap_or("Access denied"),
                        "authorization denied"
                    );
                    return (
                        error::forbidden(decision.reason.as_deref(), &decision.violations),
                        context,
                    );
                }
                Ok(_) => {}
                Err(unavailable) => {
                    return (error::service_unavailable(&unavailable.0), context);
                }
            }
        }

        let response = self
            .proxy
            .forward(method, path_and_query, headers, body, &context, request_id)
            .await;
        (response, context)
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Flow {
        let started = Instant::now();

        let Some(token) = extract_bearer(
            headers,
            &self.config.auth.token_header,
            &self.config.auth.token_prefix,
        ) else {
            metrics::counter!("warden_auth_failure_total").increment(1);
            return Flow::Respond(error::unauthorized());
        };

        let tenant_header = headers
            .get(tenant::TENANT_HEADER)
            .and_then(|value| value.to_str().ok());
        let profile_name = tenant::resolve_profile(tenant_header, Some(token));
        let profile = self
            .config
            .auth
            .profile(&profile_name)
            .or_else(|| self.config.auth.profile(tenant::DEFAULT_PROFILE));
        let Some(profile) = profile else {
            tracing::warn!(profile = %profile_name, "no IdP profile configured");
            metrics::counter!("warden_auth_failure_total").increment(1);
            return Flow::Respond(error::unauthorized());
        };

        let outcome = self.validator.validate(token, profile).await;
        metrics::histogram!("warden_auth_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(verified) => {
                let issuer = verified
                    .get("iss")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                let context = claims::normalize(&verified, IdpDialect::from_issuer(issuer));
                if !context.is_authenticated() {
                    metrics::counter!("warden_auth_failure_total").increment(1);
                    return Flow::Respond(error::unauthorized());
                }
                metrics::counter!("warden_auth_success_total").increment(1);
                Flow::Continue(context)
            }
            Err(err) => {
                tracing::warn!(error = %err, profile = %profile.name, "token validation failed");
                metrics::counter!("warden_auth_failure_total").increment(1);
                Flow::Respond(error::unauthorized())
            }
        }
    }
}

// Emits an aborted-request audit record if the pipeline future is
// dropped before the normal emit runs (caller disconnect, server drain).
struct PendingAudit {
    audit: AuditLogger,
    request_id: String,
    method: String,
    path: String,
    query: Option<String>,
    remote_address: String,
    user_agent: Option<String>,
    headers: BTreeMap<String, String>,
    start: Instant,
    armed: bool,
}

impl Drop for PendingAudit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // 499: client closed the request before a response was produced.
        self.audit.emit(
            &self.request_id,
            &AuthContext::anonymous(),
            &self.method,
            &self.path,
            self.query.as_deref(),
            &self.remote_address,
            self.user_agent.as_deref(),
            &self.headers,
            499,
            self.start.elapsed().as_millis() as u64,
        );
    }
}

fn extract_bearer<'a>(headers: &'a HeaderMap, header_name: &str, prefix: &str) -> Option<&'a str> {
    let value = headers.get(header_name)?.to_str().ok()?;
    let token = value.strip_prefix(prefix)?.strip_prefix(' ')?;
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn header_snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let Some(query) = query else {
        return BTreeMap::new();
    };
    let mut params = BTreeMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        // First value wins, matching upstream multi-value handling.
        params
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    params
}
