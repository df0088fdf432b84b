//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Assembles the gateway's components from configuration and builds the
//! Axum router: the gateway's own reserved endpoints (health, readiness,
//! metrics) plus the catch-all fallback that funnels every other path
//! and method through the request pipeline.
//!
//! # Notes
//! Reserved paths are answered before the pipeline runs, so they bypass
//! authentication by construction. This module centralizes wiring so
//! `main` stays small and integration tests exercise the production
//! composition.
use arc_swap::ArcSwapOption;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use warden_authz::TokenValidator;

use crate::audit::AuditLogger;
use crate::config::{GatewayConfig, PolicyMode};
use crate::error::ErrorBody;
use crate::pipeline::Pipeline;
use crate::policy::{
    DecisionBackend, EmbeddedBackend, ExternalBackend, PolicyEngine, PolicyLoader, PolicySlot,
    PolicyWatcher,
};
use crate::proxy::Proxy;
use crate::rate_limit::RateLimiter;
use crate::roles::RolesEnricher;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<GatewayConfig>,
    // Present only in embedded policy mode; readiness keys off it.
    pub policy_slot: Option<PolicySlot>,
    pub metrics: Option<PrometheusHandle>,
}

/// A fully wired gateway. The watcher and sweeper handles must stay
/// alive for hot-reload and bucket eviction to keep running.
pub struct Gateway {
    pub router: Router,
    pub policy_watcher: Option<PolicyWatcher>,
    pub sweeper: tokio::task::JoinHandle<()>,
}

pub fn build_gateway(
    config: Arc<GatewayConfig>,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<Gateway> {
    let shared_client = reqwest::Client::new();

    let validator = TokenValidator::new(
        shared_client.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
        60,
    );

    let slot: PolicySlot = Arc::new(ArcSwapOption::empty());
    let backend: Arc<dyn DecisionBackend> = match config.opa.mode {
        PolicyMode::Embedded => Arc::new(EmbeddedBackend::new(slot.clone())),
        PolicyMode::External => Arc::new(ExternalBackend::new(
            shared_client.clone(),
            &config.opa.url,
            &config.opa.decision_path,
        )),
    };
    let engine = Arc::new(PolicyEngine::new(
        config.opa.enabled,
        backend,
        config.opa.decision_cache_ttl,
        config.opa.timeout,
    ));

    let embedded = config.opa.enabled && config.opa.mode == PolicyMode::Embedded;
    let mut policy_watcher = None;
    if embedded {
        let loader = Arc::new(PolicyLoader::new(
            config.opa.policy_dirs.clone(),
            config.opa.decision_query(),
            slot.clone(),
        ));
        if let Err(err) = loader.load() {
            tracing::error!(
                error = %err,
                "initial policy load failed; requests will be denied until a module loads"
            );
        }
        let engine_for_reload = engine.clone();
        policy_watcher = loader.spawn_watcher(move || engine_for_reload.invalidate_cache())?;
    }

    let enricher = RolesEnricher::new(config.authz.roles_service.clone(), shared_client);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.requests_per_second,
        config.rate_limit.burst_size,
    ));
    let sweeper = limiter.clone().spawn_sweeper(SWEEP_INTERVAL, SWEEP_INTERVAL);
    let proxy = Proxy::new(config.proxy.clone())?;
    let audit = AuditLogger::new(config.audit.clone());

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        validator,
        enricher,
        engine,
        proxy,
        limiter,
        audit,
    ));

    let state = AppState {
        pipeline,
        config,
        policy_slot: embedded.then_some(slot),
        metrics,
    };

    Ok(Gateway {
        router: build_router(state),
        policy_watcher,
        sweeper,
    })
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route("/health", get(health))
        .route("/live", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(render_metrics))
        .route("/q/health", get(health))
        .route("/q/*rest", get(reserved_not_found))
        .fallback(proxy_entry)
        .layer(trace_layer)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

// A bug in a handler must become a clean 500, never a dropped
// connection, and never leak panic payloads to the caller.
fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<axum::body::Body> {
    tracing::error!("request handler panicked");
    crate::error::internal_error()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// Readiness reflects whether a policy module is loaded in embedded mode;
// a gateway that would deny everything is not ready to take traffic.
async fn ready(State(state): State<AppState>) -> Response {
    if let Some(slot) = &state.policy_slot {
        if state.config.authz.enabled && slot.load_full().is_none() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "reason": "policy module not loaded"
                })),
            )
                .into_response();
        }
    }
    Json(serde_json::json!({ "status": "ready" })).into_response()
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reserved_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new("not_found", "unknown internal path")),
    )
        .into_response()
}

async fn proxy_entry(State(state): State<AppState>, request: Request) -> Response {
    state.pipeline.handle(request).await
}
