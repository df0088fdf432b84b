// Warden Gateway
// --------------
// This binary is the per-pod request gateway. It shares the pod's network
// namespace with the protected application: the backend binds only to
// loopback, and all external ingress funnels through this process.
//
// Request path (per request, strictly sequential):
// - tag with X-Request-ID (inbound value or a fresh v4 UUID)
// - public-path / reserved-path bypass
// - token-bucket rate limiting (pre-auth by client IP, post-auth by principal)
// - bearer validation against the resolved IdP profile (JWKS-backed)
// - claim normalization into one caller shape across IdP dialects
// - roles enrichment from the external roles service (cached, guarded)
// - policy evaluation (in-process Rego module or external decision service)
// - upstream forwarding with principal header injection
// - one audit record, always
//
// Shared mutable state is limited to the JWKS cache, the policy module
// pointer (hot-reloaded from the policy directory), and the rate-limiter
// bucket map.
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use warden_gateway::app::build_gateway;
use warden_gateway::config::GatewayConfig;
use warden_gateway::observability;

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability();

    let config = Arc::new(GatewayConfig::from_env_or_yaml()?);
    let gateway = build_gateway(config.clone(), Some(metrics_handle.clone()))?;

    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        target = %config.proxy.target_base(),
        "warden gateway listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let serve = axum::serve(
        listener,
        gateway
            .router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
    });

    let mut drain_rx = shutdown_rx;
    let grace = config.shutdown_grace;
    tokio::select! {
        result = serve => result?,
        _ = async move {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("drain window elapsed before all requests finished");
        }
    }

    gateway.sweeper.abort();
    drop(gateway.policy_watcher);
    tracing::info!("warden gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
