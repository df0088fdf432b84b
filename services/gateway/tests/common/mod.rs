#![allow(dead_code)]
//! Shared harness for gateway integration tests: a throwaway RSA IdP
//! with a JWKS endpoint, an upstream stub, and a gateway wired exactly
//! like production.
use axum::extract::Request as AxumRequest;
use axum::http::StatusCode;
use axum::routing::delete;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::Algorithm;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::net::TcpListener;
use warden_authz::IdpProfile;
use warden_gateway::app::build_gateway;
use warden_gateway::config::GatewayConfig;
use warden_gateway::policy::PolicyWatcher;

pub const AUDIENCE: &str = "warden";

pub const DEFAULT_TEST_POLICY: &str = r#"
package authz

default allow = false

allow {
    input.user.roles[_] == "superadmin"
}

allow {
    startswith(input.request.path, "/api/admin/")
    input.user.roles[_] == "admin"
}

allow {
    input.resource.type == "users"
    input.resource.id == input.user.id
}
"#;

pub struct TestIdp {
    pub issuer: String,
    pub jwks_url: String,
    private_pem: String,
}

impl TestIdp {
    pub async fn spawn() -> Self {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("key");
        let public_key = RsaPublicKey::from(&key);
        let private_pem = key.to_pkcs1_pem(Default::default()).unwrap().to_string();

        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "kid": "kid-1",
                "alg": "RS256",
                "use": "sig",
                "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }]
        });

        let app = Router::new().route(
            "/jwks",
            axum::routing::get({
                let jwks = jwks.clone();
                move || {
                    let jwks = jwks.clone();
                    async move { Json(jwks) }
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });

        let issuer = format!("http://{addr}");
        Self {
            jwks_url: format!("{issuer}/jwks"),
            issuer,
            private_pem,
        }
    }

    pub fn mint(&self, claims: Value) -> String {
        let mut header = jsonwebtoken::Header::new(Algorithm::RS256);
        header.kid = Some("kid-1".to_string());
        jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("key"),
        )
        .expect("token")
    }

    /// Realm-dialect token with roles under `realm_access.roles`.
    pub fn token_with_roles(&self, subject: &str, roles: &[&str]) -> String {
        let now = epoch_seconds();
        self.mint(json!({
            "iss": self.issuer,
            "sub": subject,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 300,
            "realm_access": { "roles": roles },
        }))
    }

    pub fn profile(&self) -> IdpProfile {
        IdpProfile {
            name: "default".to_string(),
            issuer: self.issuer.clone(),
            audiences: vec![AUDIENCE.to_string()],
            jwks_url: Some(self.jwks_url.clone()),
            discovery_url: None,
            allowed_algs: vec!["RS256".to_string()],
        }
    }
}

pub fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Upstream stub: DELETE /api/super-secret answers 204, everything else
/// echoes the request back as JSON.
pub async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/api/super-secret",
            delete(|| async { StatusCode::NO_CONTENT }),
        )
        .fallback(|request: AxumRequest| async move {
            let headers = request.headers().clone();
            Json(json!({
                "path": request.uri().path(),
                "method": request.method().as_str(),
                "authUserId": headers.get("X-Auth-User-Id").and_then(|v| v.to_str().ok()),
                "authRoles": headers.get("X-Auth-User-Roles").and_then(|v| v.to_str().ok()),
                "requestId": headers.get("X-Request-ID").and_then(|v| v.to_str().ok()),
            }))
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    _watcher: Option<PolicyWatcher>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let gateway = build_gateway(Arc::new(config), None).expect("build gateway");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = gateway.router;
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    TestGateway {
        addr,
        client: reqwest::Client::new(),
        _watcher: gateway.policy_watcher,
        _sweeper: gateway.sweeper,
    }
}

/// Baseline config: auth against the test IdP, embedded policy from
/// `policy_dir`, roles service off, rate limiting off.
pub fn base_config(upstream: SocketAddr, idp: &TestIdp, policy_dir: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.proxy.host = upstream.ip().to_string();
    config.proxy.port = upstream.port();
    config.auth.profiles = vec![idp.profile()];
    config.authz.roles_service.enabled = false;
    config.opa.policy_dirs = vec![policy_dir.to_path_buf()];
    config
}

pub fn write_policy(dir: &TempDir, contents: &str) {
    std::fs::write(dir.path().join("authz.rego"), contents).expect("write policy");
}

pub fn default_policy_dir() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    write_policy(&dir, DEFAULT_TEST_POLICY);
    dir
}
