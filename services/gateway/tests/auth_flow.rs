//! Authentication-edge behavior: 401s, public-path bypass, disabled auth.
mod common;

use common::*;
use reqwest::StatusCode;

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_yields_401_with_challenge() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let gateway = spawn_gateway(base_config(upstream, &idp, policy_dir.path())).await;

    let response = gateway
        .client
        .get(gateway.url("/api/orders"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer")
    );
    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["message"], "Authentication required");
}

#[tokio::test(flavor = "multi_thread")]
async fn garbage_token_yields_401() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let gateway = spawn_gateway(base_config(upstream, &idp, policy_dir.path())).await;

    let response = gateway
        .client
        .get(gateway.url("/api/orders"))
        .header("Authorization", "Bearer not.a.token")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_token_yields_401() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let gateway = spawn_gateway(base_config(upstream, &idp, policy_dir.path())).await;

    let now = epoch_seconds();
    let token = idp.mint(serde_json::json!({
        "iss": idp.issuer,
        "sub": "user-1",
        "aud": AUDIENCE,
        "iat": now - 7200,
        "exp": now - 3600,
    }));

    let response = gateway
        .client
        .get(gateway.url("/api/orders"))
        .bearer_auth(token)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn public_path_bypasses_authentication() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let mut config = base_config(upstream, &idp, policy_dir.path());
    config.auth.public_paths = vec!["/api/public/**".to_string()];
    let gateway = spawn_gateway(config).await;

    // No Authorization header at all.
    let response = gateway
        .client
        .get(gateway.url("/api/public/info"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["path"], "/api/public/info");
    // No principal headers are injected for anonymous pass-through.
    assert!(body["authUserId"].is_null());
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_auth_proxies_anonymously() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let mut config = base_config(upstream, &idp, policy_dir.path());
    config.auth.enabled = false;
    let gateway = spawn_gateway(config).await;

    let response = gateway
        .client
        .get(gateway.url("/api/anything"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("body");
    assert!(body["authUserId"].is_null());
}

#[tokio::test(flavor = "multi_thread")]
async fn reserved_paths_answer_from_the_gateway() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let gateway = spawn_gateway(base_config(upstream, &idp, policy_dir.path())).await;

    for path in ["/health", "/live", "/q/health"] {
        let response = gateway
            .client
            .get(gateway.url(path))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK, "path {path}");
        let body: serde_json::Value = response.json().await.expect("body");
        assert_eq!(body["status"], "ok");
    }

    let ready = gateway
        .client
        .get(gateway.url("/ready"))
        .send()
        .await
        .expect("request");
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn readiness_fails_without_policy_module() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    // Point the loader at a directory with no sources.
    let empty_dir = tempfile::TempDir::new().unwrap();
    let gateway = spawn_gateway(base_config(upstream, &idp, empty_dir.path())).await;

    let response = gateway
        .client
        .get(gateway.url("/ready"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread")]
async fn entra_tokens_resolve_to_the_entra_profile() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();

    let entra_issuer = "https://sts.windows.net/tid-1/";
    let mut config = base_config(upstream, &idp, policy_dir.path());
    config.auth.profiles = vec![warden_authz::IdpProfile {
        name: "entra".to_string(),
        issuer: entra_issuer.to_string(),
        audiences: vec![AUDIENCE.to_string()],
        jwks_url: Some(idp.jwks_url.clone()),
        discovery_url: None,
        allowed_algs: vec!["RS256".to_string()],
    }];
    let gateway = spawn_gateway(config).await;

    // The issuer sniff picks the entra profile without any header; the
    // claim dialect maps oid -> user id and roles/groups -> roles.
    let now = epoch_seconds();
    let token = idp.mint(serde_json::json!({
        "iss": entra_issuer,
        "sub": "pairwise-sub",
        "oid": "object-1",
        "tid": "tid-1",
        "aud": AUDIENCE,
        "iat": now,
        "exp": now + 300,
        "roles": ["superadmin"],
    }));

    let response = gateway
        .client
        .get(gateway.url("/api/widgets"))
        .bearer_auth(token)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["authUserId"], "object-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_request_id_is_preserved() {
    let upstream = spawn_upstream().await;
    let idp = TestIdp::spawn().await;
    let policy_dir = default_policy_dir();
    let mut config = base_config(upstream, &idp, policy_dir.path());
    config.auth.public_paths = vec!["/api/public/**".to_string()];
    let gateway = spawn_gateway(config).await;

    let response = gateway
        .client
        .get(gateway.url("/api/public/info"))
        .header("X-Request-ID", "trace-me-42")
        .send()
        .await
        .expect("request");
    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["requestId"], "trace-me-42");
}
