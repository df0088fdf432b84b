use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use warden_authz::IdpProfile;

// Gateway configuration sourced from environment variables, with an
// optional YAML override file (WARDEN_CONFIG). Read once at startup and
// never mutated; only policy artifacts hot-reload.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // Bind address for the proxying listener.
    pub bind_addr: SocketAddr,
    // Metrics HTTP bind address.
    pub metrics_bind: SocketAddr,
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
    pub authz: AuthzConfig,
    pub opa: OpaConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    // Hard per-request budget; exceeding it aborts with 504.
    pub request_budget: Duration,
    // Drain window for in-flight requests on shutdown.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    // Inbound headers copied onto the upstream request.
    pub propagate_headers: Vec<String>,
    // Extra upstream headers; values may carry ${user.*} placeholders.
    pub add_headers: BTreeMap<String, String>,
}

impl ProxyConfig {
    pub fn target_base(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub public_paths: Vec<String>,
    pub token_header: String,
    pub token_prefix: String,
    pub profiles: Vec<IdpProfile>,
}

impl AuthConfig {
    pub fn profile(&self, name: &str) -> Option<&IdpProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub enabled: bool,
    pub roles_service: RolesServiceConfig,
}

#[derive(Debug, Clone)]
pub struct RolesServiceConfig {
    pub enabled: bool,
    pub base_url: String,
    // `{userId}` is replaced with the percent-safe user id.
    pub path: String,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Embedded,
    External,
}

#[derive(Debug, Clone)]
pub struct OpaConfig {
    pub enabled: bool,
    pub mode: PolicyMode,
    pub url: String,
    pub decision_path: String,
    pub timeout: Duration,
    // First existing directory wins: bind-mount path, then dev path.
    pub policy_dirs: Vec<PathBuf>,
    pub default_package: String,
    pub default_rule: String,
    pub decision_cache_ttl: Duration,
}

impl OpaConfig {
    pub fn decision_query(&self) -> String {
        format!("data.{}.{}", self.default_package, self.default_rule)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub sensitive_headers: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("default bind"),
            metrics_bind: "0.0.0.0:9090".parse().expect("default metrics bind"),
            proxy: ProxyConfig {
                scheme: "http".to_string(),
                host: "localhost".to_string(),
                port: 8081,
                connect_timeout: Duration::from_millis(5000),
                read_timeout: Duration::from_millis(30000),
                propagate_headers: vec![
                    "X-Request-ID".to_string(),
                    "X-Correlation-ID".to_string(),
                    "X-Forwarded-For".to_string(),
                    "X-Forwarded-Proto".to_string(),
                ],
                add_headers: BTreeMap::new(),
            },
            auth: AuthConfig {
                enabled: true,
                public_paths: Vec::new(),
                token_header: "Authorization".to_string(),
                token_prefix: "Bearer".to_string(),
                profiles: Vec::new(),
            },
            authz: AuthzConfig {
                enabled: true,
                roles_service: RolesServiceConfig {
                    enabled: true,
                    base_url: "http://localhost:8082".to_string(),
                    path: "/api/v1/users/{userId}/roles".to_string(),
                    cache_enabled: true,
                    cache_ttl: Duration::from_secs(300),
                },
            },
            opa: OpaConfig {
                enabled: true,
                mode: PolicyMode::Embedded,
                url: "http://localhost:8181".to_string(),
                decision_path: "/v1/data/authz/allow".to_string(),
                timeout: Duration::from_millis(3000),
                policy_dirs: vec![PathBuf::from("/policies"), PathBuf::from("policies")],
                default_package: "authz".to_string(),
                default_rule: "allow".to_string(),
                decision_cache_ttl: Duration::from_secs(10),
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_second: 100,
                burst_size: 200,
            },
            audit: AuditConfig {
                enabled: true,
                sensitive_headers: vec![
                    "Authorization".to_string(),
                    "Cookie".to_string(),
                    "X-Api-Key".to_string(),
                ],
            },
            request_budget: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(15),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("WARDEN_BIND") {
            config.bind_addr = value.parse().with_context(|| "parse WARDEN_BIND")?;
        }
        if let Ok(value) = std::env::var("WARDEN_METRICS_BIND") {
            config.metrics_bind = value.parse().with_context(|| "parse WARDEN_METRICS_BIND")?;
        }
        if let Ok(value) = std::env::var("WARDEN_TARGET_SCHEME") {
            config.proxy.scheme = value;
        }
        if let Ok(value) = std::env::var("WARDEN_TARGET_HOST") {
            config.proxy.host = value;
        }
        if let Ok(value) = std::env::var("WARDEN_TARGET_PORT") {
            config.proxy.port = value.parse().with_context(|| "parse WARDEN_TARGET_PORT")?;
        }
        if let Ok(value) = std::env::var("WARDEN_AUTH_ENABLED") {
            config.auth.enabled = parse_bool(&value).with_context(|| "parse WARDEN_AUTH_ENABLED")?;
        }
        if let Ok(value) = std::env::var("WARDEN_PUBLIC_PATHS") {
            config.auth.public_paths = parse_list(&value);
        }
        if let Ok(issuer) = std::env::var("WARDEN_OIDC_DEFAULT_ISSUER") {
            config.auth.profiles.push(IdpProfile {
                name: warden_authz::DEFAULT_PROFILE.to_string(),
                issuer,
                audiences: std::env::var("WARDEN_OIDC_DEFAULT_AUDIENCES")
                    .map(|value| parse_list(&value))
                    .unwrap_or_default(),
                jwks_url: std::env::var("WARDEN_OIDC_DEFAULT_JWKS_URL").ok(),
                discovery_url: None,
                allowed_algs: vec!["RS256".to_string()],
            });
        }
        if let Ok(issuer) = std::env::var("WARDEN_OIDC_ENTRA_ISSUER") {
            config.auth.profiles.push(IdpProfile {
                name: warden_authz::ENTRA_PROFILE.to_string(),
                issuer,
                audiences: std::env::var("WARDEN_OIDC_ENTRA_AUDIENCES")
                    .map(|value| parse_list(&value))
                    .unwrap_or_default(),
                jwks_url: std::env::var("WARDEN_OIDC_ENTRA_JWKS_URL").ok(),
                discovery_url: None,
                allowed_algs: vec!["RS256".to_string()],
            });
        }
        if let Ok(value) = std::env::var("WARDEN_AUTHZ_ENABLED") {
            config.authz.enabled =
                parse_bool(&value).with_context(|| "parse WARDEN_AUTHZ_ENABLED")?;
        }
        if let Ok(value) = std::env::var("WARDEN_ROLES_ENABLED") {
            config.authz.roles_service.enabled =
                parse_bool(&value).with_context(|| "parse WARDEN_ROLES_ENABLED")?;
        }
        if let Ok(value) = std::env::var("WARDEN_ROLES_URL") {
            config.authz.roles_service.base_url = value.trim_end_matches('/').to_string();
        }
        if let Ok(value) = std::env::var("WARDEN_OPA_ENABLED") {
            config.opa.enabled = parse_bool(&value).with_context(|| "parse WARDEN_OPA_ENABLED")?;
        }
        if let Ok(value) = std::env::var("WARDEN_OPA_MODE") {
            config.opa.mode = match value.as_str() {
                "embedded" => PolicyMode::Embedded,
                "external" => PolicyMode::External,
                other => anyhow::bail!("unknown WARDEN_OPA_MODE: {other}"),
            };
        }
        if let Ok(value) = std::env::var("WARDEN_OPA_URL") {
            config.opa.url = value.trim_end_matches('/').to_string();
        }
        if let Ok(value) = std::env::var("WARDEN_OPA_DECISION_PATH") {
            config.opa.decision_path = value;
        }
        if let Ok(value) = std::env::var("WARDEN_POLICY_DIRS") {
            config.opa.policy_dirs = parse_list(&value).into_iter().map(PathBuf::from).collect();
        }
        if let Ok(value) = std::env::var("WARDEN_RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled =
                parse_bool(&value).with_context(|| "parse WARDEN_RATE_LIMIT_ENABLED")?;
        }
        if let Ok(value) = std::env::var("WARDEN_RATE_LIMIT_RPS") {
            config.rate_limit.requests_per_second = value
                .parse()
                .with_context(|| "parse WARDEN_RATE_LIMIT_RPS")?;
        }
        if let Ok(value) = std::env::var("WARDEN_RATE_LIMIT_BURST") {
            config.rate_limit.burst_size = value
                .parse()
                .with_context(|| "parse WARDEN_RATE_LIMIT_BURST")?;
        }
        if let Ok(value) = std::env::var("WARDEN_AUDIT_ENABLED") {
            config.audit.enabled =
                parse_bool(&value).with_context(|| "parse WARDEN_AUDIT_ENABLED")?;
        }

        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read WARDEN_CONFIG: {path}"))?;
            let overrides: ConfigFile =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            overrides.apply(&mut config)?;
        }
        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => anyhow::bail!("expected boolean, got {other:?}"),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

// YAML override file shape. Every field is optional; absent fields keep
// their env/default value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    proxy: Option<ProxyFile>,
    auth: Option<AuthFile>,
    authz: Option<AuthzFile>,
    opa: Option<OpaFile>,
    rate_limit: Option<RateLimitFile>,
    audit: Option<AuditFile>,
    request_budget_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProxyFile {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    propagate_headers: Option<Vec<String>>,
    add_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthFile {
    enabled: Option<bool>,
    public_paths: Option<Vec<String>>,
    token_header: Option<String>,
    token_prefix: Option<String>,
    profiles: Option<Vec<IdpProfile>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthzFile {
    enabled: Option<bool>,
    roles_service: Option<RolesServiceFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RolesServiceFile {
    enabled: Option<bool>,
    base_url: Option<String>,
    path: Option<String>,
    cache_enabled: Option<bool>,
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpaFile {
    enabled: Option<bool>,
    mode: Option<PolicyMode>,
    url: Option<String>,
    decision_path: Option<String>,
    timeout_ms: Option<u64>,
    policy_dirs: Option<Vec<PathBuf>>,
    default_package: Option<String>,
    default_rule: Option<String>,
    decision_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitFile {
    enabled: Option<bool>,
    requests_per_second: Option<u32>,
    burst_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuditFile {
    enabled: Option<bool>,
    sensitive_headers: Option<Vec<String>>,
}

impl ConfigFile {
    fn apply(self, config: &mut GatewayConfig) -> Result<()> {
        if let Some(value) = self.bind_addr {
            config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = self.metrics_bind {
            config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(proxy) = self.proxy {
            if let Some(value) = proxy.scheme {
                config.proxy.scheme = value;
            }
            if let Some(value) = proxy.host {
                config.proxy.host = value;
            }
            if let Some(value) = proxy.port {
                config.proxy.port = value;
            }
            if let Some(value) = proxy.connect_timeout_ms {
                config.proxy.connect_timeout = Duration::from_millis(value);
            }
            if let Some(value) = proxy.read_timeout_ms {
                config.proxy.read_timeout = Duration::from_millis(value);
            }
            if let Some(value) = proxy.propagate_headers {
                config.proxy.propagate_headers = value;
            }
            if let Some(value) = proxy.add_headers {
                config.proxy.add_headers = value;
            }
        }
        if let Some(auth) = self.auth {
            if let Some(value) = auth.enabled {
                config.auth.enabled = value;
            }
            if let Some(value) = auth.public_paths {
                config.auth.public_paths = value;
            }
            if let Some(value) = auth.token_header {
                config.auth.token_header = value;
            }
            if let Some(value) = auth.token_prefix {
                config.auth.token_prefix = value;
            }
            if let Some(value) = auth.profiles {
                config.auth.profiles = value;
            }
        }
        if let Some(authz) = self.authz {
            if let Some(value) = authz.enabled {
                config.authz.enabled = value;
            }
            if let Some(roles) = authz.roles_service {
                if let Some(value) = roles.enabled {
                    config.authz.roles_service.enabled = value;
                }
                if let Some(value) = roles.base_url {
                    config.authz.roles_service.base_url =
                        value.trim_end_matches('/').to_string();
                }
                if let Some(value) = roles.path {
                    config.authz.roles_service.path = value;
                }
                if let Some(value) = roles.cache_enabled {
                    config.authz.roles_service.cache_enabled = value;
                }
                if let Some(value) = roles.cache_ttl_secs {
                    config.authz.roles_service.cache_ttl = Duration::from_secs(value);
                }
            }
        }
        if let Some(opa) = self.opa {
            if let Some(value) = opa.enabled {
                config.opa.enabled = value;
            }
            if let Some(value) = opa.mode {
                config.opa.mode = value;
            }
            if let Some(value) = opa.url {
                config.opa.url = value.trim_end_matches('/').to_string();
            }
            if let Some(value) = opa.decision_path {
                config.opa.decision_path = value;
            }
            if let Some(value) = opa.timeout_ms {
                config.opa.timeout = Duration::from_millis(value);
            }
            if let Some(value) = opa.policy_dirs {
                config.opa.policy_dirs = value;
            }
            if let Some(value) = opa.default_package {
                config.opa.default_package = value;
            }
            if let Some(value) = opa.default_rule {
                config.opa.default_rule = value;
            }
            if let Some(value) = opa.decision_cache_ttl_secs {
                config.opa.decision_cache_ttl = Duration::from_secs(value);
            }
        }
        if let Some(rate_limit) = self.rate_limit {
            if let Some(value) = rate_limit.enabled {
                config.rate_limit.enabled = value;
            }
            if let Some(value) = rate_limit.requests_per_second {
                config.rate_limit.requests_per_second = value;
            }
            if let Some(value) = rate_limit.burst_size {
                config.rate_limit.burst_size = value;
            }
        }
        if let Some(audit) = self.audit {
            if let Some(value) = audit.enabled {
                config.audit.enabled = value;
            }
            if let Some(value) = audit.sensitive_headers {
                config.audit.sensitive_headers = value;
            }
        }
        if let Some(value) = self.request_budget_secs {
            config.request_budget = Duration::from_secs(value);
        }
        if let Some(value) = self.shutdown_grace_secs {
            config.shutdown_grace = Duration::from_secs(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    // Helper to clear all Warden env vars
    fn clear_warden_env() {
        for (key, _) in env::vars() {
            if key.starts_with("WARDEN_") {
                env::remove_var(key);
            }
        }
    }

    #[serial]
    #[test]
    fn defaults_match_documented_values() {
        clear_warden_env();
        let config = GatewayConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.proxy.target_base(), "http://localhost:8081");
        assert_eq!(config.proxy.read_timeout, Duration::from_millis(30000));
        assert!(config.auth.enabled);
        assert!(config.authz.enabled);
        assert_eq!(
            config.authz.roles_service.path,
            "/api/v1/users/{userId}/roles"
        );
        assert_eq!(config.opa.mode, PolicyMode::Embedded);
        assert_eq!(config.opa.decision_query(), "data.authz.allow");
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.requests_per_second, 100);
        assert_eq!(config.rate_limit.burst_size, 200);
        assert!(config.audit.enabled);
        assert_eq!(config.audit.sensitive_headers.len(), 3);
        assert_eq!(config.request_budget, Duration::from_secs(10));
    }

    #[serial]
    #[test]
    fn env_overrides_are_applied() {
        clear_warden_env();
        env::set_var("WARDEN_BIND", "127.0.0.1:9443");
        env::set_var("WARDEN_TARGET_PORT", "3000");
        env::set_var("WARDEN_OPA_MODE", "external");
        env::set_var("WARDEN_OPA_URL", "http://opa:8181/");
        env::set_var("WARDEN_PUBLIC_PATHS", "/api/public/**, /docs/*");
        env::set_var("WARDEN_RATE_LIMIT_ENABLED", "true");

        let config = GatewayConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9443");
        assert_eq!(config.proxy.port, 3000);
        assert_eq!(config.opa.mode, PolicyMode::External);
        assert_eq!(config.opa.url, "http://opa:8181");
        assert_eq!(
            config.auth.public_paths,
            vec!["/api/public/**".to_string(), "/docs/*".to_string()]
        );
        assert!(config.rate_limit.enabled);

        clear_warden_env();
    }

    #[serial]
    #[test]
    fn env_builds_idp_profiles() {
        clear_warden_env();
        env::set_var(
            "WARDEN_OIDC_DEFAULT_ISSUER",
            "https://idp.example.com/realms/acme",
        );
        env::set_var("WARDEN_OIDC_DEFAULT_AUDIENCES", "backend,account");
        env::set_var(
            "WARDEN_OIDC_ENTRA_ISSUER",
            "https://login.microsoftonline.com/tid/v2.0",
        );

        let config = GatewayConfig::from_env().expect("from_env");
        assert_eq!(config.auth.profiles.len(), 2);
        let default = config.auth.profile("default").expect("default profile");
        assert_eq!(default.audiences, vec!["backend", "account"]);
        assert!(config.auth.profile("entra").is_some());
        assert!(config.auth.profile("missing").is_none());

        clear_warden_env();
    }

    #[serial]
    #[test]
    fn invalid_env_values_fail() {
        clear_warden_env();
        env::set_var("WARDEN_BIND", "not-an-address");
        assert!(GatewayConfig::from_env().is_err());
        clear_warden_env();

        env::set_var("WARDEN_OPA_MODE", "sideways");
        assert!(GatewayConfig::from_env().is_err());
        clear_warden_env();
    }

    #[serial]
    #[test]
    fn yaml_override_applies_nested_sections() {
        clear_warden_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("warden.yml");
        fs::write(
            &config_path,
            r#"
bind_addr: "127.0.0.1:7443"
proxy:
  host: "backend.local"
  port: 9000
  read_timeout_ms: 1500
auth:
  enabled: true
  public_paths: ["/api/public/**"]
  profiles:
    - name: default
      issuer: "https://idp.example.com/realms/acme"
      audiences: ["backend"]
      jwks_url: "https://idp.example.com/realms/acme/protocol/openid-connect/certs"
opa:
  mode: external
  url: "http://opa:8181"
rate_limit:
  enabled: true
  requests_per_second: 5
  burst_size: 10
"#,
        )
        .unwrap();
        env::set_var("WARDEN_CONFIG", config_path.to_str().unwrap());

        let config = GatewayConfig::from_env_or_yaml().expect("from_env_or_yaml");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7443");
        assert_eq!(config.proxy.host, "backend.local");
        assert_eq!(config.proxy.read_timeout, Duration::from_millis(1500));
        assert_eq!(config.auth.profiles.len(), 1);
        assert_eq!(config.opa.mode, PolicyMode::External);
        assert_eq!(config.rate_limit.requests_per_second, 5);
        // Untouched sections keep their defaults.
        assert!(config.audit.enabled);

        clear_warden_env();
    }

    #[serial]
    #[test]
    fn yaml_file_not_found_fails() {
        clear_warden_env();
        let tmpdir = TempDir::new().unwrap();
        let nonexistent = tmpdir.path().join("nonexistent.yml");
        env::set_var("WARDEN_CONFIG", nonexistent.to_str().unwrap());
        assert!(GatewayConfig::from_env_or_yaml().is_err());
        clear_warden_env();
    }

    #[serial]
    #[test]
    fn yaml_unknown_field_fails() {
        clear_warden_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("bad.yml");
        fs::write(&config_path, "no_such_section:\n  key: value\n").unwrap();
        env::set_var("WARDEN_CONFIG", config_path.to_str().unwrap());
        assert!(GatewayConfig::from_env_or_yaml().is_err());
        clear_warden_env();
    }
}
