//! Tenant profile resolution.
//!
//! # Purpose
//! Picks the identity-provider profile to validate an inbound token
//! against. Resolution never denies a request; it only chooses which
//! verifier runs next. The token payload is decoded *without* signature
//! verification here, signature checks happen in the validator.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Header that forces a specific tenant profile.
pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Profile name for the self-hosted realm IdP.
pub const DEFAULT_PROFILE: &str = "default";
/// Profile name for the cloud multi-tenant IdP.
pub const ENTRA_PROFILE: &str = "entra";

/// Claim dialect spoken by an issuer, used by claim normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpDialect {
    /// Keycloak-style realm tokens (`realm_access`, `resource_access`).
    Realm,
    /// Microsoft Entra ID tokens (`oid`, `tid`, `roles`, `groups`).
    Entra,
}

impl IdpDialect {
    pub fn from_issuer(issuer: &str) -> Self {
        if is_entra_issuer(issuer) {
            IdpDialect::Entra
        } else {
            IdpDialect::Realm
        }
    }
}

/// Resolves the tenant profile for a request.
///
/// Order: explicit `X-Tenant-ID` header (lowercased), then the `iss` claim
/// of the unverified bearer token, then [`DEFAULT_PROFILE`]. Any parse
/// failure falls back to the default.
pub fn resolve_profile(tenant_header: Option<&str>, bearer_token: Option<&str>) -> String {
    if let Some(header) = tenant_header {
        if !header.is_empty() {
            return header.to_lowercase();
        }
    }

    if let Some(token) = bearer_token {
        if let Some(issuer) = issuer_from_token(token) {
            if is_entra_issuer(&issuer) {
                return ENTRA_PROFILE.to_string();
            }
            if is_keycloak_issuer(&issuer) {
                return DEFAULT_PROFILE.to_string();
            }
        }
    }

    DEFAULT_PROFILE.to_string()
}

/// Reads the `iss` claim from a compact JWS without verifying anything.
pub fn issuer_from_token(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    parts.next()?;

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("iss")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

pub fn is_entra_issuer(issuer: &str) -> bool {
    issuer.contains("login.microsoftonline.com")
        || issuer.contains("sts.windows.net")
        || issuer.contains("login.microsoft.com")
}

pub fn is_keycloak_issuer(issuer: &str) -> bool {
    issuer.contains("/realms/") || issuer.contains("keycloak")
}
