//! Bearer token validation against configured IdP profiles.
//!
//! # Purpose
//! Verifies JWS compact tokens: algorithm allowlist, JWKS-backed signature,
//! validity window with clock skew, expected issuer, audience membership.
//! A successful validation yields the raw claim map for normalization.
use dashmap::DashMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::errors::{AuthError, AuthResult};
use crate::jwks::{find_jwk, JwksCache};

/// Verification settings for one identity-provider profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpProfile {
    pub name: String,
    pub issuer: String,
    pub audiences: Vec<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default = "IdpProfile::default_allowed_algs")]
    pub allowed_algs: Vec<String>,
}

impl IdpProfile {
    fn default_allowed_algs() -> Vec<String> {
        vec!["RS256".to_string()]
    }
}

#[derive(Debug, Clone)]
pub struct TokenValidator {
    client: reqwest::Client,
    jwks: JwksCache,
    discovery_cache: Arc<DashMap<String, CachedDiscovery>>,
    discovery_ttl: Duration,
    clock_skew_seconds: u64,
}

#[derive(Debug, Clone)]
struct CachedDiscovery {
    jwks_url: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

impl TokenValidator {
    pub fn new(
        client: reqwest::Client,
        jwks_ttl: Duration,
        discovery_ttl: Duration,
        clock_skew_seconds: u64,
    ) -> Self {
        Self {
            jwks: JwksCache::new(client.clone(), jwks_ttl),
            client,
            discovery_cache: Arc::new(DashMap::new()),
            discovery_ttl,
            clock_skew_seconds,
        }
    }

    /// Validates a compact JWS under the given profile and returns the
    /// verified claim map.
    pub async fn validate(
        &self,
        token: &str,
        profile: &IdpProfile,
    ) -> AuthResult<serde_json::Map<String, Value>> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

        if !profile
            .allowed_algs
            .iter()
            .any(|alg| Algorithm::from_str(alg).ok() == Some(header.alg))
        {
            return Err(AuthError::MalformedToken);
        }

        let jwks_url = self.resolve_jwks_url(profile).await?;
        let jwks = self.jwks.get(&jwks_url).await?;
        let decoding_key = match find_jwk(&jwks, header.kid.as_deref()) {
            Some(key) => DecodingKey::from_jwk(key).map_err(|_| AuthError::UnknownSigner)?,
            None => {
                // Unknown kid: the issuer may have rotated keys, refresh once.
                let refreshed = self.jwks.refresh(&jwks_url).await?;
                let key = find_jwk(&refreshed, header.kid.as_deref())
                    .ok_or(AuthError::UnknownSigner)?;
                DecodingKey::from_jwk(key).map_err(|_| AuthError::UnknownSigner)?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[profile.issuer.as_str()]);
        validation.set_audience(&profile.audiences);
        validation.leeway = self.clock_skew_seconds;
        validation.validate_nbf = true;

        let token_data =
            decode::<Value>(token, &decoding_key, &validation).map_err(map_jwt_error)?;
        let claims = match token_data.claims {
            Value::Object(map) => map,
            _ => return Err(AuthError::MalformedToken),
        };

        // jsonwebtoken does not check iat; reject tokens issued in the future.
        if let Some(iat) = claims.get("iat").and_then(Value::as_i64) {
            if iat > now_epoch_seconds() + self.clock_skew_seconds as i64 {
                return Err(AuthError::Expired);
            }
        }

        Ok(claims)
    }

    async fn resolve_jwks_url(&self, profile: &IdpProfile) -> AuthResult<String> {
        if let Some(url) = &profile.jwks_url {
            return Ok(url.clone());
        }
        let discovery_url = profile.discovery_url.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/openid-configuration",
                profile.issuer.trim_end_matches('/')
            )
        });

        if let Some(entry) = self.discovery_cache.get(&discovery_url) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.jwks_url.clone());
            }
        }

        let doc: DiscoveryDocument = self.client.get(&discovery_url).send().await?.json().await?;
        self.discovery_cache.insert(
            discovery_url,
            CachedDiscovery {
                jwks_url: doc.jwks_uri.clone(),
                expires_at: Instant::now() + self.discovery_ttl,
            },
        );
        Ok(doc.jwks_uri)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::Expired,
        ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
        ErrorKind::InvalidAudience => AuthError::WrongAudience,
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        _ => AuthError::MalformedToken,
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
