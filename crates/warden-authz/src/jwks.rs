//! JWKS fetching with TTL-based caching.
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::AuthResult;

// Refreshes completed inside this window satisfy concurrent kid-miss
// refreshers without another fetch.
const REFRESH_COALESCE_WINDOW: Duration = Duration::from_secs(5);

/// Read-mostly JWKS cache shared across requests. Entries expire after a
/// configurable TTL; an explicit [`JwksCache::refresh`] bypasses the cache
/// on an unknown `kid`, with concurrent refreshes coalesced into a single
/// fetch.
#[derive(Debug, Clone)]
pub struct JwksCache {
    client: reqwest::Client,
    cache: Arc<DashMap<String, CachedJwks>>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
    ttl: Duration,
}

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
    expires_at: Instant,
}

impl JwksCache {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            cache: Arc::new(DashMap::new()),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
            ttl,
        }
    }

    pub async fn get(&self, jwks_url: &str) -> AuthResult<JwkSet> {
        if let Some(entry) = self.cache.get(jwks_url) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.jwks.clone());
            }
        }
        self.refresh(jwks_url).await
    }

    pub async fn refresh(&self, jwks_url: &str) -> AuthResult<JwkSet> {
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited on the lock.
        if let Some(entry) = self.cache.get(jwks_url) {
            if entry.fetched_at.elapsed() < REFRESH_COALESCE_WINDOW {
                return Ok(entry.jwks.clone());
            }
        }

        let jwks: JwkSet = self.client.get(jwks_url).send().await?.json().await?;
        let now = Instant::now();
        self.cache.insert(
            jwks_url.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                fetched_at: now,
                expires_at: now + self.ttl,
            },
        );
        Ok(jwks)
    }
}

/// Finds a key by `kid`; falls back to the first key when the token header
/// carries none.
pub fn find_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .find(|key| key.common.key_id.as_deref() == Some(kid)),
        None => jwks.keys.first(),
    }
}
