//! Per-caller token-bucket rate limiting.
//!
//! # Purpose
//! One bucket per key (authenticated principal or client IP) with greedy
//! continuous refill. The bucket map is bounded: at capacity, requests
//! under new keys are rejected outright. A background sweeper evicts
//! buckets that have been idle past a TTL instead of clearing the map.
use axum::http::HeaderMap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MAX_BUCKETS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    requests_per_second: f64,
    burst_size: f64,
    buckets: DashMap<String, Bucket>,
    max_buckets: usize,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self::with_max_buckets(requests_per_second, burst_size, MAX_BUCKETS)
    }

    pub fn with_max_buckets(
        requests_per_second: u32,
        burst_size: u32,
        max_buckets: usize,
    ) -> Self {
        Self {
            requests_per_second: requests_per_second as f64,
            burst_size: burst_size as f64,
            buckets: DashMap::new(),
            max_buckets,
        }
    }

    /// Tries to take one token for the key.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();

        if !self.buckets.contains_key(key) && self.buckets.len() >= self.max_buckets {
            // Map is full and this key is new; shed rather than grow.
            return RateDecision::Limited {
                retry_after_secs: 1,
            };
        }

        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst_size,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.requests_per_second).min(self.burst_size);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let wait = (1.0 - bucket.tokens) / self.requests_per_second;
            RateDecision::Limited {
                retry_after_secs: (wait.ceil() as u64).max(1),
            }
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Evicts buckets idle for longer than `idle_ttl` every `interval`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_ttl: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let before = limiter.buckets.len();
                limiter
                    .buckets
                    .retain(|_, bucket| bucket.last_seen.elapsed() < idle_ttl);
                let evicted = before - limiter.buckets.len();
                if evicted > 0 {
                    tracing::debug!(evicted, "rate limiter sweep evicted idle buckets");
                }
            }
        })
    }
}

/// Client IP resolution: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the transport address.
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers
        .get("X-Real-IP")
        .and_then(|value| value.to_str().ok())
    {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
