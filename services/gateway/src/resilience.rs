//! Timeout / retry / circuit-breaker combinator for outbound calls.
//!
//! # Purpose
//! Wraps any async operation with the same fault-tolerance envelope: a
//! per-attempt timeout, a bounded number of retries with fixed backoff,
//! and a shared circuit breaker that short-circuits calls while a
//! dependency is misbehaving. Callers supply their own fallback when the
//! guard gives up.
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub attempt_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("circuit breaker is open")]
    Open,
    #[error("call failed after retries: {0}")]
    Exhausted(String),
}

/// Rolling-window circuit breaker.
///
/// Trips open when the window holds at least `volume_threshold` outcomes
/// and the failure ratio reaches `failure_ratio`. While open, `allow`
/// rejects calls until `open_for` has elapsed; the next call is a probe
/// that closes the breaker on success and re-opens it on failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    volume_threshold: usize,
    failure_ratio: f64,
    open_for: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(volume_threshold: usize, failure_ratio: f64, open_for: Duration) -> Self {
        Self {
            volume_threshold,
            failure_ratio,
            open_for,
            state: Mutex::new(BreakerState {
                window: VecDeque::with_capacity(volume_threshold),
                opened_at: None,
            }),
        }
    }

    pub fn allow(&self) -> bool {
        let state = self.state.lock().expect("breaker lock");
        match state.opened_at {
            Some(opened_at) => opened_at.elapsed() >= self.open_for,
            None => true,
        }
    }

    pub fn record(&self, success: bool) {
        let mut state = self.state.lock().expect("breaker lock");
        if state.opened_at.is_some() {
            // Probe outcome: success closes, failure re-opens the window.
            if success {
                state.opened_at = None;
                state.window.clear();
            } else {
                state.opened_at = Some(Instant::now());
            }
            return;
        }

        if state.window.len() == self.volume_threshold {
            state.window.pop_front();
        }
        state.window.push_back(success);

        if state.window.len() >= self.volume_threshold {
            let failures = state.window.iter().filter(|ok| !**ok).count();
            if failures as f64 / state.window.len() as f64 >= self.failure_ratio {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow()
    }
}

/// Runs `op` under the retry policy and breaker. Each attempt gets its own
/// timeout; every outcome is recorded on the breaker.
pub async fn guard<T, F, Fut>(
    policy: RetryPolicy,
    breaker: &CircuitBreaker,
    mut op: F,
) -> Result<T, GuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if !breaker.allow() {
        return Err(GuardError::Open);
    }

    let mut last_error = String::new();
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay).await;
        }

        match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => {
                breaker.record(true);
                return Ok(value);
            }
            Ok(Err(err)) => {
                last_error = err.to_string();
            }
            Err(_) => {
                last_error = format!(
                    "attempt timed out after {} ms",
                    policy.attempt_timeout.as_millis()
                );
            }
        }
        breaker.record(false);
    }

    Err(GuardError::Exhausted(last_error))
}
