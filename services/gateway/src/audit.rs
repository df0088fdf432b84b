//! Structured audit logging.
//!
//! # Purpose
//! Emits exactly one JSON record per completed request on the dedicated
//! `audit` tracing target. Sensitive headers are redacted before the
//! record leaves the process. Emission failures are swallowed and logged
//! separately; auditing never fails a request.
use serde::Serialize;
use std::collections::BTreeMap;
use warden_authz::AuthContext;

use crate::config::AuditConfig;

pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone)]
pub struct AuditLogger {
    config: AuditConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRecord<'a> {
    timestamp: String,
    request_id: &'a str,
    event_type: &'static str,
    user: UserSection<'a>,
    request: RequestSection<'a>,
    response: ResponseSection,
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
struct UserSection<'a> {
    id: &'a str,
    email: Option<&'a str>,
    tenant: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSection<'a> {
    method: &'a str,
    path: &'a str,
    query_string: Option<&'a str>,
    remote_address: &'a str,
    user_agent: Option<&'a str>,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseSection {
    status_code: u16,
    status_family: &'static str,
    duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    AuthenticationFailed,
    AuthorizationDenied,
    NotFound,
    RateLimited,
    ClientError,
    ServerError,
    Unknown,
}

pub fn outcome_for(status: u16) -> Outcome {
    match status {
        401 => Outcome::AuthenticationFailed,
        403 => Outcome::AuthorizationDenied,
        404 => Outcome::NotFound,
        429 => Outcome::RateLimited,
        200..=299 => Outcome::Success,
        400..=499 => Outcome::ClientError,
        500..=599 => Outcome::ServerError,
        _ => Outcome::Unknown,
    }
}

fn status_family(status: u16) -> &'static str {
    match status / 100 {
        1 => "INFORMATIONAL",
        2 => "SUCCESS",
        3 => "REDIRECTION",
        4 => "CLIENT_ERROR",
        5 => "SERVER_ERROR",
        _ => "UNKNOWN",
    }
}

impl AuditLogger {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        request_id: &str,
        context: &AuthContext,
        method: &str,
        path: &str,
        query_string: Option<&str>,
        remote_address: &str,
        user_agent: Option<&str>,
        headers: &BTreeMap<String, String>,
        status: u16,
        duration_ms: u64,
    ) {
        if !self.config.enabled {
            return;
        }

        let record = AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
            event_type: "request",
            user: UserSection {
                id: &context.user_id,
                email: context.email.as_deref(),
                tenant: context.tenant.as_deref(),
            },
            request: RequestSection {
                method,
                path,
                query_string,
                remote_address,
                user_agent,
                headers: self.redact_headers(headers),
            },
            response: ResponseSection {
                status_code: status,
                status_family: status_family(status),
                duration_ms,
            },
            outcome: outcome_for(status),
        };

        match serde_json::to_string(&record) {
            Ok(json) => tracing::info!(target: "audit", "{json}"),
            Err(err) => tracing::warn!(error = %err, "failed to write audit record"),
        }
    }

    fn redact_headers(&self, headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let sensitive = self
                    .config
                    .sensitive_headers
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(name));
                let value = if sensitive {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }
}
