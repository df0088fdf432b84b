//! Upstream request forwarding.
//!
//! # Purpose
//! Forwards authorized requests to the loopback backend: propagates the
//! configured header whitelist, injects authenticated-principal headers,
//! applies the read timeout, and answers a structured 503 when the
//! upstream cannot be reached. Hop-by-hop headers are stripped in both
//! directions; the transport re-derives `Content-Length`.
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use warden_authz::AuthContext;

use crate::config::ProxyConfig;
use crate::error;

const HOP_BY_HOP_HEADERS: &[&str] = &["transfer-encoding", "content-length", "connection"];

pub struct Proxy {
    config: ProxyConfig,
    client: reqwest::Client,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn forward(
        &self,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        context: &AuthContext,
        request_id: &str,
    ) -> Response {
        metrics::counter!("warden_proxy_requests_total").increment(1);

        let url = format!("{}{}", self.config.target_base(), path_and_query);
        tracing::debug!(method = %method, url = %url, "forwarding to upstream");

        let mut request = self
            .client
            .request(method.clone(), url.as_str())
            .timeout(self.config.read_timeout);

        for name in self.propagated_header_names() {
            if let Some(value) = headers.get(name.as_str()) {
                request = request.header(name.as_str(), value.clone());
            }
        }
        request = request.header("X-Request-ID", request_id);
        request = self.add_principal_headers(request, context);

        if !body.is_empty() {
            request = request.body(body);
        }

        let upstream = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                metrics::counter!("warden_proxy_errors_total").increment(1);
                tracing::error!(error = %err, url = %url, "upstream request failed");
                return error::service_unavailable(&err.to_string());
            }
        };

        let status = upstream.status();
        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name.clone(), value.clone());
        }

        let bytes = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                metrics::counter!("warden_proxy_errors_total").increment(1);
                tracing::error!(error = %err, url = %url, "failed to read upstream body");
                return error::service_unavailable(&err.to_string());
            }
        };

        builder
            .body(Body::from(bytes))
            .unwrap_or_else(|_| error::internal_error())
    }

    fn propagated_header_names(&self) -> Vec<String> {
        let mut names = self.config.propagate_headers.clone();
        for extra in ["Content-Type", "Accept"] {
            if !names.iter().any(|name| name.eq_ignore_ascii_case(extra)) {
                names.push(extra.to_string());
            }
        }
        names
    }

    fn add_principal_headers(
        &self,
        mut request: reqwest::RequestBuilder,
        context: &AuthContext,
    ) -> reqwest::RequestBuilder {
        if !context.is_authenticated() {
            return request;
        }

        if self.config.add_headers.is_empty() {
            request = request.header("X-Auth-User-Id", context.user_id.as_str());
            if let Some(email) = &context.email {
                request = request.header("X-Auth-User-Email", email.as_str());
            }
            if !context.roles.is_empty() {
                request = request.header("X-Auth-User-Roles", joined_roles(context));
            }
            if let Some(tenant) = &context.tenant {
                request = request.header("X-Auth-Tenant", tenant.as_str());
            }
            return request;
        }

        for (name, template) in &self.config.add_headers {
            let value = resolve_placeholders(template, context);
            if !value.is_empty() {
                request = request.header(name.as_str(), value);
            }
        }
        request
    }
}

fn joined_roles(context: &AuthContext) -> String {
    context
        .roles
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(",")
}

/// Substitutes `${user.*}` placeholders; absent fields become empty.
pub fn resolve_placeholders(template: &str, context: &AuthContext) -> String {
    template
        .replace("${user.id}", &context.user_id)
        .replace("${user.email}", context.email.as_deref().unwrap_or(""))
        .replace("${user.roles}", &joined_roles(context))
        .replace("${user.tenant}", context.tenant.as_deref().unwrap_or(""))
        .replace("${user.name}", context.name.as_deref().unwrap_or(""))
}
