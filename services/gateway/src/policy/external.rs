//! External decision service backend.
use async_trait::async_trait;
use serde_json::Value;
use warden_authz::{PolicyDecision, PolicyInput};

use super::{parse_result, DecisionBackend};

/// POSTs `{"input": <PolicyInput>}` to `<url><decision_path>` and parses
/// the `result` field. Server errors bubble up so the resilience envelope
/// counts them; other non-200 statuses become clean denials.
pub struct ExternalBackend {
    client: reqwest::Client,
    decision_url: String,
}

impl ExternalBackend {
    pub fn new(client: reqwest::Client, url: &str, decision_path: &str) -> Self {
        Self {
            client,
            decision_url: format!("{}{}", url.trim_end_matches('/'), decision_path),
        }
    }
}

#[async_trait]
impl DecisionBackend for ExternalBackend {
    async fn decide(&self, input: &PolicyInput) -> anyhow::Result<PolicyDecision> {
        let response = self
            .client
            .post(&self.decision_url)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            anyhow::bail!("decision service returned status {}", status.as_u16());
        }
        if status != reqwest::StatusCode::OK {
            return Ok(PolicyDecision::deny(format!(
                "Decision service returned status {}",
                status.as_u16()
            )));
        }

        let body: Value = response.json().await?;
        let Some(result) = body.get("result") else {
            return Ok(PolicyDecision::deny("No result from decision service"));
        };
        Ok(parse_result(result))
    }
}
