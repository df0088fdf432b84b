//! Caller identity model.
//!
//! # Purpose
//! [`AuthContext`] is the validated-and-enriched caller record for one
//! request. It is immutable once constructed; enrichment produces a new
//! value via [`AuthContext::with_enrichment`].
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Marker user id for requests without a verified identity.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Validated caller identity for a single request.
///
/// Roles and permissions are kept as ordered sets so that joined header
/// values and policy inputs are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub issuer: String,
    pub audience: Vec<String>,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub claims: serde_json::Map<String, serde_json::Value>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_id: Option<String>,
    pub tenant: Option<String>,
}

impl AuthContext {
    /// Context for an unauthenticated request. Collections are empty but
    /// present, never absent.
    pub fn anonymous() -> Self {
        Self {
            user_id: ANONYMOUS_USER.to_string(),
            email: None,
            name: None,
            preferred_username: None,
            issuer: String::new(),
            audience: Vec::new(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            claims: serde_json::Map::new(),
            issued_at: 0,
            expires_at: 0,
            token_id: None,
            tenant: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != ANONYMOUS_USER
    }

    /// Produces a new context with roles/permissions unioned into this one.
    /// The tenant is replaced only when the enrichment carries one.
    pub fn with_enrichment(&self, response: &RolesResponse) -> Self {
        let mut enriched = self.clone();
        enriched.roles.extend(response.roles.iter().cloned());
        enriched
            .permissions
            .extend(response.permissions.iter().cloned());
        if response.tenant.is_some() {
            enriched.tenant = response.tenant.clone();
        }
        enriched
    }
}

/// Wire shape of the external roles service response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesResponse {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub tenant: Option<String>,
}

impl RolesResponse {
    /// Well-formed response carrying no roles, used as the degraded-mode
    /// fallback when the roles service is unreachable.
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
            tenant: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated_context() -> AuthContext {
        AuthContext {
            user_id: "user-1".to_string(),
            roles: BTreeSet::from(["reader".to_string()]),
            permissions: BTreeSet::from(["doc:read".to_string()]),
            tenant: Some("acme".to_string()),
            ..AuthContext::anonymous()
        }
    }

    #[test]
    fn anonymous_is_not_authenticated() {
        let ctx = AuthContext::anonymous();
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.user_id, ANONYMOUS_USER);
        assert!(ctx.roles.is_empty());
        assert!(ctx.claims.is_empty());
    }

    #[test]
    fn enrichment_unions_roles_and_permissions() {
        let ctx = authenticated_context();
        let response = RolesResponse {
            user_id: "user-1".to_string(),
            roles: vec!["writer".to_string(), "reader".to_string()],
            permissions: vec!["doc:write".to_string()],
            tenant: None,
        };

        let enriched = ctx.with_enrichment(&response);
        assert!(enriched.roles.contains("reader"));
        assert!(enriched.roles.contains("writer"));
        assert!(enriched.permissions.contains("doc:read"));
        assert!(enriched.permissions.contains("doc:write"));
        // Original is untouched.
        assert!(!ctx.roles.contains("writer"));
    }

    #[test]
    fn enrichment_keeps_tenant_unless_service_provides_one() {
        let ctx = authenticated_context();
        let keep = ctx.with_enrichment(&RolesResponse::empty("user-1"));
        assert_eq!(keep.tenant.as_deref(), Some("acme"));

        let replace = ctx.with_enrichment(&RolesResponse {
            user_id: "user-1".to_string(),
            roles: vec![],
            permissions: vec![],
            tenant: Some("globex".to_string()),
        });
        assert_eq!(replace.tenant.as_deref(), Some("globex"));
    }

    #[test]
    fn empty_response_is_well_formed() {
        let empty = RolesResponse::empty("user-1");
        assert_eq!(empty.user_id, "user-1");
        assert!(empty.roles.is_empty());
        assert!(empty.permissions.is_empty());
        assert!(empty.tenant.is_none());
    }

    #[test]
    fn roles_response_wire_format() {
        let json = r#"{"userId":"u1","roles":["admin"],"permissions":[],"tenant":"acme"}"#;
        let parsed: RolesResponse = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.roles, vec!["admin".to_string()]);
        assert_eq!(parsed.tenant.as_deref(), Some("acme"));

        let missing_fields: RolesResponse =
            serde_json::from_str(r#"{"userId":"u2"}"#).expect("deserialize");
        assert!(missing_fields.roles.is_empty());
        assert!(missing_fields.tenant.is_none());
    }
}
