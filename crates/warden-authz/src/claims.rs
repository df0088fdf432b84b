//! Claim normalization across identity-provider dialects.
//!
//! # Purpose
//! Turns a verified claim map into an [`AuthContext`], flattening the two
//! supported dialects into one shape:
//! - realm tokens carry roles under `realm_access.roles` and
//!   `resource_access.{client}.roles` (prefixed as `client:role`), and the
//!   tenant is the realm name at the end of the issuer URL;
//! - Entra tokens carry roles under `roles` and `groups`, identify users
//!   by `oid`, and carry the tenant in `tid`.
//!
//! Missing optional claims never fail normalization; an absent subject
//! yields the anonymous context.
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::context::AuthContext;
use crate::tenant::IdpDialect;

pub fn normalize(claims: &Map<String, Value>, dialect: IdpDialect) -> AuthContext {
    let user_id = match extract_user_id(claims, dialect) {
        Some(id) => id,
        None => return AuthContext::anonymous(),
    };

    let issuer = string_claim(claims, "iss").unwrap_or_default();

    AuthContext {
        user_id,
        email: string_claim(claims, "email"),
        name: string_claim(claims, "name"),
        preferred_username: extract_preferred_username(claims, dialect),
        audience: string_list_claim(claims, "aud"),
        roles: extract_roles(claims, dialect),
        permissions: BTreeSet::new(),
        claims: claims.clone(),
        issued_at: i64_claim(claims, "iat"),
        expires_at: i64_claim(claims, "exp"),
        token_id: string_claim(claims, "jti"),
        tenant: extract_tenant(claims, &issuer, dialect),
        issuer,
    }
}

fn extract_user_id(claims: &Map<String, Value>, dialect: IdpDialect) -> Option<String> {
    if dialect == IdpDialect::Entra {
        // Entra's `oid` is the immutable object id; `sub` is pairwise.
        if let Some(oid) = string_claim(claims, "oid") {
            return Some(oid);
        }
    }
    string_claim(claims, "sub")
}

fn extract_preferred_username(claims: &Map<String, Value>, dialect: IdpDialect) -> Option<String> {
    string_claim(claims, "preferred_username").or_else(|| {
        if dialect == IdpDialect::Entra {
            string_claim(claims, "upn")
        } else {
            None
        }
    })
}

fn extract_roles(claims: &Map<String, Value>, dialect: IdpDialect) -> BTreeSet<String> {
    let mut roles = BTreeSet::new();
    match dialect {
        IdpDialect::Entra => {
            roles.extend(string_list_claim(claims, "roles"));
            roles.extend(string_list_claim(claims, "groups"));
        }
        IdpDialect::Realm => {
            roles.extend(realm_roles(claims));
            roles.extend(resource_roles(claims));
        }
    }
    roles
}

fn realm_roles(claims: &Map<String, Value>) -> Vec<String> {
    claims
        .get("realm_access")
        .and_then(|access| access.get("roles"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn resource_roles(claims: &Map<String, Value>) -> Vec<String> {
    let Some(resource_access) = claims.get("resource_access").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut roles = Vec::new();
    for (client_id, access) in resource_access {
        let Some(client_roles) = access.get("roles").and_then(Value::as_array) else {
            continue;
        };
        for role in client_roles {
            if let Some(role) = role.as_str() {
                roles.push(format!("{client_id}:{role}"));
            }
        }
    }
    roles
}

fn extract_tenant(
    claims: &Map<String, Value>,
    issuer: &str,
    dialect: IdpDialect,
) -> Option<String> {
    match dialect {
        IdpDialect::Entra => string_claim(claims, "tid"),
        IdpDialect::Realm => issuer
            .rfind("/realms/")
            .map(|idx| issuer[idx + "/realms/".len()..].to_string())
            .filter(|realm| !realm.is_empty()),
    }
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn i64_claim(claims: &Map<String, Value>, name: &str) -> i64 {
    claims.get(name).and_then(Value::as_i64).unwrap_or(0)
}

/// Accepts either a single string or an array of strings.
fn string_list_claim(claims: &Map<String, Value>, name: &str) -> Vec<String> {
    match claims.get(name) {
        Some(Value::String(value)) => vec![value.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
