//! Warden authn/authz primitives shared by the gateway service.
//!
//! # Purpose
//! Centralizes the caller data model, path matching, tenant resolution,
//! JWKS-backed token validation, and claim normalization.
//!
//! # How it fits
//! The gateway's request pipeline drives these pieces in order: resolve
//! the tenant profile, validate the bearer token, normalize claims into
//! an [`AuthContext`], then hand the context to enrichment and policy
//! evaluation.
//!
//! # Key invariants
//! - [`AuthContext`] is immutable; every transform yields a new value.
//! - Tenant resolution never rejects a request; it only picks a verifier.
//! - Validation failures map 1:1 onto the [`AuthError`] taxonomy.

pub mod claims;
mod context;
mod decision;
mod errors;
mod jwks;
pub mod matcher;
pub mod tenant;
mod token;

pub use context::{AuthContext, RolesResponse, ANONYMOUS_USER};
pub use decision::{EvalContext, PolicyDecision, PolicyInput, RequestInfo, ResourceInfo, UserInfo};
pub use errors::{AuthError, AuthResult};
pub use jwks::{find_jwk, JwksCache};
pub use tenant::{IdpDialect, DEFAULT_PROFILE, ENTRA_PROFILE, TENANT_HEADER};
pub use token::{IdpProfile, TokenValidator};
