//! Warden gateway: a co-located authenticating reverse proxy.
//!
//! The gateway terminates inbound HTTP for a loopback backend, validates
//! caller identity against multi-issuer OIDC configuration, enriches it
//! with authorization facts from an external roles service, evaluates a
//! Rego policy, and forwards permitted requests upstream. See the module
//! docs for the individual stages.

pub mod app;
pub mod audit;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod rate_limit;
pub mod resilience;
pub mod roles;
