//! In-process policy evaluation.
//!
//! # Purpose
//! Holds the currently loaded policy module behind an atomic pointer so
//! the request hot path dereferences it lock-free; the loader publishes
//! replacement modules with a single store. Readers keep whatever
//! snapshot they captured, so in-flight evaluations finish against the
//! module they started with.
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use warden_authz::{PolicyDecision, PolicyInput};

use super::{parse_result, DecisionBackend};

/// Shared slot the loader writes and the backend reads.
pub type PolicySlot = Arc<ArcSwapOption<PolicyModule>>;

/// A compiled policy snapshot: the prepared evaluation engine plus the
/// query it answers (`data.<package>.<rule>`).
pub struct PolicyModule {
    engine: regorus::Engine,
    query: String,
}

impl PolicyModule {
    /// Compiles the given Rego sources into an evaluable module.
    pub fn compile(sources: Vec<(String, String)>, query: String) -> anyhow::Result<Self> {
        anyhow::ensure!(!sources.is_empty(), "no policy sources to compile");

        let mut engine = regorus::Engine::new();
        for (path, contents) in sources {
            engine.add_policy(path, contents)?;
        }

        Ok(Self { engine, query })
    }

    /// Evaluates the module query for one input. Synchronous and purely
    /// in-process; an undefined result denies.
    pub fn eval(&self, input: &PolicyInput) -> anyhow::Result<PolicyDecision> {
        let input_value: regorus::Value =
            regorus::Value::from_json_str(&serde_json::to_string(input)?)?;

        let mut engine = self.engine.clone();
        engine.set_input(input_value);
        let results = engine.eval_query(self.query.clone(), false)?;

        let Some(value) = results
            .result
            .first()
            .and_then(|result| result.expressions.first())
            .map(|expression| expression.value.clone())
        else {
            // Undefined rule: treat like OPA's undefined-means-deny.
            return Ok(PolicyDecision::deny("Access denied by policy"));
        };

        let json: serde_json::Value = serde_json::from_str(&value.to_json_str()?)?;
        Ok(parse_result(&json))
    }
}

pub struct EmbeddedBackend {
    slot: PolicySlot,
}

impl EmbeddedBackend {
    pub fn new(slot: PolicySlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl DecisionBackend for EmbeddedBackend {
    async fn decide(&self, input: &PolicyInput) -> anyhow::Result<PolicyDecision> {
        let Some(module) = self.slot.load_full() else {
            return Ok(PolicyDecision::deny("Policy module not initialized"));
        };
        module.eval(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use warden_authz::AuthContext;

    const BOOLEAN_POLICY: &str = r#"
package authz

default allow = false

allow {
    input.user.roles[_] == "superadmin"
}
"#;

    const OBJECT_POLICY: &str = r#"
package authz

default allow = {"allow": false, "reason": "Access denied by policy"}

allow = {"allow": true} {
    input.user.roles[_] == "admin"
}
"#;

    fn input_with_roles(roles: &[&str], path: &str) -> PolicyInput {
        let ctx = AuthContext {
            user_id: "u1".to_string(),
            roles: roles.iter().map(|role| role.to_string()).collect::<BTreeSet<_>>(),
            ..AuthContext::anonymous()
        };
        PolicyInput::new(&ctx, "GET", path, BTreeMap::new(), BTreeMap::new())
    }

    fn compile(policy: &str) -> PolicyModule {
        PolicyModule::compile(
            vec![("authz.rego".to_string(), policy.to_string())],
            "data.authz.allow".to_string(),
        )
        .expect("compile")
    }

    #[test]
    fn boolean_policy_allows_and_denies() {
        let module = compile(BOOLEAN_POLICY);

        let allowed = module
            .eval(&input_with_roles(&["superadmin"], "/api/x"))
            .expect("eval");
        assert!(allowed.allowed);

        let denied = module
            .eval(&input_with_roles(&["user"], "/api/x"))
            .expect("eval");
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("Access denied by policy"));
    }

    #[test]
    fn object_policy_surfaces_reason() {
        let module = compile(OBJECT_POLICY);

        let allowed = module
            .eval(&input_with_roles(&["admin"], "/api/x"))
            .expect("eval");
        assert!(allowed.allowed);

        let denied = module
            .eval(&input_with_roles(&["user"], "/api/x"))
            .expect("eval");
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("Access denied by policy"));
    }

    #[test]
    fn compile_rejects_empty_sources() {
        assert!(PolicyModule::compile(vec![], "data.authz.allow".to_string()).is_err());
    }

    #[test]
    fn compile_rejects_bad_rego() {
        let result = PolicyModule::compile(
            vec![("bad.rego".to_string(), "this is not rego".to_string())],
            "data.authz.allow".to_string(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_slot_denies_with_initialization_reason() {
        let slot: PolicySlot = Arc::new(ArcSwapOption::empty());
        let backend = EmbeddedBackend::new(slot);
        let decision = backend
            .decide(&input_with_roles(&["superadmin"], "/api/x"))
            .await
            .expect("decide");
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Policy module not initialized")
        );
    }

    #[tokio::test]
    async fn swapped_module_is_picked_up() {
        let slot: PolicySlot = Arc::new(ArcSwapOption::empty());
        let backend = EmbeddedBackend::new(slot.clone());
        let input = input_with_roles(&["superadmin"], "/api/x");

        slot.store(Some(Arc::new(compile(BOOLEAN_POLICY))));
        assert!(backend.decide(&input).await.expect("decide").allowed);

        // A module that denies everyone replaces the permissive one.
        slot.store(Some(Arc::new(compile(
            "package authz\n\ndefault allow = false\n",
        ))));
        assert!(!backend.decide(&input).await.expect("decide").allowed);
    }
}
