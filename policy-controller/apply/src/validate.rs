use crate::{refs, ApplyError, Resolved, Resolver, RuleError};
use praetor_policy_core::{
    engine::{self, VALIDATE_PATH},
    select_and_order, Engine, Operation, RuleSet,
};
use praetor_policy_k8s_api::policy::{ClusterValidatePolicy, ValidatePayload, ValidateRule};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// The outcome of a validate rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: String,

    /// The policy that produced a rejection.
    #[serde(skip)]
    pub policy: Option<String>,
}

/// Evaluates validate rule sets.
#[derive(Clone)]
pub struct ValidateApplier {
    engine: Arc<dyn Engine>,
    resolver: Resolver,
}

/// Evaluates every matching validate policy against an admitted change.
#[derive(Clone, Debug)]
pub struct ValidateManager {
    applier: ValidateApplier,
}

// === impl Verdict ===

impl Verdict {
    pub fn allowed() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }
}

// === impl ValidateApplier ===

impl ValidateApplier {
    pub fn new(engine: Arc<dyn Engine>, resolver: Resolver) -> Self {
        Self { engine, resolver }
    }

    /// Evaluates a rule set, stopping at the first rule that rejects.
    pub async fn apply(
        &self,
        object: &Value,
        old: Option<&Value>,
        op: Operation,
        set: &RuleSet<ValidateRule>,
    ) -> Result<Verdict, ApplyError> {
        let mut resolved = Resolved::default();
        for rule in &set.rules {
            let verdict = self
                .apply_rule(object, old, op, rule, &mut resolved)
                .await
                .map_err(|source| ApplyError {
                    policy: set.policy.clone(),
                    source,
                })?;
            if !verdict.valid {
                return Ok(Verdict {
                    policy: Some(set.policy.clone()),
                    ..verdict
                });
            }
        }
        Ok(Verdict::allowed())
    }

    async fn apply_rule(
        &self,
        object: &Value,
        old: Option<&Value>,
        op: Operation,
        rule: &ValidateRule,
        resolved: &mut Resolved,
    ) -> Result<Verdict, RuleError> {
        let (program, refs, old) = match rule.payload() {
            None => return Ok(Verdict::allowed()),
            Some(ValidatePayload::Inline(program)) => (program, vec![], old),
            Some(ValidatePayload::Compiled { template, program }) => {
                let refs = template.map(refs::validate_refs).unwrap_or_default();
                let reads_old = refs::reads_old(&refs);
                let old = if op == Operation::Update && !reads_old {
                    None
                } else {
                    old
                };
                (program, refs, old)
            }
        };

        let ctx = self.resolver.context(object, old, &refs, resolved).await?;
        let verdict = engine::execute_as(&*self.engine, program, &ctx, VALIDATE_PATH)?;
        Ok(verdict)
    }
}

impl std::fmt::Debug for ValidateApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidateApplier")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

// === impl ValidateManager ===

impl ValidateManager {
    pub fn new(applier: ValidateApplier) -> Self {
        Self { applier }
    }

    /// Returns the first rejection among the matching policies, in policy name order.
    pub async fn validate(
        &self,
        object: &Value,
        old: Option<&Value>,
        op: Operation,
        policies: &[ClusterValidatePolicy],
    ) -> Result<Verdict, ApplyError> {
        for set in select_and_order(policies, object, op) {
            let verdict = self.applier.apply(object, old, op, &set).await?;
            if !verdict.valid {
                info!(policy = %set.policy, reason = %verdict.reason, "Rejected");
                return Ok(verdict);
            }
        }
        Ok(Verdict::allowed())
    }
}
