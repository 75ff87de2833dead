use crate::{selector, Operation};
use praetor_policy_k8s_api::{
    policy::{
        ClusterOverridePolicy, ClusterValidatePolicy, OverridePolicy, OverrideRule,
        ResourceSelector, TargetOperations, ValidateRule,
    },
    ResourceExt,
};
use serde_json::Value;

/// A policy as seen by rule selection.
pub trait Policy {
    type Rule: TargetOperations + Clone;

    fn policy_name(&self) -> String;
    fn selectors(&self) -> &[ResourceSelector];
    fn rules(&self) -> &[Self::Rule];
}

/// The rules of one policy that apply to one admission.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet<R> {
    pub policy: String,
    pub rules: Vec<R>,
}

/// Selects the rule sets that apply to `resource` under `op`, ordered by
/// ascending policy name.
///
/// Policies whose selectors do not match, and policies with no rule targeting
/// `op`, contribute nothing. The sort is stable so equally named policies keep
/// their input order.
pub fn select_and_order<'p, P, I>(policies: I, resource: &Value, op: Operation) -> Vec<RuleSet<P::Rule>>
where
    P: Policy + 'p,
    I: IntoIterator<Item = &'p P>,
{
    let mut sets = policies
        .into_iter()
        .filter(|policy| selector::matches_any(resource, policy.selectors()))
        .filter_map(|policy| {
            let rules = policy
                .rules()
                .iter()
                .filter(|rule| rule.targets(op))
                .cloned()
                .collect::<Vec<_>>();
            if rules.is_empty() {
                return None;
            }
            Some(RuleSet {
                policy: policy.policy_name(),
                rules,
            })
        })
        .collect::<Vec<_>>();

    sets.sort_by(|a, b| a.policy.cmp(&b.policy));
    sets
}

impl Policy for OverridePolicy {
    type Rule = OverrideRule;

    fn policy_name(&self) -> String {
        self.name_any()
    }

    fn selectors(&self) -> &[ResourceSelector] {
        &self.spec.resource_selectors
    }

    fn rules(&self) -> &[OverrideRule] {
        &self.spec.override_rules
    }
}

impl Policy for ClusterOverridePolicy {
    type Rule = OverrideRule;

    fn policy_name(&self) -> String {
        self.name_any()
    }

    fn selectors(&self) -> &[ResourceSelector] {
        &self.spec.resource_selectors
    }

    fn rules(&self) -> &[OverrideRule] {
        &self.spec.override_rules
    }
}

impl Policy for ClusterValidatePolicy {
    type Rule = ValidateRule;

    fn policy_name(&self) -> String {
        self.name_any()
    }

    fn selectors(&self) -> &[ResourceSelector] {
        &self.spec.resource_selectors
    }

    fn rules(&self) -> &[ValidateRule] {
        &self.spec.validate_rules
    }
}
