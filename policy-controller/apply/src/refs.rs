//! The value references each kind of rule template depends on.

use praetor_policy_core::context::RefRole;
use praetor_policy_k8s_api::policy::{
    OverrideRuleTemplate, RefSource, ReplicaReference, ValidateRuleTemplate, ValueRef,
};

pub fn override_refs(template: &OverrideRuleTemplate) -> Vec<(ValueRef, RefRole)> {
    template
        .value_ref
        .iter()
        .map(|r| (r.clone(), RefRole::Value))
        .collect()
}

pub fn validate_refs(template: &ValidateRuleTemplate) -> Vec<(ValueRef, RefRole)> {
    let mut refs = Vec::new();
    if let Some(condition) = &template.condition {
        refs.push((condition.data_ref.clone(), RefRole::Data));
        if let Some(r) = &condition.value_ref {
            refs.push((r.clone(), RefRole::Value));
        }
    }
    if let Some(badge) = &template.pod_available_badge {
        let replicas = badge
            .replica_reference
            .clone()
            .unwrap_or_else(ReplicaReference::owner_default);
        refs.push((replicas.as_value_ref(), RefRole::Data));
    }
    refs
}

/// True when any reference reads the previous version of the object.
pub fn reads_old(refs: &[(ValueRef, RefRole)]) -> bool {
    refs.iter().any(|(r, _)| r.from == RefSource::Old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use praetor_policy_k8s_api::policy::{
        Cond, PodAvailableBadge, ValidateCondition, ValidateTemplateType,
    };

    #[test]
    fn condition_references_carry_roles() {
        let template = ValidateRuleTemplate {
            kind: ValidateTemplateType::Condition,
            condition: Some(ValidateCondition {
                affect_mode: None,
                cond: Cond::Equal,
                data_ref: ValueRef::current("/spec/replicas"),
                value: None,
                value_ref: Some(ValueRef {
                    from: RefSource::Old,
                    path: "/spec/replicas".to_string(),
                    k8s: None,
                    http: None,
                }),
                message: String::new(),
            }),
            pod_available_badge: None,
        };
        let refs = validate_refs(&template);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].1, RefRole::Data);
        assert_eq!(refs[1].1, RefRole::Value);
        assert!(reads_old(&refs));
    }

    #[test]
    fn badges_default_to_the_owner() {
        let template = ValidateRuleTemplate {
            kind: ValidateTemplateType::PodAvailableBadge,
            condition: None,
            pod_available_badge: Some(PodAvailableBadge::default()),
        };
        let refs = validate_refs(&template);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.from, RefSource::Owner);
        assert!(!reads_old(&refs));
    }
}
