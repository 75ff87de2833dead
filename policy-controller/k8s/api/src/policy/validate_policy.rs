use super::{ConstantValue, Operation, RefSource, ResourceSelector, TargetOperations, ValueRef};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Accepts or rejects changes to matching resources in every namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.praetor.io",
    version = "v1alpha1",
    kind = "ClusterValidatePolicy"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterValidatePolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub validate_rules: Vec<ValidateRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_operations: Vec<Operation>,
    /// A program evaluated with both the current and the old object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_cue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ValidateRuleTemplate>,
    /// Rendered from `template` by the admission controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_cue: Option<String>,
}

/// The program a validate rule evaluates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValidatePayload<'a> {
    Compiled {
        template: Option<&'a ValidateRuleTemplate>,
        program: &'a str,
    },
    Inline(&'a str),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValidateTemplateType {
    Condition,
    PodAvailableBadge,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRuleTemplate {
    #[serde(rename = "type")]
    pub kind: ValidateTemplateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ValidateCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_available_badge: Option<PodAvailableBadge>,
}

/// Whether a matching condition rejects the change (`reject`) or is the only
/// way the change is allowed (`allow`).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AffectMode {
    #[default]
    Reject,
    Allow,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Cond {
    Equal,
    NotEqual,
    Exist,
    NotExist,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Compares the data at `dataRef` against `value` or `valueRef`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affect_mode: Option<AffectMode>,
    pub cond: Cond,
    pub data_ref: ValueRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConstantValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_ref: Option<ValueRef>,
    #[serde(default)]
    pub message: String,
}

/// Guards the availability of a workload's replicas when its pods are deleted.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodAvailableBadge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_reference: Option<ReplicaReference>,
}

/// Where the desired and current replica counts are read from.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaReference {
    pub from: RefSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s: Option<super::K8sRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<super::HttpDataRef>,
    pub target_replica_path: String,
    pub current_replica_path: String,
}

// === impl ValidateRule ===

impl ValidateRule {
    /// Returns the program to evaluate, preferring the compiled template.
    pub fn payload(&self) -> Option<ValidatePayload<'_>> {
        if let Some(program) = self.compiled_cue.as_deref().filter(|p| !p.is_empty()) {
            return Some(ValidatePayload::Compiled {
                template: self.template.as_ref(),
                program,
            });
        }
        self.inline_cue
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(ValidatePayload::Inline)
    }
}

impl TargetOperations for ValidateRule {
    fn target_operations(&self) -> &[Operation] {
        &self.target_operations
    }
}

// === impl ReplicaReference ===

impl ReplicaReference {
    /// Reads both counts from the owner of the pod being deleted.
    pub fn owner_default() -> Self {
        Self {
            from: RefSource::Owner,
            k8s: None,
            http: None,
            target_replica_path: "/spec/replicas".to_string(),
            current_replica_path: "/status/replicas".to_string(),
        }
    }

    /// The value reference used to fetch the object holding the counts.
    pub fn as_value_ref(&self) -> ValueRef {
        ValueRef {
            from: self.from,
            path: String::new(),
            k8s: self.k8s.clone(),
            http: self.http.clone(),
        }
    }
}
