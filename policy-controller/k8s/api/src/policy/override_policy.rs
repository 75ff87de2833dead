use super::{ConstantValue, Operation, ResourceSelector, TargetOperations, ValueRef};
use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mutates matching resources in the policy's namespace.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.praetor.io",
    version = "v1alpha1",
    kind = "OverridePolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OverridePolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub override_rules: Vec<OverrideRule>,
}

/// Mutates matching resources in every namespace. Cluster policies always
/// apply before namespaced ones.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.praetor.io",
    version = "v1alpha1",
    kind = "ClusterOverridePolicy"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverridePolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_selectors: Vec<ResourceSelector>,
    #[serde(default)]
    pub override_rules: Vec<OverrideRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_operations: Vec<Operation>,
    pub overriders: Overriders,
}

/// The ways a rule may mutate an object. When several are set, they apply in
/// the order: compiled template, inline program, plaintext.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overriders {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plaintext: Vec<PlaintextOverrider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_cue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<OverrideRuleTemplate>,
    /// Rendered from `template` by the admission controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_cue: Option<String>,
}

/// One override payload, resolved from the optional fields of `Overriders`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OverridePayload<'a> {
    Compiled {
        template: Option<&'a OverrideRuleTemplate>,
        program: &'a str,
    },
    Inline(&'a str),
    Plaintext(&'a [PlaintextOverrider]),
}

/// A JSON patch operation, spelled out.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlaintextOverrider {
    pub path: String,
    pub op: TemplateOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TemplateOperation {
    #[default]
    Add,
    Remove,
    Replace,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum OverrideTemplateType {
    Annotations,
    Labels,
    Resources,
    ResourcesOversell,
    Tolerations,
    Affinity,
}

/// A typed override, rendered into a program at admission time.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRuleTemplate {
    #[serde(rename = "type")]
    pub kind: OverrideTemplateType,
    #[serde(default)]
    pub operation: TemplateOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConstantValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_ref: Option<ValueRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_oversell: Option<ResourcesOversell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

/// Scales container requests by a factor of their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesOversell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_factor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_factor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_factor: Option<String>,
}

// === impl Overriders ===

impl Overriders {
    /// Returns the populated payloads in application order.
    pub fn payloads(&self) -> Vec<OverridePayload<'_>> {
        let mut payloads = Vec::with_capacity(3);
        if let Some(program) = self.compiled_cue.as_deref().filter(|p| !p.is_empty()) {
            payloads.push(OverridePayload::Compiled {
                template: self.template.as_ref(),
                program,
            });
        }
        if let Some(program) = self.inline_cue.as_deref().filter(|p| !p.is_empty()) {
            payloads.push(OverridePayload::Inline(program));
        }
        if !self.plaintext.is_empty() {
            payloads.push(OverridePayload::Plaintext(&self.plaintext));
        }
        payloads
    }
}

impl TargetOperations for OverrideRule {
    fn target_operations(&self) -> &[Operation] {
        &self.target_operations
    }
}

// === impl ResourcesOversell ===

impl ResourcesOversell {
    /// Returns each factor that parses to a positive number, keyed by resource name.
    pub fn valid_factors(&self) -> Vec<(&'static str, f64)> {
        [
            ("cpu", &self.cpu_factor),
            ("memory", &self.memory_factor),
            ("ephemeral-storage", &self.disk_factor),
        ]
        .into_iter()
        .filter_map(|(name, factor)| {
            let f = factor.as_deref()?.trim().parse::<f64>().ok()?;
            (f.is_finite() && f > 0.0).then_some((name, f))
        })
        .collect()
    }
}
