pub mod override_policy;
pub mod selector;
pub mod validate_policy;
pub mod value;

pub use self::{
    override_policy::{
        ClusterOverridePolicy, ClusterOverridePolicySpec, OverridePayload, OverridePolicy,
        OverridePolicySpec, OverrideRule, OverrideRuleTemplate, OverrideTemplateType, Overriders,
        PlaintextOverrider, ResourcesOversell, TemplateOperation,
    },
    selector::{FieldExpression, FieldSelector, ResourceSelector},
    validate_policy::{
        AffectMode, ClusterValidatePolicy, ClusterValidatePolicySpec, Cond, PodAvailableBadge,
        ReplicaReference, ValidateCondition, ValidatePayload, ValidateRule, ValidateRuleTemplate,
        ValidateTemplateType,
    },
    value::{ConstantValue, HttpAuth, HttpDataRef, K8sRef, RefSource, ValueRef},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An admission operation a rule may target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// Implemented by rules that declare the operations they apply to.
pub trait TargetOperations {
    fn target_operations(&self) -> &[Operation];

    /// An empty target list applies to every operation.
    fn targets(&self, op: Operation) -> bool {
        let ops = self.target_operations();
        ops.is_empty() || ops.contains(&op)
    }
}

impl From<kube::core::admission::Operation> for Operation {
    fn from(op: kube::core::admission::Operation) -> Self {
        use kube::core::admission::Operation as Op;
        match op {
            Op::Create => Self::Create,
            Op::Update => Self::Update,
            Op::Delete => Self::Delete,
            Op::Connect => Self::Connect,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        })
    }
}
