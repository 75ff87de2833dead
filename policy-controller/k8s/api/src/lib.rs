#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod labels;
pub mod policy;

pub use self::{duration::K8sDuration, labels::Labels};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Affinity, ResourceRequirements, Toleration},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
pub use kube::{
    api::{Api, DynamicObject, ObjectMeta, Patch, PatchParams, ResourceExt},
    core::{GroupVersion, GroupVersionKind, TypeMeta},
    error::ErrorResponse,
    Client, Error, Resource,
};

/// The API group served by the policy CRDs.
pub const POLICY_API_GROUP: &str = "policy.praetor.io";

/// The API version served by the policy CRDs.
pub const POLICY_API_VERSION: &str = "v1alpha1";

/// Records the cluster-scoped overriders applied to an object, in application order.
pub const APPLIED_CLUSTER_OVERRIDES_ANNOTATION: &str = "policy.praetor.io/applied-cluster-overrides";

/// Records the namespace-scoped overriders applied to an object, in application order.
pub const APPLIED_OVERRIDES_ANNOTATION: &str = "policy.praetor.io/applied-overrides";

/// Returns the `GroupVersionKind` of a static resource type.
pub fn gvk_of<T>() -> GroupVersionKind
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    GroupVersionKind::gvk(&T::group(&dt), &T::version(&dt), &T::kind(&dt))
}

/// Returns the `group/version/kind` form used to key caches and registries.
pub fn canonical_gvk(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("core/{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}
