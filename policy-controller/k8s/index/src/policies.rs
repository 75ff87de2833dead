use parking_lot::RwLock;
use praetor_policy_k8s_api::{
    policy::{ClusterOverridePolicy, ClusterValidatePolicy, OverridePolicy},
    ResourceExt,
};
use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<PolicyIndex>>;

/// Holds the policies admission decisions are made against, as last observed
/// by the cluster watches.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    /// Namespaced override policies, by namespace and name.
    overrides: HashMap<String, BTreeMap<String, OverridePolicy>>,
    cluster_overrides: BTreeMap<String, ClusterOverridePolicy>,
    cluster_validates: BTreeMap<String, ClusterValidatePolicy>,
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    /// The override policies in a namespace.
    pub fn overrides(&self, namespace: &str) -> Vec<OverridePolicy> {
        self.overrides
            .get(namespace)
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cluster_overrides(&self) -> Vec<ClusterOverridePolicy> {
        self.cluster_overrides.values().cloned().collect()
    }

    pub fn cluster_validates(&self) -> Vec<ClusterValidatePolicy> {
        self.cluster_validates.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
            && self.cluster_overrides.is_empty()
            && self.cluster_validates.is_empty()
    }
}

impl kubert::index::IndexNamespacedResource<OverridePolicy> for PolicyIndex {
    fn apply(&mut self, policy: OverridePolicy) {
        let Some(namespace) = policy.namespace() else {
            warn!(name = %policy.name_any(), "OverridePolicy has no namespace");
            return;
        };
        let name = policy.name_any();
        debug!(%namespace, %name, "Indexing OverridePolicy");
        self.overrides
            .entry(namespace)
            .or_default()
            .insert(name, policy);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Entry::Occupied(mut entry) = self.overrides.entry(namespace) {
            entry.get_mut().remove(&name);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

impl kubert::index::IndexClusterResource<ClusterOverridePolicy> for PolicyIndex {
    fn apply(&mut self, policy: ClusterOverridePolicy) {
        let name = policy.name_any();
        debug!(%name, "Indexing ClusterOverridePolicy");
        self.cluster_overrides.insert(name, policy);
    }

    fn delete(&mut self, name: String) {
        self.cluster_overrides.remove(&name);
    }
}

impl kubert::index::IndexClusterResource<ClusterValidatePolicy> for PolicyIndex {
    fn apply(&mut self, policy: ClusterValidatePolicy) {
        let name = policy.name_any();
        debug!(%name, "Indexing ClusterValidatePolicy");
        self.cluster_validates.insert(name, policy);
    }

    fn delete(&mut self, name: String) {
        self.cluster_validates.remove(&name);
    }
}
