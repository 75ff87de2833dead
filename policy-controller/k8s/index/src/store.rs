use dashmap::DashMap;
use kube::{
    api::{ApiResource, DynamicObject, ListParams, PatchParams},
    discovery::{self, ApiCapabilities, Scope},
};
use praetor_policy_core::{ObjectStore, StoreError};
use praetor_policy_k8s_api::{canonical_gvk, Api, Client, GroupVersionKind, Patch};
use serde_json::Value;
use std::{future::Future, time::Duration};
use tokio::time;
use tracing::debug;

/// The field manager recorded on the status patches this store issues.
pub const FIELD_MANAGER: &str = "praetor-policy-controller";

/// Reads and patches arbitrary cluster objects through the API server.
///
/// Resolved API resources are cached by kind, so each kind is discovered at
/// most once per process.
pub struct KubeStore {
    client: Client,
    timeout: Duration,
    resources: DashMap<String, (ApiResource, ApiCapabilities)>,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            resources: DashMap::new(),
        }
    }

    async fn api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let key = canonical_gvk(gvk);
        let cached = self.resources.get(&key).map(|r| r.value().clone());
        let (resource, caps) = match cached {
            Some(found) => found,
            None => {
                let found = self.bounded(discovery::pinned_kind(&self.client, gvk)).await?;
                debug!(gvk = %key, plural = %found.0.plural, "Discovered resource");
                self.resources.insert(key, found.clone());
                found
            }
        };

        let client = self.client.clone();
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client, ns, &resource),
            _ => Api::all_with(client, &resource),
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, StoreError> {
        time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(api_error)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        let api = self.api(gvk, namespace).await?;
        let object = self.bounded(api.get(name)).await.map_err(|e| match e {
            StoreError::NotFound { .. } => StoreError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            },
            e => e,
        })?;
        serde_json::to_value(object).map_err(|e| StoreError::Api(e.to_string()))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let api = self.api(gvk, namespace).await?;
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self.bounded(api.list(&params)).await?;
        list.items
            .into_iter()
            .map(|o| serde_json::to_value(o).map_err(|e| StoreError::Api(e.to_string())))
            .collect()
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<(), StoreError> {
        let api = self.api(gvk, namespace).await?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patch = Patch::<()>::Json(patch.clone());
        self.bounded(api.patch_status(name, &params, &patch)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("timeout", &self.timeout)
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

fn api_error(error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(rsp) if rsp.code == 404 => StoreError::NotFound {
            kind: String::new(),
            name: rsp.message.clone(),
        },
        error => StoreError::Api(error.to_string()),
    }
}
