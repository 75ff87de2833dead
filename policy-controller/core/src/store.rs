use kube::core::{GroupVersion, GroupVersionKind};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid apiVersion {0:?}")]
    InvalidApiVersion(String),

    #[error("api request failed: {0}")]
    Api(String),
}

/// Read access to cluster objects of arbitrary kinds, plus the status writes
/// the token manager needs.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError>;

    /// Lists objects matching a label selector in query form (`a=b,c=d`). An
    /// empty selector lists everything.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>, StoreError>;

    /// Applies a JSON patch to the status subresource of an object.
    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<(), StoreError>;
}

/// Parses an `apiVersion`/`kind` pair.
pub fn gvk(api_version: &str, kind: &str) -> Result<GroupVersionKind, StoreError> {
    let invalid = || StoreError::InvalidApiVersion(api_version.to_string());
    let gv = api_version.parse::<GroupVersion>().map_err(|_| invalid())?;
    if gv.version.is_empty() || gv.version.contains('/') {
        return Err(invalid());
    }
    Ok(GroupVersionKind::gvk(&gv.group, &gv.version, kind))
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
