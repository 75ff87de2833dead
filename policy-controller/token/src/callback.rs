use crate::{generator, Error, Token, TokenCallback};
use chrono::SecondsFormat;
use json_patch::{Patch, PatchOperation};
use praetor_policy_core::{ObjectStore, StoreError};
use praetor_policy_k8s_api::{canonical_gvk, policy::HttpAuth, GroupVersionKind};
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::time;
use tracing::debug;

/// One credential referenced by a policy, with every place in the policy its
/// token and expiry are written to.
#[derive(Clone, Debug, PartialEq)]
pub struct Credential {
    pub auth: HttpAuth,
    pub token_paths: Vec<String>,
    pub expire_paths: Vec<String>,
}

/// Writes refreshed tokens into a policy object's stored spec.
#[derive(Clone)]
pub struct PolicyTokenCallback {
    id: String,
    gvk: GroupVersionKind,
    namespace: Option<String>,
    name: String,
    token_paths: Vec<String>,
    expire_paths: Vec<String>,
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

/// Groups a policy's refreshed auth blocks by credential identity.
///
/// `auths` yields the JSON pointer of each auth block with the block itself;
/// the token and expiry paths are that pointer's `token` and `expireAt`
/// members.
pub fn credentials<'a>(
    auths: impl IntoIterator<Item = (String, &'a HttpAuth)>,
) -> BTreeMap<String, Credential> {
    let mut credentials = BTreeMap::<String, Credential>::new();
    for (pointer, auth) in auths {
        let (Some(url), Some(username)) = (auth.auth_url.as_deref(), auth.username.as_deref())
        else {
            continue;
        };
        if !auth.is_refreshed() {
            continue;
        }
        let credential = credentials
            .entry(generator::identity(url, username))
            .or_insert_with(|| Credential {
                auth: auth.clone(),
                token_paths: vec![],
                expire_paths: vec![],
            });
        credential.token_paths.push(format!("{pointer}/token"));
        credential.expire_paths.push(format!("{pointer}/expireAt"));
    }
    credentials
}

// === impl PolicyTokenCallback ===

impl PolicyTokenCallback {
    pub fn new(
        gvk: GroupVersionKind,
        namespace: Option<String>,
        name: String,
        credential: &Credential,
        store: Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Self::callback_id(&gvk, namespace.as_deref(), &name),
            gvk,
            namespace,
            name,
            token_paths: credential.token_paths.clone(),
            expire_paths: credential.expire_paths.clone(),
            store,
            timeout,
        }
    }

    /// The callback id of a policy object, `<Kind>/<namespace>/<name>`.
    pub fn callback_id(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}/{name}", gvk.kind, namespace.unwrap_or_default())
    }

    /// Builds the patch that writes `token` into `live`. Paths already set are
    /// replaced and missing ones are added.
    pub fn patch(&self, live: &Value, token: &Token) -> Result<Patch, serde_json::Error> {
        let expire_at = token.expire_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let ops = self
            .token_paths
            .iter()
            .map(|path| (path, token.value.as_str()))
            .chain(self.expire_paths.iter().map(|path| (path, expire_at.as_str())))
            .map(|(path, value)| {
                let op = if live.pointer(path).is_some() {
                    "replace"
                } else {
                    "add"
                };
                serde_json::from_value::<PatchOperation>(json!({
                    "op": op,
                    "path": path,
                    "value": value,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Patch(ops))
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, Error> {
        time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
            .map_err(|e| self.failed(e))
    }

    fn failed(&self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Callback {
            id: self.id.clone(),
            source: Box::new(source),
        }
    }
}

#[async_trait::async_trait]
impl TokenCallback for PolicyTokenCallback {
    fn id(&self) -> &str {
        &self.id
    }

    async fn update(&self, token: &Token) -> Result<(), Error> {
        let live = self
            .bounded(self.store.get(&self.gvk, self.namespace.as_deref(), &self.name))
            .await?;
        let patch = self.patch(&live, token).map_err(|e| self.failed(e))?;
        self.bounded(self.store.patch_status(
            &self.gvk,
            self.namespace.as_deref(),
            &self.name,
            &patch,
        ))
        .await?;
        debug!(
            policy = %self.id,
            gvk = %canonical_gvk(&self.gvk),
            paths = self.token_paths.len(),
            "Patched token"
        );
        Ok(())
    }
}

impl std::fmt::Debug for PolicyTokenCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTokenCallback")
            .field("id", &self.id)
            .field("token_paths", &self.token_paths)
            .field("expire_paths", &self.expire_paths)
            .finish_non_exhaustive()
    }
}
