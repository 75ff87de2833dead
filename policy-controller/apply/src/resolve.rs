use crate::placeholder;
use http_body_util::BodyExt;
use praetor_policy_core::{
    context::{self, RefRole},
    store, DataContext, ObjectStore, StoreError,
};
use praetor_policy_k8s_api::policy::{HttpDataRef, K8sRef, RefSource, ValueRef};
use reqwest::header::HeaderMap;
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// The default bound on http value reference requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("placeholder {{{{{path}}}}} {reason}")]
    Placeholder { path: String, reason: &'static str },

    #[error("{from:?} reference has no {block} block")]
    MissingBlock { from: RefSource, block: &'static str },

    #[error("object has no owner reference")]
    NoOwner,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid http method {0:?}")]
    Method(String),

    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http request to {url} returned {status}")]
    Status { url: String, status: u16 },
}

/// The data a rule set's references resolved to. Each distinct reference is
/// fetched at most once per set.
#[derive(Clone, Debug, Default)]
pub struct Resolved(Vec<(ValueRef, Value)>);

/// Fetches the external data value references point at.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    http_timeout: Duration,
}

// === impl Resolver ===

impl Resolver {
    pub fn new(store: Arc<dyn ObjectStore>, http_timeout: Duration) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            http_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Resolves one reference against the object under admission.
    ///
    /// Returns the context key the data belongs under, or `None` for
    /// references to the admission's own objects, which need no fetch.
    pub async fn resolve(
        &self,
        object: &Value,
        r: &ValueRef,
        role: RefRole,
    ) -> Result<Option<(String, Value)>, ResolveError> {
        let value = match r.from {
            RefSource::Current | RefSource::Old => return Ok(None),
            RefSource::Owner => self.owner(object).await?,
            RefSource::K8s => {
                let k8s = r.k8s.as_ref().ok_or(ResolveError::MissingBlock {
                    from: r.from,
                    block: "k8s",
                })?;
                self.k8s(object, k8s).await?
            }
            RefSource::Http => {
                let http = r.http.as_ref().ok_or(ResolveError::MissingBlock {
                    from: r.from,
                    block: "http",
                })?;
                self.http(object, http).await?
            }
        };
        Ok(Some((context::key_for(r.from, role), value)))
    }

    /// Builds the data context one rule evaluates against.
    ///
    /// References already fetched for the rule set are served from
    /// `resolved` rather than fetched again.
    pub async fn context(
        &self,
        object: &Value,
        old: Option<&Value>,
        refs: &[(ValueRef, RefRole)],
        resolved: &mut Resolved,
    ) -> Result<DataContext, ResolveError> {
        let mut ctx = DataContext::new(object.clone(), old.cloned());
        for (r, role) in refs {
            if let Some(value) = resolved.get(r) {
                ctx.insert(context::key_for(r.from, *role), value.clone());
                continue;
            }
            if let Some((key, value)) = self.resolve(object, r, *role).await? {
                resolved.insert(r.clone(), value.clone());
                ctx.insert(key, value);
            }
        }
        Ok(ctx)
    }

    async fn owner(&self, object: &Value) -> Result<Value, ResolveError> {
        let owner = object
            .pointer("/metadata/ownerReferences/0")
            .ok_or(ResolveError::NoOwner)?;
        let field = |name: &str| owner.get(name).and_then(Value::as_str).unwrap_or_default();

        let gvk = store::gvk(field("apiVersion"), field("kind"))?;
        let namespace = object.pointer("/metadata/namespace").and_then(Value::as_str);
        debug!(kind = %gvk.kind, name = field("name"), ?namespace, "Fetching owner");
        let owner = self.store.get(&gvk, namespace, field("name")).await?;
        Ok(owner)
    }

    async fn k8s(&self, object: &Value, k8s: &K8sRef) -> Result<Value, ResolveError> {
        let gvk = store::gvk(&k8s.api_version, &k8s.kind)?;
        let namespace = k8s
            .namespace
            .as_deref()
            .map(|ns| placeholder::substitute(object, ns))
            .transpose()?
            .filter(|ns| !ns.is_empty())
            .or_else(|| {
                object
                    .pointer("/metadata/namespace")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        if let Some(name) = k8s.name.as_deref().filter(|n| !n.is_empty()) {
            let name = placeholder::substitute(object, name)?;
            return match self.store.get(&gvk, namespace.as_deref(), &name).await {
                Ok(found) => Ok(found),
                Err(error) if error.is_not_found() => Ok(Value::Null),
                Err(error) => Err(error.into()),
            };
        }

        let mut selector = Vec::new();
        for (key, value) in k8s.label_selector.iter().flatten() {
            selector.push(format!("{key}={}", placeholder::substitute(object, value)?));
        }
        let found = self
            .store
            .list(&gvk, namespace.as_deref(), &selector.join(","))
            .await?;
        Ok(found.into_iter().next().unwrap_or(Value::Null))
    }

    async fn http(&self, object: &Value, http: &HttpDataRef) -> Result<Value, ResolveError> {
        let method = http.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ResolveError::Method(method.clone()))?;

        let mut params = Vec::new();
        for (key, value) in http.params.iter().flatten() {
            params.push((key.clone(), placeholder::substitute(object, value)?));
        }

        let mut req = self
            .http
            .request(method, &http.url)
            .query(&params)
            .timeout(self.http_timeout);
        if let Some(token) = http.auth.as_ref().and_then(|a| a.bearer()) {
            req = req.bearer_auth(token);
        }

        let failed = |source| ResolveError::Http {
            url: http.url.clone(),
            source,
        };
        let rsp = req.send().await.map_err(failed)?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                url: http.url.clone(),
                status: status.as_u16(),
            });
        }

        let (parts, body) = http::Response::from(rsp).into_parts();
        let collected = body.collect().await.map_err(failed)?;
        let trailers = collected.trailers().map(header_bag).unwrap_or_default();
        let bytes = collected.to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::from(String::from_utf8_lossy(&bytes).into_owned()));

        Ok(json!({
            "body": body,
            "headers": header_bag(&parts.headers),
            "trailers": trailers,
        }))
    }
}

/// Groups header values by name, preserving repeated headers in order.
fn header_bag(headers: &HeaderMap) -> Map<String, Value> {
    let mut bag = Map::new();
    for (name, value) in headers {
        let values = bag
            .entry(name.as_str().to_string())
            .or_insert_with(|| Value::Array(vec![]));
        if let (Value::Array(values), Ok(value)) = (values, value.to_str()) {
            values.push(Value::from(value));
        }
    }
    bag
}

// === impl Resolved ===

impl Resolved {
    fn get(&self, r: &ValueRef) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == r).map(|(_, v)| v)
    }

    fn insert(&mut self, r: ValueRef, value: Value) {
        self.0.push((r, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("http_timeout", &self.http_timeout)
            .finish_non_exhaustive()
    }
}
