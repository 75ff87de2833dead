use crate::{
    apply::{OverrideManager, ValidateManager},
    index::SharedIndex,
    interrupt::{Interrupters, PolicyReview},
    k8s::{policy::Operation, GroupVersionKind},
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Serves the mutating (`/mutate`) and validating (`/validate`) admission
/// webhooks.
///
/// Policy objects are handed to their kind's interrupter. Every other object
/// is run through the indexed override or validate policies.
#[derive(Clone)]
pub struct Admission {
    index: SharedIndex,
    interrupters: Arc<Interrupters>,
    overrides: OverrideManager,
    validates: ValidateManager,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Mutate,
    Validate,
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let phase = match (req.method(), req.uri().path()) {
            (&http::Method::POST, "/mutate") => Phase::Mutate,
            (&http::Method::POST, "/validate") => Phase::Validate,
            _ => return Box::pin(future::ok(not_found())),
        };

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            let rsp = admission.review(phase, &bytes).await;
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        index: SharedIndex,
        interrupters: Arc<Interrupters>,
        overrides: OverrideManager,
        validates: ValidateManager,
    ) -> Self {
        Self {
            index,
            interrupters,
            overrides,
            validates,
        }
    }

    async fn review(self, phase: Phase, body: &[u8]) -> AdmissionResponse {
        let review: Review = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                return AdmissionResponse::invalid(error);
            }
        };
        trace!(?review);

        let rsp = match review.try_into() {
            Ok(req) => {
                debug!(?req);
                self.admit(phase, req).await
            }
            Err(error) => {
                warn!(%error, "Invalid admission request");
                AdmissionResponse::invalid(error)
            }
        };
        debug!(?rsp);
        rsp
    }

    async fn admit(self, phase: Phase, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let operation = Operation::from(req.operation);
        if operation == Operation::Connect {
            return rsp;
        }

        let (object, old) = match (encode(req.object), encode(req.old_object)) {
            (Ok(object), Ok(old)) => (object, old),
            (Err(error), _) | (_, Err(error)) => return rsp.deny(error),
        };

        let gvk = GroupVersionKind::gvk(&req.kind.group, &req.kind.version, &req.kind.kind);
        if let Some(interrupter) = self.interrupters.get(&gvk) {
            let review = PolicyReview {
                operation,
                gvk,
                namespace: req.namespace.clone(),
                name: req.name.clone(),
                object,
                old,
                dry_run: req.dry_run,
            };
            let admitted = match phase {
                Phase::Mutate => interrupter
                    .mutate(&review)
                    .await
                    .map(|patches| with_patch(rsp.clone(), json_patch::Patch(patches))),
                Phase::Validate => interrupter.validate(&review).map(|()| rsp.clone()),
            };
            return admitted.unwrap_or_else(|error| {
                let error = format!("{error:#}");
                info!(%error, name = %review.name, kind = %review.gvk.kind, "Denied");
                rsp.deny(error)
            });
        }

        match phase {
            Phase::Mutate => self.mutate(rsp, operation, object, old).await,
            Phase::Validate => self.validate(rsp, operation, object, old).await,
        }
    }

    async fn mutate(
        &self,
        rsp: AdmissionResponse,
        operation: Operation,
        object: Option<Value>,
        old: Option<Value>,
    ) -> AdmissionResponse {
        let Some(original) = object else {
            return rsp;
        };

        let (cluster, namespaced) = {
            let index = self.index.read();
            let namespaced = original
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(|ns| index.overrides(ns))
                .unwrap_or_default();
            (index.cluster_overrides(), namespaced)
        };
        if cluster.is_empty() && namespaced.is_empty() {
            return rsp;
        }

        let mut mutated = original.clone();
        if let Err(error) = self
            .overrides
            .apply(&mut mutated, old.as_ref(), operation, &cluster, &namespaced)
            .await
        {
            info!(%error, "Failed to apply overrides");
            return rsp.deny(error);
        }

        with_patch(rsp, json_patch::diff(&original, &mutated))
    }

    async fn validate(
        &self,
        rsp: AdmissionResponse,
        operation: Operation,
        object: Option<Value>,
        old: Option<Value>,
    ) -> AdmissionResponse {
        // Deletes carry only the stored object.
        let object = match operation {
            Operation::Delete => old.clone(),
            _ => object,
        };
        let Some(object) = object else {
            return rsp;
        };

        let policies = self.index.read().cluster_validates();
        if policies.is_empty() {
            return rsp;
        }

        match self
            .validates
            .validate(&object, old.as_ref(), operation, &policies)
            .await
        {
            Ok(verdict) if verdict.valid => rsp,
            Ok(verdict) => {
                info!(policy = ?verdict.policy, reason = %verdict.reason, %operation, "Denied");
                rsp.deny(verdict.reason)
            }
            Err(error) => {
                info!(%error, "Failed to evaluate validate policies");
                rsp.deny(error)
            }
        }
    }
}

fn encode(object: Option<DynamicObject>) -> Result<Option<Value>, serde_json::Error> {
    object.map(serde_json::to_value).transpose()
}

fn with_patch(rsp: AdmissionResponse, patch: json_patch::Patch) -> AdmissionResponse {
    if patch.0.is_empty() {
        return rsp;
    }
    debug!(patches = patch.0.len(), "Patching");
    match rsp.clone().with_patch(patch) {
        Ok(rsp) => rsp,
        Err(error) => {
            warn!(%error, "Failed to encode patch");
            rsp.deny(error)
        }
    }
}

fn not_found() -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = http::StatusCode::NOT_FOUND;
    rsp
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    let mut rsp = Response::new(Body::from(bytes));
    rsp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    Ok(rsp)
}
