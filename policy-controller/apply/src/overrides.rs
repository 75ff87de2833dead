use crate::{refs, ApplyError, Resolved, Resolver, RuleError};
use json_patch::PatchOperation;
use praetor_policy_core::{
    engine::{self, PATCHES_PATH},
    select_and_order, Engine, Operation, RuleSet,
};
use praetor_policy_k8s_api::{
    policy::{
        ClusterOverridePolicy, OverridePayload, OverridePolicy, OverrideRule, Overriders,
        PlaintextOverrider, TemplateOperation,
    },
    ResourceExt, APPLIED_CLUSTER_OVERRIDES_ANNOTATION, APPLIED_OVERRIDES_ANNOTATION,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies override rule sets to objects.
#[derive(Clone)]
pub struct OverrideApplier {
    engine: Arc<dyn Engine>,
    resolver: Resolver,
}

/// Applies every matching override policy to an admitted object and records
/// what was applied.
#[derive(Clone, Debug)]
pub struct OverrideManager {
    applier: OverrideApplier,
}

/// One policy's contribution, as recorded in the applied-overrides annotations.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOverrides {
    pub policy_name: String,
    pub overriders: Vec<Overriders>,
}

// === impl OverrideApplier ===

impl OverrideApplier {
    pub fn new(engine: Arc<dyn Engine>, resolver: Resolver) -> Self {
        Self { engine, resolver }
    }

    /// Applies a rule set to `object` in place.
    ///
    /// Rules apply one after another, each seeing the effects of the ones
    /// before it. The first failure aborts the rest of the set.
    pub async fn apply(
        &self,
        object: &mut Value,
        old: Option<&Value>,
        set: &RuleSet<OverrideRule>,
    ) -> Result<(), ApplyError> {
        let mut resolved = Resolved::default();
        for rule in &set.rules {
            self.apply_rule(object, old, rule, &mut resolved)
                .await
                .map_err(|source| ApplyError {
                    policy: set.policy.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn apply_rule(
        &self,
        object: &mut Value,
        old: Option<&Value>,
        rule: &OverrideRule,
        resolved: &mut Resolved,
    ) -> Result<(), RuleError> {
        for payload in rule.overriders.payloads() {
            let ops: Vec<PatchOperation> = match payload {
                OverridePayload::Compiled { template, program } => {
                    let refs = template.map(refs::override_refs).unwrap_or_default();
                    let ctx = self.resolver.context(object, old, &refs, resolved).await?;
                    engine::execute_as(&*self.engine, program, &ctx, PATCHES_PATH)?
                }
                OverridePayload::Inline(program) => {
                    let ctx = self.resolver.context(object, old, &[], resolved).await?;
                    engine::execute_as(&*self.engine, program, &ctx, PATCHES_PATH)?
                }
                OverridePayload::Plaintext(overriders) => plaintext_ops(overriders)?,
            };
            debug!(ops = ops.len(), "Applying patch");
            apply_ops(object, &ops)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for OverrideApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideApplier")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Converts plaintext overriders into patch operations.
pub fn plaintext_ops(overriders: &[PlaintextOverrider]) -> Result<Vec<PatchOperation>, RuleError> {
    overriders
        .iter()
        .map(|o| {
            let op = match o.op {
                TemplateOperation::Add => json!({"op": "add", "path": o.path, "value": o.value}),
                TemplateOperation::Replace => {
                    json!({"op": "replace", "path": o.path, "value": o.value})
                }
                TemplateOperation::Remove => json!({"op": "remove", "path": o.path}),
            };
            serde_json::from_value(op).map_err(RuleError::Decode)
        })
        .collect()
}

fn apply_ops(object: &mut Value, ops: &[PatchOperation]) -> Result<(), RuleError> {
    json_patch::patch(object, ops).map_err(RuleError::Patch)
}

// === impl OverrideManager ===

impl OverrideManager {
    pub fn new(applier: OverrideApplier) -> Self {
        Self { applier }
    }

    /// Applies cluster policies, then policies in the object's namespace, as
    /// two separately ordered passes.
    pub async fn apply(
        &self,
        object: &mut Value,
        old: Option<&Value>,
        op: Operation,
        cluster: &[ClusterOverridePolicy],
        namespaced: &[OverridePolicy],
    ) -> Result<(), ApplyError> {
        let sets = select_and_order(cluster, object, op);
        let applied = self.apply_sets(object, old, &sets).await?;
        record(object, APPLIED_CLUSTER_OVERRIDES_ANNOTATION, &applied);

        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let local = namespaced
            .iter()
            .filter(|p| p.namespace() == namespace)
            .collect::<Vec<_>>();
        let sets = select_and_order(local, object, op);
        let applied = self.apply_sets(object, old, &sets).await?;
        record(object, APPLIED_OVERRIDES_ANNOTATION, &applied);
        Ok(())
    }

    async fn apply_sets(
        &self,
        object: &mut Value,
        old: Option<&Value>,
        sets: &[RuleSet<OverrideRule>],
    ) -> Result<Vec<AppliedOverrides>, ApplyError> {
        let mut applied = Vec::with_capacity(sets.len());
        for set in sets {
            self.applier.apply(object, old, set).await?;
            info!(policy = %set.policy, rules = set.rules.len(), "Applied overrides");
            applied.push(AppliedOverrides {
                policy_name: set.policy.clone(),
                overriders: set.rules.iter().map(|r| r.overriders.clone()).collect(),
            });
        }
        Ok(applied)
    }
}

/// Writes the applied-overrides bookkeeping annotation. Nothing is written
/// when no policy applied.
fn record(object: &mut Value, annotation: &str, applied: &[AppliedOverrides]) {
    if applied.is_empty() {
        return;
    }
    let Ok(encoded) = serde_json::to_string(applied) else {
        return;
    };
    let Some(metadata) = object
        .as_object_mut()
        .map(|o| o.entry("metadata").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| json!({}));
    if !annotations.is_object() {
        *annotations = json!({});
    }
    if let Some(annotations) = annotations.as_object_mut() {
        annotations.insert(annotation.to_string(), Value::from(encoded));
    }
}
