use crate::{
    compiler::Compiler,
    core::ObjectStore,
    k8s::{
        canonical_gvk,
        policy::{
            AffectMode, ClusterOverridePolicySpec, ClusterValidatePolicySpec, HttpAuth, Operation,
            OverridePolicySpec, OverrideRule, ReplicaReference, ValidateRule,
        },
        GroupVersionKind,
    },
    token::{credentials, Credential, HttpTokenGenerator, PolicyTokenCallback, TokenManager},
};
use anyhow::{bail, Context, Result};
use json_patch::PatchOperation;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{collections::BTreeMap, collections::HashMap, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, info};

/// A policy object under admission.
#[derive(Clone, Debug)]
pub struct PolicyReview {
    pub operation: Operation,
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
    pub object: Option<Value>,
    pub old: Option<Value>,

    /// Dry runs are compiled and checked but leave credential registrations
    /// untouched.
    pub dry_run: bool,
}

/// Handles admission of one policy kind.
#[async_trait::async_trait]
pub trait Interrupter: Send + Sync {
    /// Returns the patches the stored policy needs: compiled programs and
    /// resolved defaults. Credential registrations follow the policy's
    /// lifecycle.
    async fn mutate(&self, review: &PolicyReview) -> Result<Vec<PatchOperation>>;

    /// Checks the rendered programs of the policy as it will be stored.
    fn validate(&self, review: &PolicyReview) -> Result<()>;
}

/// Interrupters keyed by the canonical form of the kind they handle.
#[derive(Clone, Default)]
pub struct Interrupters(HashMap<String, Arc<dyn Interrupter>>);

/// The rules of a policy spec, as the interrupter sees them.
pub trait RuleSpec: DeserializeOwned + PartialEq + Send + Sync + 'static {
    /// Compiles every templated rule, returning the patches that store the
    /// programs and any defaults the templates were missing.
    fn compile(&self, compiler: &Compiler) -> Result<Vec<PatchOperation>>;

    /// Every refreshed credential, by the JSON pointer of its auth block.
    fn auths(&self) -> Vec<(String, &HttpAuth)>;

    /// Every program that will be evaluated. Fails if a templated rule has not
    /// been compiled.
    fn programs(&self) -> Result<Vec<&str>>;
}

/// Registers the credentials policies reference with the token manager.
#[derive(Clone)]
pub struct Credentials {
    tokens: Arc<TokenManager>,
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    http_timeout: Duration,
    patch_timeout: Duration,
}

pub struct PolicyInterrupter<S> {
    compiler: Compiler,
    credentials: Credentials,
    _spec: PhantomData<fn() -> S>,
}

// === impl Interrupters ===

impl Interrupters {
    pub fn register(&mut self, gvk: &GroupVersionKind, interrupter: Arc<dyn Interrupter>) {
        self.0.insert(canonical_gvk(gvk), interrupter);
    }

    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&Arc<dyn Interrupter>> {
        self.0.get(&canonical_gvk(gvk))
    }
}

impl std::fmt::Debug for Interrupters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// === impl Credentials ===

impl Credentials {
    pub fn new(
        tokens: Arc<TokenManager>,
        store: Arc<dyn ObjectStore>,
        http_timeout: Duration,
        patch_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            store,
            http: reqwest::Client::new(),
            http_timeout,
            patch_timeout,
        }
    }

    fn register(&self, review: &PolicyReview, found: &BTreeMap<String, Credential>) -> Result<()> {
        for (id, credential) in found {
            let Some(generator) = HttpTokenGenerator::from_auth(
                &credential.auth,
                self.http.clone(),
                self.http_timeout,
            ) else {
                continue;
            };
            let callback = PolicyTokenCallback::new(
                review.gvk.clone(),
                review.namespace.clone(),
                review.name.clone(),
                credential,
                self.store.clone(),
                self.patch_timeout,
            );
            debug!(token = %id, policy = %review.name, "Registering credential");
            self.tokens
                .add_token(Arc::new(generator), Arc::new(callback))
                .with_context(|| format!("failed to register credential {id}"))?;
        }
        Ok(())
    }

    async fn deregister(
        &self,
        review: &PolicyReview,
        ids: impl IntoIterator<Item = &String>,
    ) -> Result<()> {
        let callback = PolicyTokenCallback::callback_id(
            &review.gvk,
            review.namespace.as_deref(),
            &review.name,
        );
        for id in ids {
            debug!(token = %id, %callback, "Deregistering credential");
            self.tokens
                .remove_token(id, &callback)
                .await
                .with_context(|| format!("failed to deregister credential {id}"))?;
        }
        Ok(())
    }
}

// === impl PolicyInterrupter ===

impl<S: RuleSpec> PolicyInterrupter<S> {
    pub fn new(compiler: Compiler, credentials: Credentials) -> Self {
        Self {
            compiler,
            credentials,
            _spec: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<S: RuleSpec> Interrupter for PolicyInterrupter<S> {
    async fn mutate(&self, review: &PolicyReview) -> Result<Vec<PatchOperation>> {
        match review.operation {
            Operation::Create | Operation::Update => {
                let spec = decode_spec::<S>(review.object.as_ref())?
                    .context("admission request missing 'object'")?;
                let old = match review.operation {
                    Operation::Update => decode_spec::<S>(review.old.as_ref())?,
                    _ => None,
                };
                if old.as_ref() == Some(&spec) {
                    debug!(policy = %review.name, "Spec unchanged");
                    return Ok(vec![]);
                }

                let patches = spec
                    .compile(&self.compiler)
                    .with_context(|| format!("failed to compile {}", review.name))?;

                if review.dry_run {
                    debug!(policy = %review.name, "Dry run; credentials unchanged");
                } else {
                    let found = credentials(spec.auths());
                    if let Some(old) = &old {
                        let stale = credentials(old.auths())
                            .into_keys()
                            .filter(|id| !found.contains_key(id))
                            .collect::<Vec<_>>();
                        self.credentials.deregister(review, &stale).await?;
                    }
                    self.credentials.register(review, &found)?;
                }

                info!(policy = %review.name, patches = patches.len(), "Compiled policy");
                Ok(patches)
            }
            Operation::Delete if review.dry_run => Ok(vec![]),
            Operation::Delete => {
                if let Some(old) = decode_spec::<S>(review.old.as_ref())? {
                    let found = credentials(old.auths());
                    self.credentials.deregister(review, found.keys()).await?;
                }
                Ok(vec![])
            }
            Operation::Connect => Ok(vec![]),
        }
    }

    fn validate(&self, review: &PolicyReview) -> Result<()> {
        if review.operation == Operation::Delete {
            return Ok(());
        }
        let Some(spec) = decode_spec::<S>(review.object.as_ref())? else {
            bail!("admission request missing 'object'");
        };
        for program in spec.programs()? {
            self.compiler.check(program)?;
        }
        Ok(())
    }
}

fn decode_spec<S: DeserializeOwned>(object: Option<&Value>) -> Result<Option<S>> {
    let Some(object) = object else {
        return Ok(None);
    };
    let spec = object.get("spec").cloned().unwrap_or_else(|| json!({}));
    let spec = serde_json::from_value(spec).context("failed to decode policy spec")?;
    Ok(Some(spec))
}

fn add(path: String, value: Value) -> Result<PatchOperation> {
    serde_json::from_value(json!({"op": "add", "path": path, "value": value}))
        .context("failed to build patch")
}

// === impl RuleSpec ===

impl RuleSpec for OverridePolicySpec {
    fn compile(&self, compiler: &Compiler) -> Result<Vec<PatchOperation>> {
        compile_overrides(&self.override_rules, compiler)
    }

    fn auths(&self) -> Vec<(String, &HttpAuth)> {
        override_auths(&self.override_rules)
    }

    fn programs(&self) -> Result<Vec<&str>> {
        override_programs(&self.override_rules)
    }
}

impl RuleSpec for ClusterOverridePolicySpec {
    fn compile(&self, compiler: &Compiler) -> Result<Vec<PatchOperation>> {
        compile_overrides(&self.override_rules, compiler)
    }

    fn auths(&self) -> Vec<(String, &HttpAuth)> {
        override_auths(&self.override_rules)
    }

    fn programs(&self) -> Result<Vec<&str>> {
        override_programs(&self.override_rules)
    }
}

impl RuleSpec for ClusterValidatePolicySpec {
    fn compile(&self, compiler: &Compiler) -> Result<Vec<PatchOperation>> {
        let mut patches = Vec::new();
        for (i, rule) in self.validate_rules.iter().enumerate() {
            let Some(template) = &rule.template else {
                continue;
            };
            let base = format!("/spec/validateRules/{i}");

            if let Some(condition) = &template.condition {
                if condition.affect_mode.is_none() {
                    patches.push(add(
                        format!("{base}/template/condition/affectMode"),
                        serde_json::to_value(AffectMode::Reject)?,
                    )?);
                }
            }
            if let Some(badge) = &template.pod_available_badge {
                if badge.replica_reference.is_none() {
                    patches.push(add(
                        format!("{base}/template/podAvailableBadge/replicaReference"),
                        serde_json::to_value(ReplicaReference::owner_default())?,
                    )?);
                }
            }

            let program = compiler
                .compile_validate(template)
                .with_context(|| format!("validateRules[{i}]"))?;
            patches.push(add(format!("{base}/compiledCue"), Value::from(program))?);
        }
        Ok(patches)
    }

    fn auths(&self) -> Vec<(String, &HttpAuth)> {
        let mut auths = Vec::new();
        for (i, rule) in self.validate_rules.iter().enumerate() {
            let Some(template) = &rule.template else {
                continue;
            };
            let base = format!("/spec/validateRules/{i}/template");
            if let Some(condition) = &template.condition {
                if let Some(auth) = condition.data_ref.refreshed_auth() {
                    auths.push((format!("{base}/condition/dataRef/http/auth"), auth));
                }
                if let Some(auth) = condition.value_ref.as_ref().and_then(|r| r.refreshed_auth()) {
                    auths.push((format!("{base}/condition/valueRef/http/auth"), auth));
                }
            }
            let replica_auth = template
                .pod_available_badge
                .as_ref()
                .and_then(|b| b.replica_reference.as_ref())
                .and_then(|r| r.http.as_ref())
                .and_then(|h| h.auth.as_ref())
                .filter(|a| a.is_refreshed());
            if let Some(auth) = replica_auth {
                auths.push((
                    format!("{base}/podAvailableBadge/replicaReference/http/auth"),
                    auth,
                ));
            }
        }
        auths
    }

    fn programs(&self) -> Result<Vec<&str>> {
        let mut programs = Vec::new();
        for (i, rule) in self.validate_rules.iter().enumerate() {
            let ValidateRule {
                inline_cue,
                template,
                compiled_cue,
                ..
            } = rule;
            match compiled_cue.as_deref().filter(|p| !p.is_empty()) {
                Some(program) => programs.push(program),
                None if template.is_some() => {
                    bail!("validateRules[{i}] has a template but no compiled program")
                }
                None => {}
            }
            programs.extend(inline_cue.as_deref().filter(|p| !p.is_empty()));
        }
        Ok(programs)
    }
}

fn compile_overrides(rules: &[OverrideRule], compiler: &Compiler) -> Result<Vec<PatchOperation>> {
    let mut patches = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        let Some(template) = &rule.overriders.template else {
            continue;
        };
        let program = compiler
            .compile_override(template)
            .with_context(|| format!("overrideRules[{i}]"))?;
        patches.push(add(
            format!("/spec/overrideRules/{i}/overriders/compiledCue"),
            Value::from(program),
        )?);
    }
    Ok(patches)
}

fn override_auths(rules: &[OverrideRule]) -> Vec<(String, &HttpAuth)> {
    rules
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| {
            let auth = rule
                .overriders
                .template
                .as_ref()?
                .value_ref
                .as_ref()?
                .refreshed_auth()?;
            Some((
                format!("/spec/overrideRules/{i}/overriders/template/valueRef/http/auth"),
                auth,
            ))
        })
        .collect()
}

fn override_programs(rules: &[OverrideRule]) -> Result<Vec<&str>> {
    let mut programs = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        let overriders = &rule.overriders;
        match overriders.compiled_cue.as_deref().filter(|p| !p.is_empty()) {
            Some(program) => programs.push(program),
            None if overriders.template.is_some() => {
                bail!("overrideRules[{i}] has a template but no compiled program")
            }
            None => {}
        }
        programs.extend(overriders.inline_cue.as_deref().filter(|p| !p.is_empty()));
    }
    Ok(programs)
}
