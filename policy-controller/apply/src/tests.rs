use super::*;
use kube::core::GroupVersionKind;
use maplit::btreemap;
use praetor_policy_core::{
    context::RefRole, DataContext, Engine, EngineError, ObjectStore, Operation, RuleSet,
    StoreError,
};
use praetor_policy_k8s_api::{
    canonical_gvk,
    policy::{
        ClusterOverridePolicy, ClusterOverridePolicySpec, ClusterValidatePolicy,
        ClusterValidatePolicySpec, Cond, HttpAuth, HttpDataRef, K8sRef, OverridePolicy,
        OverridePolicySpec, OverrideRule, Overriders, PlaintextOverrider, RefSource,
        TemplateOperation, ValidateCondition, ValidateRule, ValidateRuleTemplate,
        ValidateTemplateType, ValueRef,
    },
    APPLIED_CLUSTER_OVERRIDES_ANNOTATION, APPLIED_OVERRIDES_ANNOTATION,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

// === fakes ===

/// An engine whose evaluation is a closure over the program and its data.
struct FnEngine<F>(F);

impl<F> Engine for FnEngine<F>
where
    F: Fn(&str, &DataContext) -> Result<Value, EngineError> + Send + Sync,
{
    fn format(&self, program: &str) -> Result<String, EngineError> {
        Ok(program.to_string())
    }

    fn validate(&self, _: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn execute(&self, program: &str, data: &DataContext, _: &str) -> Result<Value, EngineError> {
        (self.0)(program, data)
    }
}

fn engine<F>(f: F) -> Arc<dyn Engine>
where
    F: Fn(&str, &DataContext) -> Result<Value, EngineError> + Send + Sync + 'static,
{
    Arc::new(FnEngine(f))
}

#[derive(Default)]
struct MemStore {
    objects: Mutex<HashMap<(String, Option<String>, String), Value>>,
    reads: AtomicUsize,
}

impl MemStore {
    fn with(objects: impl IntoIterator<Item = Value>) -> Arc<Self> {
        let store = Self::default();
        for object in objects {
            let gvk = praetor_policy_core::store::gvk(
                object["apiVersion"].as_str().unwrap(),
                object["kind"].as_str().unwrap(),
            )
            .unwrap();
            let ns = object["metadata"]["namespace"].as_str().map(str::to_string);
            let name = object["metadata"]["name"].as_str().unwrap().to_string();
            store
                .objects
                .lock()
                .unwrap()
                .insert((canonical_gvk(&gvk), ns, name), object);
        }
        Arc::new(store)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = (canonical_gvk(gvk), namespace.map(str::to_string), name.to_string());
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            })
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Value>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let wanted = label_selector
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.split_once('='))
            .collect::<Vec<_>>();
        let mut found = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((kind, ns, _), _)| {
                *kind == canonical_gvk(gvk) && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .filter(|(_, object)| {
                wanted
                    .iter()
                    .all(|(k, v)| object["metadata"]["labels"][*k].as_str() == Some(*v))
            })
            .map(|((_, _, name), object)| (name.clone(), object.clone()))
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found.into_iter().map(|(_, o)| o).collect())
    }

    async fn patch_status(
        &self,
        _: &GroupVersionKind,
        _: Option<&str>,
        _: &str,
        _: &json_patch::Patch,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

fn new_resolver(store: Arc<MemStore>) -> Resolver {
    Resolver::new(store, Duration::from_secs(2))
}

fn pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "web-0",
            "namespace": "apps",
            "labels": {"app": "web"},
            "ownerReferences": [
                {"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web-5d8f", "uid": "1"}
            ]
        }
    })
}

fn replicaset() -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "ReplicaSet",
        "metadata": {"name": "web-5d8f", "namespace": "apps", "labels": {"app": "web"}},
        "spec": {"replicas": 3},
        "status": {"replicas": 3}
    })
}

fn plaintext(path: &str, op: TemplateOperation, value: Option<Value>) -> OverrideRule {
    OverrideRule {
        target_operations: vec![],
        overriders: Overriders {
            plaintext: vec![PlaintextOverrider {
                path: path.to_string(),
                op,
                value,
            }],
            ..Overriders::default()
        },
    }
}

fn inline_override(program: &str) -> OverrideRule {
    OverrideRule {
        target_operations: vec![],
        overriders: Overriders {
            inline_cue: Some(program.to_string()),
            ..Overriders::default()
        },
    }
}

fn inline_validate(program: &str) -> ValidateRule {
    ValidateRule {
        inline_cue: Some(program.to_string()),
        ..ValidateRule::default()
    }
}

fn no_engine() -> Arc<dyn Engine> {
    engine(|_, _| Err(EngineError::Unavailable("unused".to_string())))
}

// === resolver ===

#[tokio::test]
async fn owner_reference_is_fetched_from_the_object_namespace() {
    let resolver = new_resolver(MemStore::with([replicaset()]));
    let owner = ValueRef::owner("");

    let (key, value) = resolver
        .resolve(&pod(), &owner, RefRole::Data)
        .await
        .unwrap()
        .expect("owner must be fetched");
    assert_eq!(key, "otherObject_d");
    assert_eq!(value["spec"]["replicas"], json!(3));

    let orphan = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "x", "namespace": "apps"}});
    assert!(matches!(
        resolver.resolve(&orphan, &owner, RefRole::Data).await,
        Err(ResolveError::NoOwner)
    ));

    let missing = new_resolver(MemStore::with([]));
    assert!(matches!(
        missing.resolve(&pod(), &owner, RefRole::Data).await,
        Err(ResolveError::Store(StoreError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn k8s_references_substitute_placeholders() {
    let resolver = new_resolver(MemStore::with([replicaset()]));

    let by_labels = ValueRef {
        from: RefSource::K8s,
        path: String::new(),
        k8s: Some(K8sRef {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            namespace: Some("{{metadata.namespace}}".to_string()),
            name: None,
            label_selector: Some(btreemap! {
                "app".to_string() => "{{metadata.labels.app}}".to_string(),
            }),
        }),
        http: None,
    };
    let (key, value) = resolver
        .resolve(&pod(), &by_labels, RefRole::Value)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "otherObject");
    assert_eq!(value["metadata"]["name"], json!("web-5d8f"));

    let by_missing_name = ValueRef {
        k8s: Some(K8sRef {
            name: Some("absent".to_string()),
            namespace: Some("apps".to_string()),
            ..by_labels.k8s.clone().unwrap()
        }),
        ..by_labels.clone()
    };
    let (_, value) = resolver
        .resolve(&pod(), &by_missing_name, RefRole::Value)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, Value::Null);

    let bad_placeholder = ValueRef {
        k8s: Some(K8sRef {
            name: Some("{{metadata.uid}}".to_string()),
            ..by_labels.k8s.clone().unwrap()
        }),
        ..by_labels
    };
    assert!(matches!(
        resolver.resolve(&pod(), &bad_placeholder, RefRole::Value).await,
        Err(ResolveError::Placeholder { .. })
    ));
}

#[tokio::test]
async fn own_objects_need_no_fetch() {
    let resolver = new_resolver(MemStore::with([]));
    let resolved = resolver
        .resolve(&pod(), &ValueRef::current("/metadata"), RefRole::Data)
        .await
        .unwrap();
    assert!(resolved.is_none());

    let ctx = resolver
        .context(&pod(), Some(&json!({"old": true})), &[], &mut Resolved::default())
        .await
        .unwrap();
    assert_eq!(ctx.get("oldObject"), Some(&json!({"old": true})));
}

#[tokio::test]
async fn k8s_references_default_to_the_object_namespace() {
    let mut elsewhere = replicaset();
    elsewhere["metadata"]["namespace"] = json!("other-team");
    let resolver = new_resolver(MemStore::with([elsewhere]));

    let by_labels = ValueRef {
        from: RefSource::K8s,
        path: String::new(),
        k8s: Some(K8sRef {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            namespace: None,
            name: None,
            label_selector: Some(btreemap! { "app".to_string() => "web".to_string() }),
        }),
        http: None,
    };
    let (_, value) = resolver
        .resolve(&pod(), &by_labels, RefRole::Value)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, Value::Null);

    let by_name = ValueRef {
        k8s: Some(K8sRef {
            name: Some("web-5d8f".to_string()),
            label_selector: None,
            ..by_labels.k8s.clone().unwrap()
        }),
        ..by_labels
    };
    let (_, value) = resolver
        .resolve(&pod(), &by_name, RefRole::Value)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn references_are_fetched_once_per_rule_set() {
    let store = MemStore::with([replicaset()]);
    let engine = engine(|_, ctx| {
        let replicas = ctx.get("otherObject_d").map(|rs| rs["spec"]["replicas"].clone());
        Ok(json!({"valid": replicas == Some(json!(3)), "reason": "owner not seen"}))
    });
    let applier = ValidateApplier::new(engine, new_resolver(store.clone()));

    let owner_rule = ValidateRule {
        template: Some(ValidateRuleTemplate {
            kind: ValidateTemplateType::Condition,
            condition: Some(ValidateCondition {
                affect_mode: None,
                cond: Cond::Exist,
                data_ref: ValueRef::owner("/spec/replicas"),
                value: None,
                value_ref: None,
                message: String::new(),
            }),
            pod_available_badge: None,
        }),
        compiled_cue: Some("validate: _".to_string()),
        ..ValidateRule::default()
    };
    let set = RuleSet {
        policy: "owned".to_string(),
        rules: vec![owner_rule.clone(), owner_rule],
    };

    let verdict = applier
        .apply(&pod(), None, Operation::Create, &set)
        .await
        .unwrap();
    assert!(verdict.valid, "{}", verdict.reason);
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);

    // A later evaluation resolves afresh.
    applier
        .apply(&pod(), None, Operation::Create, &set)
        .await
        .unwrap();
    assert_eq!(store.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resolved_references_are_reused_across_rules() {
    let resolver = new_resolver(MemStore::with([replicaset()]));
    let refs = [(ValueRef::owner(""), RefRole::Data)];
    let mut resolved = Resolved::default();

    let first = resolver
        .context(&pod(), None, &refs, &mut resolved)
        .await
        .unwrap();
    assert_eq!(resolved.len(), 1);

    // Served from the set's resolved data; the orphan has nothing to fetch.
    let orphan = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "x", "namespace": "apps"}});
    let second = resolver
        .context(&orphan, None, &refs, &mut resolved)
        .await
        .unwrap();
    assert_eq!(first.get("otherObject_d"), second.get("otherObject_d"));
}

/// Serves one http response, echoing the request head back in a JSON body.
async fn serve_once(status: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&buf[..n]);
        }
        let body = json!({"request": String::from_utf8_lossy(&head)}).to_string();
        let rsp = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nx-replicas: 3\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        sock.write_all(rsp.as_bytes()).await.unwrap();
    });
    format!("http://{addr}/replicas")
}

fn http_ref(url: String) -> ValueRef {
    ValueRef {
        from: RefSource::Http,
        path: "/body".to_string(),
        k8s: None,
        http: Some(HttpDataRef {
            url,
            method: None,
            params: Some(btreemap! { "name".to_string() => "{{metadata.name}}".to_string() }),
            auth: Some(HttpAuth {
                token: Some("tok".to_string()),
                ..HttpAuth::default()
            }),
        }),
    }
}

#[tokio::test]
async fn http_references_return_a_response_bag() {
    let resolver = new_resolver(MemStore::with([]));
    let url = serve_once("200 OK").await;

    let (key, bag) = resolver
        .resolve(&pod(), &http_ref(url), RefRole::Data)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "http_d");

    let request = bag["body"]["request"].as_str().unwrap().to_ascii_lowercase();
    assert!(request.starts_with("get /replicas?name=web-0 "), "{request}");
    assert!(request.contains("authorization: bearer tok"), "{request}");
    assert_eq!(bag["headers"]["x-replicas"], json!(["3"]));
    assert_eq!(bag["trailers"], json!({}));
}

#[tokio::test]
async fn http_failures_are_errors() {
    let resolver = new_resolver(MemStore::with([]));
    let url = serve_once("503 Service Unavailable").await;

    assert!(matches!(
        resolver.resolve(&pod(), &http_ref(url), RefRole::Value).await,
        Err(ResolveError::Status { status: 503, .. })
    ));
}

// === overrides ===

fn assert_send<T: Send>(t: T) -> T {
    t
}

#[tokio::test]
async fn rule_set_evaluation_is_send() {
    let resolver = new_resolver(MemStore::with([replicaset()]));
    let overrides = OverrideApplier::new(no_engine(), resolver.clone());
    let validates = ValidateApplier::new(verdict_by_program(), resolver);

    let set = RuleSet {
        policy: "labels".to_string(),
        rules: vec![plaintext("/metadata/labels/tier", TemplateOperation::Add, Some(json!("web")))],
    };
    let mut object = pod();
    assert_send(overrides.apply(&mut object, None, &set)).await.unwrap();
    assert_eq!(object["metadata"]["labels"]["tier"], json!("web"));

    let set = RuleSet {
        policy: "guard".to_string(),
        rules: vec![inline_validate("ok")],
    };
    let verdict = assert_send(validates.apply(&object, None, Operation::Create, &set))
        .await
        .unwrap();
    assert!(verdict.valid);
}

#[test]
fn managers_are_debug() {
    let resolver = new_resolver(MemStore::with([]));
    let overrides = OverrideManager::new(OverrideApplier::new(no_engine(), resolver.clone()));
    let validates = ValidateManager::new(ValidateApplier::new(no_engine(), resolver));
    assert!(format!("{overrides:?}").contains("OverrideApplier"));
    assert!(format!("{validates:?}").contains("ValidateApplier"));
}

#[tokio::test]
async fn plaintext_override_end_to_end() {
    let applier = OverrideApplier::new(no_engine(), new_resolver(MemStore::with([])));
    let manager = OverrideManager::new(applier);

    let mut policy = OverridePolicy::new(
        "add-foo",
        OverridePolicySpec {
            resource_selectors: vec![],
            override_rules: vec![OverrideRule {
                target_operations: vec![Operation::Create],
                ..plaintext(
                    "/metadata/annotations",
                    TemplateOperation::Add,
                    Some(json!({"foo": "bar"})),
                )
            }],
        },
    );
    policy.metadata.namespace = Some("apps".to_string());

    let mut object = json!({"metadata": {"name": "x", "namespace": "apps"}});
    manager
        .apply(&mut object, None, Operation::Create, &[], &[policy])
        .await
        .unwrap();

    assert_eq!(object["metadata"]["annotations"]["foo"], json!("bar"));
    let applied: Value = serde_json::from_str(
        object["metadata"]["annotations"][APPLIED_OVERRIDES_ANNOTATION]
            .as_str()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(applied[0]["policyName"], json!("add-foo"));
    assert!(object["metadata"]["annotations"]
        .get(APPLIED_CLUSTER_OVERRIDES_ANNOTATION)
        .is_none());
}

#[tokio::test]
async fn rules_see_earlier_effects() {
    let engine = engine(|_, ctx| {
        let app = ctx
            .get("object")
            .and_then(|o| o.pointer("/metadata/labels/app"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!([{"op": "add", "path": "/metadata/labels/copy", "value": app}]))
    });
    let applier = OverrideApplier::new(engine, new_resolver(MemStore::with([])));

    let set = RuleSet {
        policy: "copy".to_string(),
        rules: vec![
            plaintext("/metadata/labels/app", TemplateOperation::Replace, Some(json!("api"))),
            inline_override("patches: _"),
        ],
    };
    let mut object = pod();
    applier.apply(&mut object, None, &set).await.unwrap();
    assert_eq!(object["metadata"]["labels"]["copy"], json!("api"));
}

#[tokio::test]
async fn patch_failures_abort_the_set() {
    let applier = OverrideApplier::new(no_engine(), new_resolver(MemStore::with([])));
    let set = RuleSet {
        policy: "broken".to_string(),
        rules: vec![
            plaintext("/spec/missing", TemplateOperation::Remove, None),
            plaintext("/metadata/labels/after", TemplateOperation::Add, Some(json!("x"))),
        ],
    };

    let mut object = pod();
    let err = applier.apply(&mut object, None, &set).await.unwrap_err();
    assert_eq!(err.policy, "broken");
    assert!(matches!(err.source, RuleError::Patch(_)));
    assert!(object["metadata"]["labels"].get("after").is_none());
}

#[tokio::test]
async fn cluster_policies_apply_first() {
    let applier = OverrideApplier::new(no_engine(), new_resolver(MemStore::with([])));
    let manager = OverrideManager::new(applier);

    let cluster = ClusterOverridePolicy::new(
        "zz-cluster",
        ClusterOverridePolicySpec {
            resource_selectors: vec![],
            override_rules: vec![plaintext(
                "/metadata/labels/tier",
                TemplateOperation::Add,
                Some(json!("cluster")),
            )],
        },
    );
    let local = |name: &str, ns: &str, value: &str| {
        let mut p = OverridePolicy::new(
            name,
            OverridePolicySpec {
                resource_selectors: vec![],
                override_rules: vec![plaintext(
                    "/metadata/labels/tier",
                    TemplateOperation::Replace,
                    Some(json!(value)),
                )],
            },
        );
        p.metadata.namespace = Some(ns.to_string());
        p
    };

    let mut object = pod();
    manager
        .apply(
            &mut object,
            None,
            Operation::Create,
            &[cluster],
            &[local("aa-local", "apps", "local"), local("other", "kube-system", "other")],
        )
        .await
        .unwrap();

    assert_eq!(object["metadata"]["labels"]["tier"], json!("local"));
    let annotations = &object["metadata"]["annotations"];
    assert!(annotations[APPLIED_CLUSTER_OVERRIDES_ANNOTATION]
        .as_str()
        .unwrap()
        .contains("zz-cluster"));
    let applied = annotations[APPLIED_OVERRIDES_ANNOTATION].as_str().unwrap();
    assert!(applied.contains("aa-local"));
    assert!(!applied.contains("\"other\""));
}

// === validation ===

fn verdict_by_program() -> Arc<dyn Engine> {
    engine(|program, _| {
        Ok(match program {
            "first" => json!({"valid": false, "reason": "first rule"}),
            "second" => json!({"valid": false, "reason": "second rule"}),
            _ => json!({"valid": true}),
        })
    })
}

#[tokio::test]
async fn first_rejection_wins() {
    let applier = ValidateApplier::new(verdict_by_program(), new_resolver(MemStore::with([])));
    let set = RuleSet {
        policy: "guard".to_string(),
        rules: vec![
            inline_validate("ok"),
            inline_validate("first"),
            inline_validate("second"),
        ],
    };

    let verdict = applier
        .apply(&pod(), None, Operation::Create, &set)
        .await
        .unwrap();
    assert!(!verdict.valid);
    assert_eq!(verdict.reason, "first rule");
    assert_eq!(verdict.policy.as_deref(), Some("guard"));
}

#[tokio::test]
async fn policies_are_checked_in_name_order() {
    let manager = ValidateManager::new(ValidateApplier::new(
        verdict_by_program(),
        new_resolver(MemStore::with([])),
    ));
    let policy = |name: &str, program: &str| {
        ClusterValidatePolicy::new(
            name,
            ClusterValidatePolicySpec {
                resource_selectors: vec![],
                validate_rules: vec![inline_validate(program)],
            },
        )
    };

    let verdict = manager
        .validate(
            &pod(),
            None,
            Operation::Create,
            &[policy("b", "first"), policy("a", "second")],
        )
        .await
        .unwrap();
    assert_eq!(verdict.reason, "second rule");

    let verdict = manager
        .validate(&pod(), None, Operation::Create, &[])
        .await
        .unwrap();
    assert!(verdict.valid);
}

#[tokio::test]
async fn delete_rejection_carries_the_configured_reason() {
    let engine = engine(|_, ctx| {
        let blocked = ctx
            .get("object")
            .and_then(|o| o.pointer("/metadata/annotations/no-delete"))
            .is_none();
        Ok(json!({"valid": !blocked, "reason": "deletion is blocked"}))
    });
    let applier = ValidateApplier::new(engine, new_resolver(MemStore::with([])));

    let rule = ValidateRule {
        target_operations: vec![Operation::Delete],
        template: Some(ValidateRuleTemplate {
            kind: ValidateTemplateType::Condition,
            condition: Some(ValidateCondition {
                affect_mode: None,
                cond: Cond::NotExist,
                data_ref: ValueRef::current("/metadata/annotations/no-delete"),
                value: None,
                value_ref: None,
                message: "deletion is blocked".to_string(),
            }),
            pod_available_badge: None,
        }),
        compiled_cue: Some("validate: _".to_string()),
        ..ValidateRule::default()
    };
    let set = RuleSet {
        policy: "no-delete".to_string(),
        rules: vec![rule],
    };

    let object = json!({"metadata": {"name": "x"}});
    let verdict = applier
        .apply(&object, None, Operation::Delete, &set)
        .await
        .unwrap();
    assert!(!verdict.valid);
    assert_eq!(verdict.reason, "deletion is blocked");
}

#[tokio::test]
async fn updates_hide_the_old_object_from_templates_that_do_not_read_it() {
    let engine = engine(|_, ctx| Ok(json!({"valid": !ctx.contains("oldObject"), "reason": "saw old"})));
    let applier = ValidateApplier::new(engine, new_resolver(MemStore::with([])));
    let old = pod();

    let templated = ValidateRule {
        template: Some(ValidateRuleTemplate {
            kind: ValidateTemplateType::Condition,
            condition: Some(ValidateCondition {
                affect_mode: None,
                cond: Cond::Exist,
                data_ref: ValueRef::current("/metadata/labels/app"),
                value: None,
                value_ref: None,
                message: String::new(),
            }),
            pod_available_badge: None,
        }),
        compiled_cue: Some("validate: _".to_string()),
        ..ValidateRule::default()
    };
    let set = RuleSet {
        policy: "p".to_string(),
        rules: vec![templated],
    };
    let verdict = applier
        .apply(&pod(), Some(&old), Operation::Update, &set)
        .await
        .unwrap();
    assert!(verdict.valid);

    let set = RuleSet {
        policy: "p".to_string(),
        rules: vec![inline_validate("legacy")],
    };
    let verdict = applier
        .apply(&pod(), Some(&old), Operation::Update, &set)
        .await
        .unwrap();
    assert!(!verdict.valid, "inline rules receive the old object");
}

#[tokio::test]
async fn evaluation_errors_name_the_policy() {
    let applier = ValidateApplier::new(no_engine(), new_resolver(MemStore::with([])));
    let set = RuleSet {
        policy: "broken".to_string(),
        rules: vec![inline_validate("x")],
    };
    let err = applier
        .apply(&pod(), None, Operation::Create, &set)
        .await
        .unwrap_err();
    assert_eq!(err.policy, "broken");
    assert!(err.to_string().starts_with("policy broken:"), "{err}");
}
