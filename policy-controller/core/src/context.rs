use praetor_policy_k8s_api::policy::RefSource;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Key of the object under admission.
pub const OBJECT: &str = "object";

/// Key of the previous version of the object under admission.
pub const OLD_OBJECT: &str = "oldObject";

/// Key of a related cluster object (by selector or owner reference).
pub const OTHER_OBJECT: &str = "otherObject";

/// Key of an http response bag (`body`, `headers`, `trailers`).
pub const HTTP: &str = "http";

/// Distinguishes a rule's data reference from its value reference.
pub const DATA_SUFFIX: &str = "_d";

/// The role a reference plays in a rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RefRole {
    Value,
    Data,
}

/// The named inputs a rule program is evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataContext(BTreeMap<String, Value>);

/// Returns the context key under which a resolved reference is stored.
pub fn key_for(source: RefSource, role: RefRole) -> String {
    let base = match source {
        RefSource::Current => return OBJECT.to_string(),
        RefSource::Old => return OLD_OBJECT.to_string(),
        RefSource::Owner | RefSource::K8s => OTHER_OBJECT,
        RefSource::Http => HTTP,
    };
    match role {
        RefRole::Value => base.to_string(),
        RefRole::Data => format!("{base}{DATA_SUFFIX}"),
    }
}

// === impl DataContext ===

impl DataContext {
    pub fn new(object: Value, old: Option<Value>) -> Self {
        let mut ctx = Self::default();
        ctx.insert(OBJECT, object);
        if let Some(old) = old {
            ctx.insert(OLD_OBJECT, old);
        }
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}
