use crate::{duration::K8sDuration, labels};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed constant. Exactly one variant is set, e.g. `{"string": "x"}` or
/// `{"stringMap": {"a": "b"}}`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConstantValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    StringSlice(Vec<String>),
    IntegerSlice(Vec<i64>),
    FloatSlice(Vec<f64>),
    StringMap(BTreeMap<String, String>),
}

/// Where a value reference reads its data from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RefSource {
    /// The object under admission.
    Current,
    /// The previous version of the object under admission.
    Old,
    /// The object named by the first owner reference of the current object.
    Owner,
    /// Another cluster object, selected by `k8s`.
    K8s,
    /// An HTTP response, described by `http`.
    Http,
}

/// Declares external data a rule depends on.
///
/// `path` and the string fields of `k8s`/`http` may hold `{{dotted.path}}`
/// placeholders that are resolved against the current object.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValueRef {
    pub from: RefSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s: Option<K8sRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpDataRef>,
}

/// Selects one cluster object, by name or else by labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct K8sRef {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<labels::Map>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpDataRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuth>,
}

/// Authenticates an http value reference, either with a static token or with
/// a token fetched from `authUrl` and refreshed in the background.
///
/// `token` and `expireAt` are written by the controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_duration: Option<K8sDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<String>,
}

impl ValueRef {
    pub fn current(path: impl ToString) -> Self {
        Self {
            from: RefSource::Current,
            path: path.to_string(),
            k8s: None,
            http: None,
        }
    }

    pub fn owner(path: impl ToString) -> Self {
        Self {
            from: RefSource::Owner,
            path: path.to_string(),
            k8s: None,
            http: None,
        }
    }

    /// The credential-bearing auth block of an http reference, if any.
    pub fn refreshed_auth(&self) -> Option<&HttpAuth> {
        self.http
            .as_ref()
            .and_then(|h| h.auth.as_ref())
            .filter(|a| a.is_refreshed())
    }
}

impl HttpAuth {
    /// True when this auth block names a credential that must be refreshed.
    pub fn is_refreshed(&self) -> bool {
        self.auth_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// The bearer token to present, preferring a static token.
    pub fn bearer(&self) -> Option<&str> {
        self.static_token
            .as_deref()
            .or(self.token.as_deref())
            .filter(|t| !t.is_empty())
    }
}
