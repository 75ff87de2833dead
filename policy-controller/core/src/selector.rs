use praetor_policy_k8s_api::{
    labels::{Map, Operator},
    policy::{FieldExpression, FieldSelector, ResourceSelector},
};
use serde_json::Value;

const ANNOTATIONS_SEGMENT: &str = ".annotations.";

/// Tests an object against a single selector.
///
/// The type and namespace must match exactly. A selector `name` decides the
/// match on its own; otherwise the field and label selectors, when present,
/// must both match. A selector carrying neither matches every object of its type.
pub fn matches(resource: &Value, selector: &ResourceSelector) -> bool {
    if str_at(resource, &["apiVersion"]) != Some(selector.api_version.as_str())
        || str_at(resource, &["kind"]) != Some(selector.kind.as_str())
    {
        return false;
    }

    if let Some(ns) = selector.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        if str_at(resource, &["metadata", "namespace"]) != Some(ns) {
            return false;
        }
    }

    if let Some(name) = selector.name.as_deref().filter(|n| !n.is_empty()) {
        return str_at(resource, &["metadata", "name"]) == Some(name);
    }

    let fields_match = selector
        .field_selector
        .as_ref()
        .map_or(true, |fields| fields_match(resource, fields));
    let labels_match = selector
        .label_selector
        .as_ref()
        .map_or(true, |labels| labels.matches(&labels_of(resource)));
    fields_match && labels_match
}

/// Tests an object against a policy's selector list. Any selector may match;
/// an empty list matches every object.
pub fn matches_any(resource: &Value, selectors: &[ResourceSelector]) -> bool {
    selectors.is_empty() || selectors.iter().any(|s| matches(resource, s))
}

/// Looks up a dotted field path.
///
/// Everything after an `.annotations.` segment is a single annotation key,
/// since annotation keys may themselves contain dots.
pub fn lookup<'v>(object: &'v Value, path: &str) -> Option<&'v Value> {
    split_field_path(path)
        .into_iter()
        .try_fold(object, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn split_field_path(path: &str) -> Vec<&str> {
    let path = path.trim_start_matches('.');
    match path.find(ANNOTATIONS_SEGMENT) {
        Some(idx) => {
            let key = &path[idx + ANNOTATIONS_SEGMENT.len()..];
            let mut segments = path[..idx].split('.').collect::<Vec<_>>();
            segments.push("annotations");
            segments.push(key);
            segments
        }
        None => path.split('.').collect(),
    }
}

fn fields_match(resource: &Value, selector: &FieldSelector) -> bool {
    for (path, expected) in selector.match_fields.iter().flatten() {
        if lookup(resource, path).map(scalar_string).as_deref() != Some(expected.as_str()) {
            return false;
        }
    }

    selector
        .match_expressions
        .iter()
        .flatten()
        .all(|expr| expression_matches(resource, expr))
}

fn expression_matches(resource: &Value, expr: &FieldExpression) -> bool {
    let value = lookup(resource, &expr.field).map(scalar_string);
    match expr.operator {
        Operator::In => value.is_some_and(|v| expr.values.contains(&v)),
        Operator::NotIn => !value.is_some_and(|v| expr.values.contains(&v)),
        Operator::Exists => value.is_some(),
        Operator::DoesNotExist => value.is_none(),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn str_at<'v>(object: &'v Value, path: &[&str]) -> Option<&'v str> {
    path.iter()
        .try_fold(object, |v, key| v.get(key))
        .and_then(Value::as_str)
}

fn labels_of(resource: &Value) -> Map {
    resource
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
