use crate::ResolveError;
use praetor_policy_core::selector;
use serde_json::Value;

/// Resolves a `{{dotted.path}}` placeholder against `object`.
///
/// Only a value wrapped exactly in `{{` and `}}` is a placeholder; anything
/// else is returned as written. A placeholder must name a string field.
pub fn substitute(object: &Value, value: &str) -> Result<String, ResolveError> {
    let Some(path) = value
        .strip_prefix("{{")
        .and_then(|v| v.strip_suffix("}}"))
        .map(str::trim)
    else {
        return Ok(value.to_string());
    };

    match selector::lookup(object, path) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ResolveError::Placeholder {
            path: path.to_string(),
            reason: "is not a string",
        }),
        None => Err(ResolveError::Placeholder {
            path: path.to_string(),
            reason: "does not exist",
        }),
    }
}
