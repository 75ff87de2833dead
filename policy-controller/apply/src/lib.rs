#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Evaluates override and validate rules against admitted objects.

mod overrides;
pub mod placeholder;
pub mod refs;
mod resolve;
mod validate;

#[cfg(test)]
mod tests;

pub use self::{
    overrides::{plaintext_ops, AppliedOverrides, OverrideApplier, OverrideManager},
    resolve::{ResolveError, Resolved, Resolver, DEFAULT_HTTP_TIMEOUT},
    validate::{ValidateApplier, ValidateManager, Verdict},
};

/// A rule failure, attributed to the policy that declared the rule.
#[derive(Debug, thiserror::Error)]
#[error("policy {policy}: {source}")]
pub struct ApplyError {
    pub policy: String,
    #[source]
    pub source: RuleError,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to resolve a value reference: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Engine(#[from] praetor_policy_core::EngineError),

    #[error("invalid patch operation: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to apply patch: {0}")]
    Patch(#[from] json_patch::PatchError),
}
