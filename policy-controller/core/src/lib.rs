#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Core policy semantics, independent of how policies and objects are
//! fetched or how rule programs are evaluated.
//!
//! - [`selector`] decides whether an object falls within a policy's scope.
//! - [`order`] picks the rule sets that apply to an admission and orders them.
//! - [`path`] converts JSON-pointer-style paths to engine expressions.
//! - [`engine`] and [`store`] are the contracts for the evaluation engine and
//!   the cluster object store.

pub mod context;
pub mod engine;
pub mod order;
pub mod path;
pub mod selector;
pub mod store;

pub use self::{
    context::DataContext,
    engine::{Engine, EngineError},
    order::{select_and_order, Policy, RuleSet},
    store::{ObjectStore, StoreError},
};
pub use praetor_policy_k8s_api::policy::Operation;
