//! Cluster-facing state for the admission controller.
//!
//! [`PolicyIndex`] is fed by kubert watches on the policy resources and is
//! read on every admission. [`KubeStore`] serves value references and token
//! patches against arbitrary resource kinds.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod policies;
mod store;


pub use self::{
    policies::{PolicyIndex, SharedIndex},
    store::{KubeStore, FIELD_MANAGER},
};
