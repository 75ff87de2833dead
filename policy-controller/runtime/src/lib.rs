#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use praetor_policy_apply as apply;
pub use praetor_policy_compiler as compiler;
pub use praetor_policy_core as core;
pub use praetor_policy_k8s_api as k8s;
pub use praetor_policy_k8s_index as index;
pub use praetor_policy_token as token;

mod admission;
mod args;
mod cue;
mod interrupt;

pub use self::{
    admission::Admission,
    args::Args,
    cue::CueCli,
    interrupt::{Credentials, Interrupter, Interrupters, PolicyInterrupter, PolicyReview, RuleSpec},
};
