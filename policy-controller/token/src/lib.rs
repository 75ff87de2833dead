#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Keeps refreshed credentials flowing into the policies that reference them.
//!
//! A [`TokenManager`] runs one background maintainer per distinct credential
//! (see [`TokenGenerator::id`]). Every policy that references the credential
//! registers a [`TokenCallback`]; each refresh is pushed to all of them.

mod callback;
mod generator;
mod maintainer;
mod manager;


pub use self::{
    callback::{credentials, Credential, PolicyTokenCallback},
    generator::{identity, HttpTokenGenerator, DEFAULT_EXPIRE_DURATION},
    manager::{Config, TokenManager},
};
use chrono::{DateTime, Utc};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A fetched credential and the instant it stops being valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub expire_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token expires at {expire_at}, under the minimum validity")]
    TooShortLived { expire_at: DateTime<Utc> },

    #[error("token manager is stopped")]
    Stopped,

    #[error("token maintainer {id} did not stop within {timeout:?}")]
    StopTimeout {
        id: String,
        timeout: std::time::Duration,
    },

    #[error("failed to generate token: {0}")]
    Generate(#[source] BoxError),

    #[error("callback {id} failed: {source}")]
    Callback {
        id: String,
        #[source]
        source: BoxError,
    },
}

/// Fetches fresh tokens for one credential.
#[async_trait::async_trait]
pub trait TokenGenerator: Send + Sync + 'static {
    /// Identifies the credential. Generators with equal ids share a maintainer.
    fn id(&self) -> &str;

    async fn generate(&self) -> Result<Token, Error>;
}

/// Receives every token a maintainer installs.
#[async_trait::async_trait]
pub trait TokenCallback: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn update(&self, token: &Token) -> Result<(), Error>;
}
