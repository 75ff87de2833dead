use crate::{maintainer::Maintainer, Error, Token, TokenCallback, TokenGenerator};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::info;

/// Timing for token maintainers.
#[derive(Clone, Debug)]
pub struct Config {
    /// How often an idle loop wakes to check for a stop signal or a due refresh.
    pub heartbeat: Duration,

    /// How long `remove_token` and `stop` wait for a loop to exit.
    pub stop_timeout: Duration,

    /// The delay before a failed callback's first retry; later retries wait
    /// proportionally longer.
    pub callback_backoff: Duration,
}

/// The registry of token maintainers, keyed by credential identity.
///
/// Once stopped, the manager rejects all further use.
#[derive(Debug)]
pub struct TokenManager {
    config: Config,
    maintainers: RwLock<Option<HashMap<String, Maintainer>>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            callback_backoff: Duration::from_millis(500),
        }
    }
}

// === impl TokenManager ===

impl TokenManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            maintainers: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Registers `callback` with the maintainer for `generator`'s credential,
    /// starting the maintainer if this is the credential's first reference.
    pub fn add_token(
        &self,
        generator: Arc<dyn TokenGenerator>,
        callback: Arc<dyn TokenCallback>,
    ) -> Result<(), Error> {
        let mut maintainers = self.maintainers.write();
        let maintainers = maintainers.as_mut().ok_or(Error::Stopped)?;
        let maintainer = maintainers
            .entry(generator.id().to_string())
            .or_insert_with(|| {
                info!(token = generator.id(), "Starting token maintainer");
                Maintainer::spawn(generator.clone(), self.config.clone())
            });
        maintainer.register(callback);
        Ok(())
    }

    /// Removes a callback. The credential's maintainer is stopped once its
    /// last callback is gone.
    pub async fn remove_token(&self, token_id: &str, callback_id: &str) -> Result<(), Error> {
        let unreferenced = {
            let mut maintainers = self.maintainers.write();
            let maintainers = maintainers.as_mut().ok_or(Error::Stopped)?;
            let drained = maintainers
                .get(token_id)
                .is_some_and(|m| m.deregister(callback_id));
            if drained {
                maintainers.remove(token_id)
            } else {
                None
            }
        };

        if let Some(maintainer) = unreferenced {
            info!(token = token_id, "Stopping unreferenced token maintainer");
            maintainer.stop(self.config.stop_timeout).await?;
        }
        Ok(())
    }

    /// Stops every maintainer. The first stop failure is returned after all
    /// maintainers have been signaled.
    pub async fn stop(&self) -> Result<(), Error> {
        let maintainers = self.maintainers.write().take().ok_or(Error::Stopped)?;
        let timeout = self.config.stop_timeout;
        futures::future::join_all(maintainers.into_values().map(|m| m.stop(timeout)))
            .await
            .into_iter()
            .collect()
    }

    /// The number of running maintainers.
    pub fn len(&self) -> usize {
        self.maintainers.read().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of callbacks registered for a credential.
    pub fn callbacks(&self, token_id: &str) -> usize {
        self.maintainers
            .read()
            .as_ref()
            .and_then(|m| m.get(token_id))
            .map_or(0, Maintainer::callbacks)
    }

    /// The token currently installed for a credential.
    pub fn token(&self, token_id: &str) -> Option<Token> {
        self.maintainers
            .read()
            .as_ref()
            .and_then(|m| m.get(token_id))
            .and_then(Maintainer::token)
    }
}
