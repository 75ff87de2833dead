use crate::{manager::Config, Error, Token, TokenCallback, TokenGenerator};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, info_span, warn, Instrument};

/// Tokens valid for less than this are never installed.
pub(crate) const MIN_VALIDITY: Duration = Duration::from_secs(60);

/// A failing callback is attempted this many times per token.
pub(crate) const CALLBACK_ATTEMPTS: u32 = 3;

/// The background refresh loop for one credential and the callbacks it feeds.
pub(crate) struct Maintainer {
    id: String,
    shared: Arc<Shared>,
    config: Config,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    token: RwLock<Option<Token>>,
    callbacks: Mutex<HashMap<String, Arc<dyn TokenCallback>>>,
}

// === impl Maintainer ===

impl Maintainer {
    pub(crate) fn spawn(generator: Arc<dyn TokenGenerator>, config: Config) -> Self {
        let id = generator.id().to_string();
        let shared = Arc::new(Shared::default());
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(
            run(generator, shared.clone(), config.clone(), stopped)
                .instrument(info_span!("token", %id)),
        );
        Self {
            id,
            shared,
            config,
            stop,
            task,
        }
    }

    /// Adds a callback, or replaces the callback registered under the same id.
    ///
    /// The callback is sent the cached token right away when one is held. A
    /// replacement may write the token to places its predecessor did not.
    pub(crate) fn register(&self, callback: Arc<dyn TokenCallback>) {
        let id = callback.id().to_string();
        let replaced = self
            .shared
            .callbacks
            .lock()
            .insert(id.clone(), callback.clone())
            .is_some();
        if replaced {
            debug!(token = %self.id, callback = %id, "Replaced callback");
        }

        let cached = self.shared.token.read().clone();
        if let Some(token) = cached.filter(is_fresh) {
            let backoff = self.config.callback_backoff;
            tokio::spawn(
                async move { notify(&*callback, &token, backoff).await }
                    .instrument(info_span!("token", id = %self.id)),
            );
        }
    }

    /// Removes a callback and returns true if none remain.
    pub(crate) fn deregister(&self, callback_id: &str) -> bool {
        let mut callbacks = self.shared.callbacks.lock();
        callbacks.remove(callback_id);
        callbacks.is_empty()
    }

    pub(crate) fn callbacks(&self) -> usize {
        self.shared.callbacks.lock().len()
    }

    pub(crate) fn token(&self) -> Option<Token> {
        self.shared.token.read().clone()
    }

    /// Signals the loop to exit and waits up to `timeout` for it to do so.
    pub(crate) async fn stop(self, timeout: Duration) -> Result<(), Error> {
        let Self {
            id,
            stop,
            mut task,
            ..
        } = self;
        let _ = stop.send(());
        if time::timeout(timeout, &mut task).await.is_err() {
            task.abort();
            return Err(Error::StopTimeout { id, timeout });
        }
        debug!(%id, "Stopped token maintainer");
        Ok(())
    }
}

async fn run(
    generator: Arc<dyn TokenGenerator>,
    shared: Arc<Shared>,
    config: Config,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut refresh_failed = true;
    let mut next_refresh = Instant::now();
    let mut heartbeat = time::interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        if refresh_failed || Instant::now() >= next_refresh {
            let refreshed = tokio::select! {
                biased;
                _ = &mut stopped => return,
                res = refresh(&*generator, &shared, &config) => res,
            };
            match refreshed {
                Ok(validity) => {
                    refresh_failed = false;
                    next_refresh = Instant::now() + validity / 10;
                    info!(next_refresh_in = ?(validity / 10), "Refreshed token");
                }
                Err(error) => {
                    refresh_failed = true;
                    warn!(%error, "Failed to refresh token");
                }
            }
        }

        tokio::select! {
            biased;
            _ = &mut stopped => return,
            _ = heartbeat.tick() => {}
        }
    }
}

/// Fetches a token, installs it, and pushes it to every callback. Returns the
/// token's validity window.
async fn refresh(
    generator: &dyn TokenGenerator,
    shared: &Shared,
    config: &Config,
) -> Result<Duration, Error> {
    let fetched_at = Utc::now();
    let token = generator.generate().await?;
    let validity = (token.expire_at - fetched_at)
        .to_std()
        .unwrap_or_default();
    if validity < MIN_VALIDITY {
        return Err(Error::TooShortLived {
            expire_at: token.expire_at,
        });
    }

    *shared.token.write() = Some(token.clone());
    let callbacks = shared.callbacks.lock().values().cloned().collect::<Vec<_>>();
    futures::future::join_all(
        callbacks
            .iter()
            .map(|cb| notify(&**cb, &token, config.callback_backoff)),
    )
    .await;
    Ok(validity)
}

/// Delivers a token, retrying with a linearly growing backoff.
async fn notify(callback: &dyn TokenCallback, token: &Token, backoff: Duration) {
    for attempt in 1..=CALLBACK_ATTEMPTS {
        match callback.update(token).await {
            Ok(()) => return,
            Err(error) if attempt < CALLBACK_ATTEMPTS => {
                debug!(callback = callback.id(), attempt, %error, "Retrying callback");
                time::sleep(backoff * attempt).await;
            }
            Err(error) => {
                warn!(callback = callback.id(), %error, "Failed to deliver token");
            }
        }
    }
}

impl std::fmt::Debug for Maintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintainer")
            .field("id", &self.id)
            .field("callbacks", &self.callbacks())
            .finish_non_exhaustive()
    }
}

fn is_fresh(token: &Token) -> bool {
    (token.expire_at - Utc::now())
        .to_std()
        .is_ok_and(|left| left >= MIN_VALIDITY)
}
