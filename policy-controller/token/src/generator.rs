use crate::{Error, Token, TokenGenerator};
use chrono::{DateTime, Utc};
use praetor_policy_k8s_api::policy::HttpAuth;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// How long a fetched token is assumed valid when neither the policy nor the
/// auth endpoint says otherwise.
pub const DEFAULT_EXPIRE_DURATION: Duration = Duration::from_secs(60 * 60);

/// Fetches tokens from an `authUrl` with basic auth.
#[derive(Clone)]
pub struct HttpTokenGenerator {
    id: String,
    auth_url: String,
    username: String,
    password: String,
    expire_duration: Duration,
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    #[serde(default)]
    expire_at: Option<String>,
}

/// The identity shared by every reference to the same credential: the auth
/// endpoint's host and the username.
pub fn identity(auth_url: &str, username: &str) -> String {
    let host = reqwest::Url::parse(auth_url)
        .ok()
        .and_then(|u| {
            let host = u.host_str()?.to_string();
            Some(match u.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            })
        })
        .unwrap_or_else(|| auth_url.to_string());
    format!("{host}/{username}")
}

// === impl HttpTokenGenerator ===

impl HttpTokenGenerator {
    /// Builds a generator for an auth block, if it names a refreshed credential.
    pub fn from_auth(auth: &HttpAuth, http: reqwest::Client, timeout: Duration) -> Option<Self> {
        if !auth.is_refreshed() {
            return None;
        }
        let auth_url = auth.auth_url.clone()?;
        let username = auth.username.clone()?;
        Some(Self {
            id: identity(&auth_url, &username),
            auth_url,
            username,
            password: auth.password.clone().unwrap_or_default(),
            expire_duration: auth
                .expire_duration
                .map(Duration::from)
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_EXPIRE_DURATION),
            http,
            timeout,
        })
    }

    fn parse(&self, body: &[u8], fetched_at: DateTime<Utc>) -> Result<Token, Error> {
        let (value, expire_at) = match serde_json::from_slice::<TokenResponse>(body) {
            Ok(rsp) => (rsp.token, rsp.expire_at),
            Err(_) => (String::from_utf8_lossy(body).trim().to_string(), None),
        };
        if value.is_empty() {
            return Err(Error::Generate(
                format!("{} returned an empty token", self.auth_url).into(),
            ));
        }

        let expire_at = match expire_at {
            Some(at) => DateTime::parse_from_rfc3339(&at)
                .map_err(|e| Error::Generate(e.into()))?
                .with_timezone(&Utc),
            None => {
                let ttl = chrono::Duration::from_std(self.expire_duration)
                    .map_err(|e| Error::Generate(e.into()))?;
                fetched_at + ttl
            }
        };
        Ok(Token { value, expire_at })
    }
}

#[async_trait::async_trait]
impl TokenGenerator for HttpTokenGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self) -> Result<Token, Error> {
        debug!(url = %self.auth_url, "Requesting token");
        let fetched_at = Utc::now();
        let rsp = self
            .http
            .get(&self.auth_url)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|rsp| rsp.error_for_status())
            .map_err(|e| Error::Generate(e.into()))?;
        let body = rsp.bytes().await.map_err(|e| Error::Generate(e.into()))?;
        self.parse(&body, fetched_at)
    }
}

impl std::fmt::Debug for HttpTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenGenerator")
            .field("id", &self.id)
            .field("auth_url", &self.auth_url)
            .field("expire_duration", &self.expire_duration)
            .finish_non_exhaustive()
    }
}
