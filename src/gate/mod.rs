//! Access and usage gate
//!
//! Runs before any text is acquired: access check, then token, then
//! usage check. Decisions are cached per token for a short window and
//! every failure to reach the backend counts as a denial.

pub mod setup;
pub mod store;

use crate::cache::{Clock, SystemClock, TimedCache};
use crate::protocol::BoxFuture;
use crate::util::truncate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use setup::TokenValidator;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use setup::{
    acquire_token_interactively, StdinPrompter, TokenPrompter, DEFAULT_MAX_ATTEMPTS,
};
pub use store::{KeyringTokenStore, MemoryTokenStore, TokenStore};

pub const DEFAULT_BACKEND_URL: &str = "https://api.textpolish.dev";
pub const DEFAULT_AUTH_CACHE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_USAGE_CACHE: Duration = Duration::from_secs(60);
const GATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GateError {
    #[error("backend unreachable: {0}")]
    Http(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("token storage failed: {0}")]
    Store(String),

    #[error("token entry cancelled")]
    Cancelled,

    #[error("no valid token after {0} attempts")]
    AttemptsExhausted(u32),
}

/// Checks the pipeline must pass, in this order, before acquiring text.
pub trait AccessGate: Send + Sync {
    fn check_access(&self) -> BoxFuture<'_, bool>;
    fn get_token(&self) -> BoxFuture<'_, Option<String>>;
    fn check_usage_limit<'a>(&'a self, token: &'a str) -> BoxFuture<'a, bool>;
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub backend_url: String,
    pub auth_cache: Duration,
    pub usage_cache: Duration,
    /// Tokens exempt from usage limits
    pub premium_tokens: HashSet<String>,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            auth_cache: DEFAULT_AUTH_CACHE,
            usage_cache: DEFAULT_USAGE_CACHE,
            premium_tokens: HashSet::new(),
        }
    }
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    valid: bool,
}

#[derive(Deserialize)]
struct UsageResponse {
    #[serde(default)]
    allowed: bool,
    #[serde(default)]
    remaining: Option<u64>,
}

/// Gate backed by the token service over HTTP.
pub struct RemoteAccessGate {
    client: reqwest::Client,
    settings: GateSettings,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    auth_cache: Mutex<TimedCache<String, bool>>,
    usage_cache: Mutex<TimedCache<String, bool>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RemoteAccessGate {
    pub fn new(settings: GateSettings, store: Arc<dyn TokenStore>) -> Self {
        Self::with_clock(settings, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: GateSettings,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GATE_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            auth_cache: Mutex::new(TimedCache::new(settings.auth_cache)),
            usage_cache: Mutex::new(TimedCache::new(settings.usage_cache)),
            settings,
            store,
            clock,
        }
    }

    /// Forget cached decisions, e.g. after a new token is saved.
    pub fn invalidate(&self) {
        lock(&self.auth_cache).clear();
        lock(&self.usage_cache).clear();
    }

    fn is_premium(&self, token: &str) -> bool {
        self.settings.premium_tokens.contains(token)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.settings.backend_url.trim_end_matches('/'), path)
    }

    fn load_token(&self) -> Option<String> {
        match self.store.load() {
            Ok(token) => token.filter(|t| !t.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, "could not read access token");
                None
            }
        }
    }

    async fn post_token<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        rejecting: &[u16],
    ) -> Result<Option<T>, GateError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(&TokenBody { token })
            .send()
            .await
            .map_err(|e| GateError::Http(e.to_string()))?;

        let status = response.status();
        if rejecting.contains(&status.as_u16()) {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| GateError::Http(e.to_string()))
    }

    /// Ask the backend whether `token` is valid. Uncached.
    pub async fn validate_token(&self, token: &str) -> Result<bool, GateError> {
        let parsed: Option<ValidateResponse> = self
            .post_token("/v1/tokens/validate", token, &[401, 403])
            .await?;
        Ok(parsed.is_some_and(|r| r.valid))
    }

    async fn usage_allowed(&self, token: &str) -> Result<bool, GateError> {
        let parsed: Option<UsageResponse> = self
            .post_token("/v1/usage/check", token, &[402, 429])
            .await?;
        if let Some(remaining) = parsed.as_ref().and_then(|r| r.remaining) {
            debug!(remaining, "usage remaining");
        }
        Ok(parsed.is_some_and(|r| r.allowed))
    }
}

impl AccessGate for RemoteAccessGate {
    fn check_access(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let Some(token) = self.load_token() else {
                debug!("no access token configured");
                return false;
            };
            if self.is_premium(&token) {
                return true;
            }
            let cached = lock(&self.auth_cache).get(&token, self.clock.now());
            if let Some(valid) = cached {
                return valid;
            }

            match self.validate_token(&token).await {
                Ok(valid) => {
                    lock(&self.auth_cache).put(token, valid, self.clock.now());
                    valid
                }
                Err(err) => {
                    warn!(error = %err, "token validation failed; denying");
                    false
                }
            }
        })
    }

    fn get_token(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move { self.load_token() })
    }

    fn check_usage_limit<'a>(&'a self, token: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.is_premium(token) {
                return true;
            }
            let key = token.to_string();
            let cached = lock(&self.usage_cache).get(&key, self.clock.now());
            if let Some(allowed) = cached {
                return allowed;
            }

            match self.usage_allowed(token).await {
                Ok(allowed) => {
                    lock(&self.usage_cache).put(key, allowed, self.clock.now());
                    allowed
                }
                Err(err) => {
                    warn!(error = %err, "usage check failed; denying");
                    false
                }
            }
        })
    }
}

impl TokenValidator for RemoteAccessGate {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<bool, GateError>> {
        Box::pin(self.validate_token(token))
    }
}
