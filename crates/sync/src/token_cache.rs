//! Access-token caching for the CRM API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ordersync_core::config::CrmConfig;

use crate::crm::CrmError;
use crate::errors::SyncError;
use crate::scheduler::PeriodicTask;

/// Tokens are treated as expired this long before the server says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A single value with an expiry.
///
/// Readers share the read lock. Computations are serialized by a separate
/// mutex and re-check the entry once they hold it, so a burst of concurrent
/// misses runs the computation once.
pub struct ExpiringCache<V> {
    entry: RwLock<Option<Entry<V>>>,
    refresh: Mutex<()>,
}

impl<V> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self { entry: RwLock::new(None), refresh: Mutex::new(()) }
    }
}

impl<V: Clone + Send + Sync> ExpiringCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value, if present and not expired.
    pub async fn get(&self) -> Option<V> {
        let entry = self.entry.read().await;
        entry.as_ref().filter(|entry| entry.expires_at > Instant::now()).map(|entry| entry.value.clone())
    }

    pub async fn get_or_try_compute<F, Fut, E>(&self, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration), E>>,
    {
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let _guard = self.refresh.lock().await;
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let (value, ttl) = compute().await?;
        self.store(value.clone(), ttl).await;
        Ok(value)
    }

    /// Recomputes regardless of the current entry.
    pub async fn refresh_with<F, Fut, E>(&self, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration), E>>,
    {
        let _guard = self.refresh.lock().await;
        let (value, ttl) = compute().await?;
        self.store(value.clone(), ttl).await;
        Ok(value)
    }

    pub async fn invalidate(&self) {
        let mut entry = self.entry.write().await;
        *entry = None;
    }

    async fn store(&self, value: V, ttl: Duration) {
        let mut entry = self.entry.write().await;
        *entry = Some(Entry { value, expires_at: Instant::now() + ttl });
    }
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, CrmError>;

    /// Drops the cached token after the CRM refused it.
    async fn invalidate(&self);
}

pub struct OAuthCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

impl OAuthCredentials {
    pub fn from_config(config: &CrmConfig) -> Result<Self, CrmError> {
        let missing = |field: &str| CrmError::Unauthorized(format!("crm.{field} is not configured"));
        Ok(Self {
            token_url: config.token_url.clone().ok_or_else(|| missing("token_url"))?,
            client_id: config.client_id.clone().ok_or_else(|| missing("client_id"))?,
            client_secret: config.client_secret.clone().ok_or_else(|| missing("client_secret"))?,
            refresh_token: config.refresh_token.clone().ok_or_else(|| missing("refresh_token"))?,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Refresh-token grant against the CRM's OAuth endpoint.
pub struct OAuthTokenSource {
    client: reqwest::Client,
    credentials: OAuthCredentials,
    cache: ExpiringCache<SecretString>,
}

impl OAuthTokenSource {
    pub fn new(client: reqwest::Client, credentials: OAuthCredentials) -> Self {
        Self { client, credentials, cache: ExpiringCache::new() }
    }

    /// Fetches a new token even if the cached one is still valid.
    pub async fn refresh(&self) -> Result<(), CrmError> {
        self.cache.refresh_with(|| self.exchange_refresh_token()).await.map(|_| ())
    }

    async fn exchange_refresh_token(&self) -> Result<(SecretString, Duration), CrmError> {
        let response = self
            .client
            .post(&self.credentials.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.expose_secret()),
                ("refresh_token", self.credentials.refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|error| CrmError::Transport(format!("token refresh request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(CrmError::Unauthorized(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            CrmError::Malformed(format!("failed to decode token response: {error}"))
        })?;
        if let Some(error) = token.error {
            return Err(CrmError::Unauthorized(format!("token endpoint refused refresh: {error}")));
        }
        if token.access_token.is_empty() {
            return Err(CrmError::Malformed("token endpoint returned empty access token".to_string()));
        }

        let lifetime =
            token.expires_in.map(Duration::from_secs).unwrap_or(DEFAULT_TOKEN_LIFETIME);
        debug!(
            event_name = "crm.token.refreshed",
            expires_in_secs = lifetime.as_secs(),
            "crm access token refreshed"
        );
        Ok((SecretString::from(token.access_token), lifetime.saturating_sub(EXPIRY_MARGIN)))
    }
}

#[async_trait]
impl AccessTokenSource for OAuthTokenSource {
    async fn access_token(&self) -> Result<SecretString, CrmError> {
        self.cache.get_or_try_compute(|| self.exchange_refresh_token()).await
    }

    async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

/// Keeps the CRM token warm so request paths rarely pay for a refresh.
pub struct CredentialRefreshTask {
    source: Arc<OAuthTokenSource>,
    interval: Duration,
}

impl CredentialRefreshTask {
    pub fn new(source: Arc<OAuthTokenSource>, interval: Duration) -> Self {
        Self { source, interval }
    }
}

#[async_trait]
impl PeriodicTask for CredentialRefreshTask {
    fn name(&self) -> &'static str {
        "credential_refresh"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self, _shutdown: &CancellationToken) -> Result<(), SyncError> {
        self.source.refresh().await?;
        info!(event_name = "crm.token.refresh_task", "crm credentials refreshed");
        Ok(())
    }
}
