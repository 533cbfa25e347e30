//! # Secrets
//!
//! The Trails API address and the storage connection string never live in the
//! environment. They are read once at startup from a vault:
//!
//! - `FileVault`: one file per secret, the way swarm/compose mount them under `/run/secrets`
//! - `KeyVault`: Azure Key Vault over REST, authenticated with a bearer token
//!
//! Transient Key Vault failures (transport errors, 429, 5xx) are retried with
//! exponential back-off.
use std::{
    fmt, io,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::{fs, time::sleep};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};

pub const API_URL_SECRET: &str = "trailsapiurl";
pub const BLOB_CONNECTION_SECRET: &str = "trails-blob-connectionString";
pub const CSRF_KEY_SECRET: &str = "trails-csrf-key";

const KEY_VAULT_API_VERSION: &str = "7.4";
const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

#[async_trait]
pub trait SecretVault: Send + Sync {
    /// `Ok(None)` when the vault has no secret under `name`.
    async fn get(&self, name: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct FileVault {
    dir: PathBuf,
}

impl FileVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretVault for FileVault {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CatalogError::Config(format!("invalid secret name {name}")));
        }

        match fs::read_to_string(self.dir.join(name)).await {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Back-off before retry number `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn is_transient(error: &CatalogError) -> bool {
    match error {
        CatalogError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        CatalogError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        _ => false,
    }
}

/// Where Key Vault bearer tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    /// App Service style identity endpoint guarded by a header secret.
    IdentityEndpoint { endpoint: String, header: String },
    /// Instance metadata service on VMs and containers.
    Imds,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(..)"),
            TokenSource::IdentityEndpoint { endpoint, .. } => f
                .debug_struct("IdentityEndpoint")
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            TokenSource::Imds => f.write_str("Imds"),
        }
    }
}

impl TokenSource {
    /// Static token when one is given, otherwise the managed identity the host exposes.
    pub fn detect(token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return TokenSource::Static(token);
        }

        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => TokenSource::IdentityEndpoint { endpoint, header },
            _ => TokenSource::Imds,
        }
    }
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

#[derive(Debug, Clone)]
pub struct KeyVault {
    client: Client,
    vault_url: Url,
    tokens: TokenSource,
    retry: RetryPolicy,
}

impl KeyVault {
    pub fn new(client: Client, vault_url: &str, tokens: TokenSource) -> Result<Self> {
        let vault_url = Url::parse(vault_url)
            .map_err(|e| CatalogError::InvalidUrl(format!("{vault_url}: {e}")))?;

        Ok(Self {
            client,
            vault_url,
            tokens,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn secret_url(&self, name: &str) -> Url {
        let mut url = self.vault_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("secrets").push(name);
        }
        url.query_pairs_mut()
            .append_pair("api-version", KEY_VAULT_API_VERSION);
        url
    }

    async fn token(&self) -> Result<String> {
        let request = match &self.tokens {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::IdentityEndpoint { endpoint, header } => self
                .client
                .get(endpoint)
                .query(&[("api-version", "2019-08-01"), ("resource", KEY_VAULT_RESOURCE)])
                .header("X-IDENTITY-HEADER", header),
            TokenSource::Imds => self
                .client
                .get(IMDS_ENDPOINT)
                .query(&[("api-version", "2018-02-01"), ("resource", KEY_VAULT_RESOURCE)])
                .header("Metadata", "true"),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status { status, body });
        }

        Ok(response.json::<AccessToken>().await?.access_token)
    }

    async fn fetch(&self, name: &str) -> Result<Option<String>> {
        let token = self.token().await?;
        let response = self
            .client
            .get(self.secret_url(name))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status { status, body });
        }

        Ok(Some(response.json::<SecretBundle>().await?.value))
    }
}

#[async_trait]
impl SecretVault for KeyVault {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let mut attempt = 0;
        loop {
            match self.fetch(name).await {
                Err(e) if attempt < self.retry.max_retries && is_transient(&e) => {
                    let wait = self.retry.backoff(attempt);
                    warn!("Secret {name} lookup failed ({e}), retrying in {wait:?}");
                    sleep(wait).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Values resolved from the vault at startup.
#[derive(Clone, Default)]
pub struct Secrets {
    pub api_url: String,
    pub blob_connection_string: Option<String>,
    pub csrf_key: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("api_url", &self.api_url)
            .field(
                "blob_connection_string",
                &self.blob_connection_string.as_ref().map(|_| ".."),
            )
            .field("csrf_key", &self.csrf_key.as_ref().map(|_| ".."))
            .finish()
    }
}

async fn optional(vault: &dyn SecretVault, name: &str) -> Option<String> {
    match vault.get(name).await {
        Ok(Some(value)) if !value.is_empty() => Some(value),
        Ok(_) => {
            warn!("Secret {name} not found");
            None
        }
        Err(e) => {
            warn!("Failed to read secret {name}: {e}");
            None
        }
    }
}

impl Secrets {
    pub async fn load(vault: Arc<dyn SecretVault>) -> Result<Self> {
        let api_url = vault
            .get(API_URL_SECRET)
            .await?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CatalogError::Config(format!("secret {API_URL_SECRET} is missing")))?;
        info!("Trails API at {api_url}");

        Ok(Self {
            api_url,
            blob_connection_string: optional(vault.as_ref(), BLOB_CONNECTION_SECRET).await,
            csrf_key: optional(vault.as_ref(), CSRF_KEY_SECRET).await,
        })
    }
}
