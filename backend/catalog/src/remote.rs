use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    error::{CatalogError, Result},
    trail::Trail,
};

pub const TRAILS: &str = "Trails";

#[async_trait]
pub trait TrailRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Trail>>;
    async fn get(&self, id: &str) -> Result<Option<Trail>>;
    async fn create(&self, trail: &Trail) -> Result<()>;
    async fn update(&self, trail: &Trail) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Talks to the Trails API over HTTP.
#[derive(Debug, Clone)]
pub struct ApiTrailRepository {
    client: Client,
    base: Url,
}

impl ApiTrailRepository {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Self::with_client(client, api_url)
    }

    pub fn with_client(client: Client, api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url.trim())
            .map_err(|e| CatalogError::InvalidUrl(format!("{api_url}: {e}")))?;

        if base.cannot_be_a_base() {
            return Err(CatalogError::InvalidUrl(api_url.to_string()));
        }

        // Relative joins replace the last segment unless the base ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base })
    }

    fn collection_url(&self) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(TRAILS);
        }
        url
    }

    fn item_url(&self, id: &str) -> Url {
        let mut url = self.collection_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Status { status, body })
}

/// Decodes a JSON body where a literal `null` (or nothing at all) means absent.
async fn read_optional<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl TrailRepository for ApiTrailRepository {
    async fn list(&self) -> Result<Vec<Trail>> {
        let url = self.collection_url();
        debug!("GET {url}");

        let response = check(self.client.get(url).send().await?).await?;
        let trails: Option<Vec<Trail>> = read_optional(response).await?;

        Ok(trails.unwrap_or_default())
    }

    async fn get(&self, id: &str) -> Result<Option<Trail>> {
        let url = self.item_url(id);
        debug!("GET {url}");

        let response = check(self.client.get(url).send().await?).await?;
        read_optional(response).await
    }

    async fn create(&self, trail: &Trail) -> Result<()> {
        let url = self.collection_url();
        debug!("POST {url}");

        check(self.client.post(url).json(trail).send().await?).await?;
        Ok(())
    }

    async fn update(&self, trail: &Trail) -> Result<()> {
        let url = self.item_url(&trail.id);
        debug!("PUT {url}");

        check(self.client.put(url).json(trail).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.item_url(id);
        debug!("DELETE {url}");

        check(self.client.delete(url).send().await?).await?;
        Ok(())
    }
}

/// In-process catalog, used when no API is reachable and in tests.
#[derive(Debug, Default)]
pub struct MemoryTrailRepository {
    trails: RwLock<BTreeMap<String, Trail>>,
}

impl MemoryTrailRepository {
    pub fn new(trails: impl IntoIterator<Item = Trail>) -> Self {
        Self {
            trails: RwLock::new(trails.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    async fn require(&self, id: &str) -> Result<()> {
        if self.trails.read().await.contains_key(id) {
            Ok(())
        } else {
            Err(CatalogError::Status {
                status: reqwest::StatusCode::NOT_FOUND,
                body: format!("Trail {id} not found"),
            })
        }
    }
}

#[async_trait]
impl TrailRepository for MemoryTrailRepository {
    async fn list(&self) -> Result<Vec<Trail>> {
        Ok(self.trails.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Trail>> {
        Ok(self.trails.read().await.get(id).cloned())
    }

    async fn create(&self, trail: &Trail) -> Result<()> {
        self.trails
            .write()
            .await
            .insert(trail.id.clone(), trail.clone());
        Ok(())
    }

    async fn update(&self, trail: &Trail) -> Result<()> {
        self.require(&trail.id).await?;
        self.trails
            .write()
            .await
            .insert(trail.id.clone(), trail.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.require(id).await?;
        self.trails.write().await.remove(id);
        Ok(())
    }
}
