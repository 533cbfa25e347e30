use std::sync::Arc;

use anyhow::Result;
use catalog::{
    ApiTrailRepository, AzureBlobStorage, BlobStorage, FileVault, KeyVault, SecretVault, Secrets,
    TokenSource, TrailRepository,
};
use reqwest::Client;
use tracing::{info, warn};

use super::{config::Config, csrf::Csrf};

pub struct AppState {
    pub config: Config,
    pub trails: Arc<dyn TrailRepository>,
    pub storage: Option<Arc<dyn BlobStorage>>,
    pub csrf: Csrf,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let client = Client::builder().timeout(config.api_timeout).build()?;

        let vault: Arc<dyn SecretVault> = match &config.vault_url {
            Some(url) => {
                info!("Reading secrets from Key Vault {url}");
                let tokens = TokenSource::detect(config.vault_token.clone());
                Arc::new(KeyVault::new(client.clone(), url, tokens)?)
            }
            None => {
                info!("Reading secrets from {}", config.secrets_dir);
                Arc::new(FileVault::new(&config.secrets_dir))
            }
        };

        let secrets = Secrets::load(vault).await?;

        let trails = Arc::new(ApiTrailRepository::with_client(client, &secrets.api_url)?);

        let storage: Option<Arc<dyn BlobStorage>> = match &secrets.blob_connection_string {
            Some(connection_string) => {
                // Uploads can outlast the API timeout.
                let storage = AzureBlobStorage::new(Client::new(), connection_string)?;
                info!("Blob storage account {}", storage.connection().account);
                Some(Arc::new(storage) as Arc<dyn BlobStorage>)
            }
            None => {
                warn!("No blob connection string, file uploads are disabled");
                None
            }
        };

        let csrf = match &secrets.csrf_key {
            Some(key) => Csrf::new(key, config.csrf_ttl),
            None => {
                warn!("No anti-forgery key configured, using a per-process key");
                Csrf::random(config.csrf_ttl)
            }
        };

        Ok(Self::from_parts(config, trails, storage, csrf))
    }

    pub fn from_parts(
        config: Config,
        trails: Arc<dyn TrailRepository>,
        storage: Option<Arc<dyn BlobStorage>>,
        csrf: Csrf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            trails,
            storage,
            csrf,
        })
    }
}
