//! # Blob Storage
//!
//! GPX tracks and trail pictures live in object storage, not in the Trails API.
//! The API only keeps the absolute URL of each blob.
//!
//! ## Containers
//! - `trails`: GPX tracks
//! - `images`: pictures uploaded with a trail
//! - `thumbnails`: resized pictures produced outside this service, removed together with their image
//!
//! ## Naming
//! Blobs are named `{trail id}-{sanitized file name}` so two trails uploading `track.gpx`
//! never overwrite each other.
use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use sha2::Sha256;
use tracing::debug;

use crate::{
    error::{CatalogError, Result},
    utils::{extension, sanitize},
};

pub const GPX_CONTAINER: &str = "trails";
pub const IMAGE_CONTAINER: &str = "images";
pub const THUMBNAIL_CONTAINER: &str = "thumbnails";

pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const API_VERSION: &str = "2021-08-06";

const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes`, replacing any existing blob, and returns its absolute URL.
    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String>;

    async fn delete_if_exists(&self, container: &str, blob_name: &str) -> Result<()>;
}

pub fn is_gpx(file_name: &str) -> bool {
    extension(file_name).as_deref() == Some("gpx")
}

pub fn is_image(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn container_for(file_name: &str) -> &'static str {
    if is_gpx(file_name) {
        GPX_CONTAINER
    } else {
        IMAGE_CONTAINER
    }
}

/// Content type to store a file under when the client sent none, or a generic one.
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("gpx") => "application/gpx+xml",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

pub fn blob_name(trail_id: &str, file_name: &str) -> String {
    let sanitized = sanitize(file_name);
    let sanitized = if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized
    };

    format!("{}-{sanitized}", sanitize(trail_id))
}

/// Whether `blob_name` carries the prefix [`blob_name`] gives this trail's files.
pub fn belongs_to(trail_id: &str, blob_name: &str) -> bool {
    blob_name.starts_with(&format!("{}-", sanitize(trail_id)))
}

/// Recovers the blob name from a URL previously returned by [`BlobStorage::upload`].
pub fn blob_name_from_url(container: &str, url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    let start = segments.iter().position(|s| *s == container)? + 1;

    let name = segments[start..].join("/");
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    SharedKey(Vec<u8>),
    Sas(String),
}

/// Parsed Azure storage connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account: String,
    pub endpoint: Url,
    credential: Credential,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let pairs: HashMap<String, String> = raw
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();

        let setting = |key: &str| pairs.get(key).filter(|v| !v.is_empty()).cloned();

        if setting("usedevelopmentstorage").as_deref() == Some("true") {
            return Ok(Self {
                account: DEV_ACCOUNT.to_string(),
                endpoint: parse_endpoint(DEV_ENDPOINT)?,
                credential: Credential::SharedKey(decode_key(DEV_KEY)?),
            });
        }

        let account = setting("accountname")
            .ok_or_else(|| CatalogError::Config("connection string has no AccountName".into()))?;

        let endpoint = match setting("blobendpoint") {
            Some(endpoint) => endpoint,
            None => {
                let protocol = setting("defaultendpointsprotocol").unwrap_or("https".into());
                let suffix = setting("endpointsuffix").unwrap_or("core.windows.net".into());
                format!("{protocol}://{account}.blob.{suffix}")
            }
        };

        let credential = match (setting("accountkey"), setting("sharedaccesssignature")) {
            (Some(key), _) => Credential::SharedKey(decode_key(&key)?),
            (None, Some(sas)) => Credential::Sas(sas.trim_start_matches('?').to_string()),
            (None, None) => {
                return Err(CatalogError::Config(
                    "connection string has neither AccountKey nor SharedAccessSignature".into(),
                ));
            }
        };

        Ok(Self {
            account,
            endpoint: parse_endpoint(&endpoint)?,
            credential,
        })
    }

    pub fn blob_url(&self, container: &str, blob_name: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container);
            for part in blob_name.split('/') {
                segments.push(part);
            }
        }
        url
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CatalogError::InvalidUrl(format!("{raw}: {e}")))
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(key)
        .map_err(|e| CatalogError::Config(format!("AccountKey is not base64: {e}")))
}

/// Builds the Shared Key string-to-sign for a Blob service request.
///
/// `ms_headers` must already be lowercase `x-ms-*` pairs; they are sorted here.
pub fn string_to_sign(
    method: &Method,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, &str)],
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers = ms_headers.to_vec();
    headers.sort_by(|a, b| a.0.cmp(b.0));
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();

    // Encoding, language, length, MD5, type, date, four conditionals, range.
    format!(
        "{method}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

fn sign(key: &[u8], payload: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CatalogError::Config(format!("account key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Azure Blob Storage over its REST API.
#[derive(Debug, Clone)]
pub struct AzureBlobStorage {
    client: Client,
    connection: ConnectionString,
}

impl AzureBlobStorage {
    pub fn new(client: Client, connection_string: &str) -> Result<Self> {
        Ok(Self {
            client,
            connection: ConnectionString::parse(connection_string)?,
        })
    }

    pub fn connection(&self) -> &ConnectionString {
        &self.connection
    }

    async fn send(
        &self,
        method: Method,
        container: &str,
        blob_name: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let url = self.connection.blob_url(container, blob_name);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let is_put = method == Method::PUT;

        let mut ms_headers = vec![("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)];
        if is_put {
            ms_headers.push(("x-ms-blob-type", "BlockBlob"));
        }

        let mut request_url = url.clone();
        let mut authorization = None;
        match &self.connection.credential {
            Credential::SharedKey(key) => {
                let resource = format!("/{}{}", self.connection.account, url.path());
                let payload =
                    string_to_sign(&method, body.len(), content_type, &ms_headers, &resource);
                authorization = Some(format!(
                    "SharedKey {}:{}",
                    self.connection.account,
                    sign(key, &payload)?
                ));
            }
            Credential::Sas(sas) => request_url.set_query(Some(sas)),
        }

        debug!("{method} {url}");
        let mut request = self.client.request(method, request_url);
        for (name, value) in &ms_headers {
            request = request.header(*name, *value);
        }
        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if is_put {
            request = request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body);
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl BlobStorage for AzureBlobStorage {
    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let response = self
            .send(Method::PUT, container, blob_name, content_type, bytes)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status { status, body });
        }

        Ok(self.connection.blob_url(container, blob_name).to_string())
    }

    async fn delete_if_exists(&self, container: &str, blob_name: &str) -> Result<()> {
        let response = self
            .send(Method::DELETE, container, blob_name, "", Vec::new())
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CatalogError::Status { status, body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Keeps blobs in memory. URLs look like `memory:///{container}/{name}`.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<(String, String), StoredBlob>>,
}

impl MemoryBlobStorage {
    pub fn get(&self, container: &str, blob_name: &str) -> Option<StoredBlob> {
        self.blobs
            .lock()
            .ok()?
            .get(&(container.to_string(), blob_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        let blob = StoredBlob {
            content_type: content_type.to_string(),
            bytes,
        };

        self.blobs
            .lock()
            .map_err(|_| CatalogError::Config("blob map poisoned".into()))?
            .insert((container.to_string(), blob_name.to_string()), blob);

        Ok(format!("memory:///{container}/{blob_name}"))
    }

    async fn delete_if_exists(&self, container: &str, blob_name: &str) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|_| CatalogError::Config("blob map poisoned".into()))?
            .remove(&(container.to_string(), blob_name.to_string()));

        Ok(())
    }
}
