//! # Trail Import
//!
//! Seeds the Trails API from a JSON manifest, e.g. when standing up a new environment.
//!
//! ## Manifest
//! ```json
//! [
//!   { "name": "Windy Hill", "description": "Grassy ridge", "difficulty": "Moderate",
//!     "gpx": "tracks/windy-hill.gpx", "image": "photos/windy-hill.jpg" }
//! ]
//! ```
//!
//! ## Steps per entry
//! 1. Validate fields and check that referenced files exist with the right extension.
//! 2. Mint a new trail id.
//! 3. Upload the GPX track to `trails` and the image to `images`, when blob storage is configured.
//! 4. POST the trail to the API.
//!
//! Invalid entries are skipped, failed uploads or API calls are counted as failed. Neither stops the run.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use catalog::{
    ApiTrailRepository, AzureBlobStorage, BlobStorage, FileVault, Secrets, Trail,
    TrailRepository,
    storage::{GPX_CONTAINER, IMAGE_CONTAINER, blob_name, content_type_for, is_gpx, is_image},
};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::fs;
use tracing::warn;

pub mod models;

use models::{ManifestEntry, Summary};

const API_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let json = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn resolve(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        base_dir.join(file)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Problems that make an entry unimportable.
pub fn check_entry(entry: &ManifestEntry, base_dir: &Path) -> Vec<String> {
    let mut problems: Vec<String> = entry
        .to_trail(String::new())
        .validate()
        .into_iter()
        .map(|e| e.message)
        .collect();

    if let Some(gpx) = &entry.gpx {
        if !is_gpx(&file_name(gpx)) {
            problems.push(format!("{} is not a .gpx file", gpx.display()));
        } else if !resolve(base_dir, gpx).is_file() {
            problems.push(format!("{} does not exist", gpx.display()));
        }
    }

    if let Some(image) = &entry.image {
        if !is_image(&file_name(image)) {
            problems.push(format!("{} is not an image", image.display()));
        } else if !resolve(base_dir, image).is_file() {
            problems.push(format!("{} does not exist", image.display()));
        }
    }

    problems
}

async fn upload_file(
    storage: &dyn BlobStorage,
    container: &str,
    trail_id: &str,
    path: &Path,
) -> Result<String> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = file_name(path);

    let url = storage
        .upload(container, &blob_name(trail_id, &name), content_type_for(&name), bytes)
        .await?;
    Ok(url)
}

async fn import_one(
    repo: &dyn TrailRepository,
    storage: Option<&dyn BlobStorage>,
    entry: &ManifestEntry,
    base_dir: &Path,
) -> Result<Trail> {
    let mut trail = entry.to_trail(Trail::new_id());

    match storage {
        Some(storage) => {
            if let Some(gpx) = &entry.gpx {
                let path = resolve(base_dir, gpx);
                trail.gpx_url = Some(upload_file(storage, GPX_CONTAINER, &trail.id, &path).await?);
            }
            if let Some(image) = &entry.image {
                let path = resolve(base_dir, image);
                trail.image_url =
                    Some(upload_file(storage, IMAGE_CONTAINER, &trail.id, &path).await?);
            }
        }
        None if entry.gpx.is_some() || entry.image.is_some() => {
            warn!("Blob storage not configured, {} imported without files", entry.name);
        }
        None => {}
    }

    repo.create(&trail).await?;
    Ok(trail)
}

pub async fn import_entries(
    repo: &dyn TrailRepository,
    storage: Option<&dyn BlobStorage>,
    entries: &[ManifestEntry],
    base_dir: &Path,
    dry_run: bool,
) -> Result<Summary> {
    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    let mut summary = Summary::default();

    for entry in entries {
        pb.set_message(format!("Importing {}", entry.name));

        let problems = check_entry(entry, base_dir);
        if !problems.is_empty() {
            pb.println(format!("Skipping {}: {}", entry.name, problems.join("; ")));
            summary.skipped += 1;
        } else if dry_run {
            summary.imported += 1;
        } else {
            match import_one(repo, storage, entry, base_dir).await {
                Ok(trail) => {
                    pb.println(format!("Imported {} as {}", trail.name, trail.id));
                    summary.imported += 1;
                }
                Err(e) => {
                    pb.println(format!("Failed {}: {e:#}", entry.name));
                    summary.failed += 1;
                }
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(summary)
}

pub async fn import_trails(manifest: &Path, secrets_dir: &Path, dry_run: bool) -> Result<Summary> {
    let entries = load_manifest(manifest).await?;
    let base_dir = manifest.parent().unwrap_or(Path::new("."));
    println!("Loaded Trails: {}\n", entries.len());

    let summary = if dry_run {
        let repo = catalog::MemoryTrailRepository::default();
        import_entries(&repo, None, &entries, base_dir, true).await?
    } else {
        let secrets = Secrets::load(Arc::new(FileVault::new(secrets_dir))).await?;
        let repo = ApiTrailRepository::new(&secrets.api_url, API_TIMEOUT)?;
        let storage = secrets
            .blob_connection_string
            .as_deref()
            .map(|cs| AzureBlobStorage::new(Client::new(), cs))
            .transpose()?;

        import_entries(
            &repo,
            storage.as_ref().map(|s| s as &dyn BlobStorage),
            &entries,
            base_dir,
            false,
        )
        .await?
    };

    println!("\nImported: {}", summary.imported);
    println!("Skipped: {}", summary.skipped);
    println!("Failed: {}", summary.failed);

    Ok(summary)
}
