use std::path::PathBuf;

use catalog::Trail;
use serde::Deserialize;

/// One trail in an import manifest. File paths are relative to the manifest.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub difficulty: String,

    #[serde(default)]
    pub gpx: Option<PathBuf>,

    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl ManifestEntry {
    pub fn to_trail(&self, id: String) -> Trail {
        Trail {
            id,
            name: self.name.trim().to_string(),
            description: self.description.clone(),
            difficulty: self.difficulty.trim().to_string(),
            gpx_url: None,
            image_url: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}
