//! Trails catalog plumbing shared by the web front-end and the import tool.
//!
//! - [`remote`]: the Trails API, the system of record for trail metadata
//! - [`storage`]: blob storage for GPX tracks and pictures
//! - [`vault`]: secrets needed to reach both of the above
pub mod error;
pub mod remote;
pub mod storage;
pub mod trail;
pub mod utils;
pub mod vault;

pub use error::CatalogError;
pub use remote::{ApiTrailRepository, MemoryTrailRepository, TrailRepository};
pub use storage::{AzureBlobStorage, BlobStorage, MemoryBlobStorage};
pub use trail::{FieldError, Trail};
pub use vault::{FileVault, KeyVault, Secrets, SecretVault, TokenSource};
