mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Artifact not found: {0}")]
    NotFound(String),
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An upload directory as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: String,
    /// Last time a file was added to or removed from the directory.
    pub modified: DateTime<Utc>,
}

/// Files belonging to uploads, grouped in one directory per upload id.
///
/// The directory for an id exists exactly as long as its store entry does;
/// removal of a missing directory is therefore a success.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write one member file, creating the upload directory if needed.
    async fn put(&self, id: &str, name: &str, data: Bytes) -> Result<(), ArtifactError>;
    async fn get(&self, id: &str, name: &str) -> Result<Bytes, ArtifactError>;
    async fn exists(&self, id: &str, name: &str) -> Result<bool, ArtifactError>;
    /// Remove a single member file. Missing files are ignored.
    async fn remove(&self, id: &str, name: &str) -> Result<(), ArtifactError>;
    /// Recursively remove the upload directory.
    async fn remove_dir(&self, id: &str) -> Result<(), ArtifactError>;
    /// Every upload directory under the storage root.
    async fn list_dirs(&self) -> Result<Vec<StoredUpload>, ArtifactError>;
    /// Zip `members` of the upload directory into `archive_name` in the same directory.
    async fn archive(
        &self,
        id: &str,
        members: &[String],
        archive_name: &str,
    ) -> Result<(), ArtifactError>;
}
