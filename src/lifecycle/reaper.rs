use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::tasks::BackgroundTasks;
use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::storage::{Database, DatabaseError, RecordKind, Upload};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Unknown id, foreign context, or an entry whose file is gone.
    #[error("No upload with that id could be found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// A file ready to be sent to the client.
#[derive(Debug)]
pub struct Delivery {
    pub upload: Upload,
    pub data: Bytes,
}

/// Read path for uploads, including delete-after-first-download.
#[derive(Clone)]
pub struct Reaper {
    db: Database,
    artifacts: Arc<dyn ArtifactStore>,
    tasks: BackgroundTasks,
}

impl Reaper {
    pub fn new(db: Database, artifacts: Arc<dyn ArtifactStore>, tasks: BackgroundTasks) -> Self {
        Self {
            db,
            artifacts,
            tasks,
        }
    }

    /// Look up an upload and load its file.
    ///
    /// An entry without its file on disk is reported as not found and the
    /// stale entry is dropped in the background.
    pub async fn fetch(&self, context: &str, id: &str) -> Result<Delivery, FetchError> {
        let upload = self
            .db
            .get(context, id, RecordKind::Upload)?
            .and_then(|r| r.into_upload())
            .ok_or(FetchError::NotFound)?;

        if !self.artifacts.exists(id, &upload.file).await? {
            self.drop_stale_entry(id);
            return Err(FetchError::NotFound);
        }

        match self.artifacts.get(id, &upload.file).await {
            Ok(data) => Ok(Delivery { upload, data }),
            Err(ArtifactError::NotFound(_)) => {
                // Removed between the existence check and the read.
                self.drop_stale_entry(id);
                Err(FetchError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Post-delivery hook. Call once the file was handed to the client;
    /// `asap` uploads are removed in the background.
    pub fn delivered(&self, upload: &Upload) {
        if !upload.expires_on_access() {
            return;
        }

        let reaper = self.clone();
        let id = upload.id.clone();
        self.tasks.spawn("reap", upload.id.clone(), async move {
            reaper.reap(&id).await;
            Ok::<(), std::convert::Infallible>(())
        });
    }

    /// Remove directory and entry of an upload. Either may already be gone.
    pub async fn reap(&self, id: &str) {
        if let Err(e) = self.artifacts.remove_dir(id).await {
            tracing::error!(upload_id = %id, error = %e, "Failed to remove upload directory");
        }

        match self.db.remove(RecordKind::Upload, id) {
            Ok(true) => tracing::info!(upload_id = %id, "Reaped upload after download"),
            Ok(false) => tracing::debug!(upload_id = %id, "Upload already gone"),
            Err(e) => tracing::error!(upload_id = %id, error = %e, "Failed to remove upload entry"),
        }
    }

    /// Drop the entry of an upload whose file is gone, along with whatever
    /// is left of its directory.
    fn drop_stale_entry(&self, id: &str) {
        tracing::warn!(upload_id = %id, "Upload entry present but file missing");
        let reaper = self.clone();
        let id = id.to_string();
        self.tasks.spawn("drop stale entry", id.clone(), async move {
            if let Err(e) = reaper.artifacts.remove_dir(&id).await {
                // The sweeper picks the directory up once it is an orphan
                tracing::warn!(upload_id = %id, error = %e, "Failed to remove stale upload directory");
            }
            reaper.db.remove(RecordKind::Upload, &id).map(|_| ())
        });
    }
}
