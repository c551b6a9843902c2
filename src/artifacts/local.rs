use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use super::{ArtifactError, ArtifactStore, StoredUpload};

/// Filesystem artifact store rooted at the configured storage directory.
///
/// Layout: `<base>/<upload id>/<member or archive name>`. All paths are
/// absolute; nothing here touches the process working directory.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(base_path.as_ref())?;
        let base_path = std::fs::canonicalize(base_path.as_ref())?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn upload_dir(&self, id: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.base_path.join(single_component(id)?))
    }

    fn member_path(&self, id: &str, name: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.upload_dir(id)?.join(single_component(name)?))
    }
}

/// Reject anything that is not one plain path segment.
fn single_component(name: &str) -> Result<&str, ArtifactError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(ArtifactError::InvalidName(name.to_string())),
    }
}

fn zip_members(dir: &Path, members: &[String], archive: &Path) -> Result<(), ArtifactError> {
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut writer = zip::ZipWriter::new(BufWriter::new(File::create(archive)?));
    for member in members {
        let mut source = File::open(dir.join(single_component(member)?))?;
        writer.start_file(member.as_str(), options)?;
        std::io::copy(&mut source, &mut writer)?;
    }
    writer.finish()?.flush()?;
    Ok(())
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn put(&self, id: &str, name: &str, data: Bytes) -> Result<(), ArtifactError> {
        let path = self.member_path(id, name)?;
        tokio::fs::create_dir_all(self.upload_dir(id)?).await?;
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    async fn get(&self, id: &str, name: &str) -> Result<Bytes, ArtifactError> {
        let path = self.member_path(id, name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(format!("{id}/{name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str, name: &str) -> Result<bool, ArtifactError> {
        let path = self.member_path(id, name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn remove(&self, id: &str, name: &str) -> Result<(), ArtifactError> {
        let path = self.member_path(id, name)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn remove_dir(&self, id: &str) -> Result<(), ArtifactError> {
        let dir = self.upload_dir(id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn archive(
        &self,
        id: &str,
        members: &[String],
        archive_name: &str,
    ) -> Result<(), ArtifactError> {
        let dir = self.upload_dir(id)?;
        let archive = self.member_path(id, archive_name)?;
        let members = members.to_vec();

        let result =
            tokio::task::spawn_blocking(move || zip_members(&dir, &members, &archive)).await?;

        if result.is_err() {
            // Do not leave a half-written archive behind.
            if let Err(e) = self.remove(id, archive_name).await {
                tracing::warn!(upload_id = %id, error = %e, "Failed to remove partial archive");
            }
        }
        result
    }

    async fn list_dirs(&self) -> Result<Vec<StoredUpload>, ArtifactError> {
        let mut dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            // Not something this store could have created
            let Ok(id) = entry.file_name().into_string() else {
                continue;
            };
            dirs.push(StoredUpload {
                id,
                modified: metadata.modified()?.into(),
            });
        }
        Ok(dirs)
    }
}
