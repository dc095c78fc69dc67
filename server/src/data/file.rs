//! File-backed settings store
//!
//! Keeps the encoded settings document in a single file. Writes go to a
//! sibling `.tmp` file which is flushed and renamed over the target, so a
//! crash never leaves a half-written document behind.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::error::DataError;

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored payload. A missing file means nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<Vec<u8>>, DataError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No settings file yet");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, payload: &[u8]) -> Result<(), DataError> {
        atomic_write(&self.path, payload).await
    }
}

async fn atomic_write(path: &Path, payload: &[u8]) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(payload).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("settings.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("settings.json"));

        store.save(b"{\"dry_run\":true}").await.unwrap();
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some(&b"{\"dry_run\":true}"[..])
        );

        store.save(b"{}").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = FileStore::new(&path);
        store.save(b"payload").await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("settings.json")]);
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let store = FileStore::new(blocker.join("settings.json"));
        assert!(matches!(store.save(b"{}").await, Err(DataError::Io(_))));
    }
}
