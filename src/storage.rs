use std::{
    io,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create image directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write image {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Decodes the `image` field of a capture request. A data-URI header such as
/// `data:image/jpeg;base64,` is dropped before decoding.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match payload.split(',').nth(1) {
        Some(body) => body,
        None => payload,
    };
    // Line-wrapped (MIME style) payloads are accepted.
    let compact: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(compact)
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ImageStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to a fresh file under the store directory, creating the
    /// directory if needed.
    pub async fn save(&self, bytes: &[u8]) -> Result<StoredImage, StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.dir.join(format!("{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size = bytes.len(), "image stored");
        Ok(StoredImage {
            path,
            removed: false,
        })
    }
}

/// A saved request image. Call [`StoredImage::remove`] once it is no longer
/// needed; if it is dropped first (early return, cancelled request) the file is
/// removed synchronously instead.
#[derive(Debug)]
pub struct StoredImage {
    path: PathBuf,
    removed: bool,
}

impl StoredImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove stored image");
            }
        }
    }
}

impl Drop for StoredImage {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove stored image");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_prefix_is_stripped() {
        let payload = "aGVsbG8gd29ybGQ=";
        let prefixed = format!("data:image/jpeg;base64,{payload}");

        let plain = decode_image_payload(payload).unwrap();
        assert_eq!(plain, b"hello world");
        assert_eq!(decode_image_payload(&prefixed).unwrap(), plain);
    }

    #[test]
    fn line_wrapped_payload_decodes_like_unwrapped() {
        let wrapped = "data:image/jpeg;base64,aGVsbG8g\nd29y\r\nbGQ=\n";

        assert_eq!(decode_image_payload(wrapped).unwrap(), b"hello world");
        assert_eq!(
            decode_image_payload(wrapped).unwrap(),
            decode_image_payload("aGVsbG8gd29ybGQ=").unwrap()
        );
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode_image_payload("not base64 at all!").is_err());
    }

    #[tokio::test]
    async fn saved_bytes_read_back_identically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path().join("nested").join("images"));
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let stored = store.save(&bytes).await.unwrap();

        assert!(stored.path().starts_with(store.dir()));
        assert_eq!(std::fs::read(stored.path()).unwrap(), bytes);
    }

    #[tokio::test]
    async fn each_save_gets_its_own_file_and_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        let first = store.save(b"first").await.unwrap();
        let second = store.save(b"second").await.unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read(first.path()).unwrap(), b"first");

        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().exists());
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());

        let stored = store.save(b"pizza").await.unwrap();
        let path = stored.path().to_path_buf();
        stored.remove().await;

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unusable_directory_is_a_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = ImageStore::new(blocker.join("images"));
        let err = store.save(b"data").await.unwrap_err();

        assert!(matches!(err, StorageError::CreateDir { .. }));
    }
}
