//! On-disk layout of a directory store.
//!
//! ```text
//! <root>/objects/<key>
//! <root>/uploads/<upload-id>/meta.json
//! <root>/uploads/<upload-id>/00001.part
//! <root>/uploads/<upload-id>/00001.etag
//! ```
//!
//! The `.etag` sidecar holds the checksum computed when the part was stored,
//! so listing parts does not re-read them.

use std::path::{Path, PathBuf};

use ossync_transfer::{StoreError, validate_key};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub(crate) const OBJECTS_DIR: &str = "objects";
pub(crate) const UPLOADS_DIR: &str = "uploads";
const META_FILE: &str = "meta.json";
const PART_SUFFIX: &str = ".part";
const ETAG_SUFFIX: &str = ".etag";

/// Metadata persisted for each unfinished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UploadMeta {
    pub key: String,
    pub upload_id: String,
    /// Unix seconds.
    pub created_at: u64,
}

pub(crate) fn part_file_name(number: u32) -> String {
    format!("{number:05}{PART_SUFFIX}")
}

pub(crate) fn etag_file_name(number: u32) -> String {
    format!("{number:05}{ETAG_SUFFIX}")
}

pub(crate) fn parse_part_file_name(name: &str) -> Option<u32> {
    let number: u32 = name.strip_suffix(PART_SUFFIX)?.parse().ok()?;
    (number > 0).then_some(number)
}

#[derive(Debug, Clone)]
pub(crate) struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    /// Maps an object key to its file. The key must not escape the
    /// objects directory.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Ok(self.objects_dir().join(key))
    }

    /// Maps an upload id to its staging directory. Only ids this store
    /// could have issued are accepted.
    pub fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, StoreError> {
        if Uuid::parse_str(upload_id).is_err() {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(self.uploads_dir().join(upload_id))
    }

    pub fn meta_path(dir: &Path) -> PathBuf {
        dir.join(META_FILE)
    }
}

/// Writes `data` to `path` through a temporary sibling and a rename, so
/// readers never observe a partially written file.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Backend(format!("no parent for {}", path.display())))?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
