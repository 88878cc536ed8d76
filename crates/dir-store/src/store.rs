use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ossync_transfer::{
    CompletedPart, MultipartUpload, ObjectHead, ObjectStoreClient, RemotePartRecord, StoreError,
    StoreFuture, checksums_match, part_etag,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::layout::{
    Layout, UploadMeta, etag_file_name, parse_part_file_name, part_file_name, write_atomic,
};

/// Object store kept in a local directory.
///
/// Objects are plain files under `objects/`; multipart uploads stage one
/// file per part under `uploads/<id>/` until they are completed or aborted.
/// Every file is written through a rename, so a crash never leaves a
/// truncated part or object behind.
#[derive(Debug, Clone)]
pub struct DirStore {
    layout: Layout,
}

impl DirStore {
    /// Opens (or initializes) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = Layout::new(root.into());
        tokio::fs::create_dir_all(layout.objects_dir()).await?;
        tokio::fs::create_dir_all(layout.uploads_dir()).await?;
        debug!(root = %layout.root().display(), "directory store opened");
        Ok(Self { layout })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Returns the staging directory of an upload after checking that it
    /// exists and belongs to `upload.key`.
    async fn staged(&self, upload: &MultipartUpload) -> Result<PathBuf, StoreError> {
        let dir = self.layout.upload_dir(&upload.upload_id)?;
        let meta = read_meta(&dir, &upload.upload_id).await?;
        if meta.key != upload.key {
            return Err(StoreError::NoSuchUpload(format!(
                "{} (belongs to {}, not {})",
                upload.upload_id, meta.key, upload.key
            )));
        }
        Ok(dir)
    }

    async fn assemble(
        &self,
        dir: &Path,
        target: &Path,
        parts: &[CompletedPart],
    ) -> Result<u64, StoreError> {
        let tmp = dir.join(format!(".{}.assemble", Uuid::new_v4()));
        let mut out = tokio::fs::File::create(&tmp).await?;
        let mut size = 0u64;

        for part in parts {
            let path = dir.join(part_file_name(part.number));
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let msg = format!("part {} not uploaded", part.number);
                    return Err(StoreError::InvalidPart(msg));
                }
                Err(e) => return Err(e.into()),
            };
            if !checksums_match(&part.checksum, &part_etag(&data)) {
                return Err(StoreError::InvalidPart(format!(
                    "part {} checksum {} does not match stored data",
                    part.number, part.checksum
                )));
            }
            out.write_all(&data).await?;
            size += data.len() as u64;
        }

        out.sync_all().await?;
        drop(out);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&tmp, target).await?;
        Ok(size)
    }
}

async fn read_meta(dir: &Path, upload_id: &str) -> Result<UploadMeta, StoreError> {
    let raw = match tokio::fs::read(Layout::meta_path(dir)).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw)
        .map_err(|e| StoreError::Backend(format!("corrupt metadata for upload {upload_id}: {e}")))
}

/// Reads the stored checksum of a part, hashing the part itself when the
/// sidecar is missing.
async fn stored_etag(dir: &Path, number: u32) -> Result<String, StoreError> {
    match tokio::fs::read_to_string(dir.join(etag_file_name(number))).await {
        Ok(etag) => Ok(etag.trim().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(part = number, "etag sidecar missing, hashing part");
            let data = tokio::fs::read(dir.join(part_file_name(number))).await?;
            Ok(part_etag(&data))
        }
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn not_found(e: std::io::Error, key: &str) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        e.into()
    }
}

fn check_ascending(parts: &[CompletedPart]) -> Result<(), StoreError> {
    for pair in parts.windows(2) {
        if pair[0].number >= pair[1].number {
            return Err(StoreError::InvalidPart(format!(
                "part list not ascending at {} -> {}",
                pair[0].number, pair[1].number
            )));
        }
    }
    if parts.first().is_some_and(|p| p.number == 0) {
        return Err(StoreError::InvalidPart("part numbers start at 1".into()));
    }
    Ok(())
}

impl ObjectStoreClient for DirStore {
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectHead> {
        Box::pin(async move {
            let path = self.layout.object_path(key)?;
            let meta = tokio::fs::metadata(&path).await.map_err(|e| not_found(e, key))?;
            if !meta.is_file() {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Ok(ObjectHead {
                content_length: Some(meta.len()),
                etag: None,
            })
        })
    }

    fn get_range<'a>(
        &'a self,
        key: &'a str,
        start: u64,
        end_inclusive: u64,
    ) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.layout.object_path(key)?;
            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| not_found(e, key))?;
            let size = file.metadata().await?.len();
            if start > end_inclusive || end_inclusive >= size {
                return Err(StoreError::InvalidRange {
                    key: key.to_string(),
                    start,
                    end: end_inclusive,
                });
            }

            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; (end_inclusive - start + 1) as usize];
            file.read_exact(&mut buf).await?;
            Ok(buf)
        })
    }

    fn initiate_multipart_upload<'a>(&'a self, key: &'a str) -> StoreFuture<'a, MultipartUpload> {
        Box::pin(async move {
            self.layout.object_path(key)?;
            let upload_id = Uuid::new_v4().to_string();
            let dir = self.layout.upload_dir(&upload_id)?;
            tokio::fs::create_dir_all(&dir).await?;

            let meta = UploadMeta {
                key: key.to_string(),
                upload_id: upload_id.clone(),
                created_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            };
            let raw = serde_json::to_vec_pretty(&meta)
                .map_err(|e| StoreError::Backend(format!("encode upload metadata: {e}")))?;
            write_atomic(&Layout::meta_path(&dir), &raw).await?;

            info!(key, upload_id = %upload_id, "multipart upload created");
            Ok(MultipartUpload::new(key, upload_id))
        })
    }

    fn put_part<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        part_number: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if part_number == 0 {
                return Err(StoreError::InvalidPart("part numbers start at 1".into()));
            }
            let dir = self.staged(upload).await?;
            let etag_path = dir.join(etag_file_name(part_number));
            // A sidecar must never describe bytes other than the stored part.
            remove_if_exists(&etag_path).await?;
            write_atomic(&dir.join(part_file_name(part_number)), data).await?;

            let etag = part_etag(data);
            write_atomic(&etag_path, etag.as_bytes()).await?;
            debug!(
                upload_id = %upload.upload_id,
                part = part_number,
                size = data.len(),
                "part stored"
            );
            Ok(etag)
        })
    }

    fn list_parts<'a>(
        &'a self,
        upload: &'a MultipartUpload,
    ) -> StoreFuture<'a, Vec<RemotePartRecord>> {
        Box::pin(async move {
            let dir = self.staged(upload).await?;
            let mut records = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(number) = name.to_str().and_then(parse_part_file_name) else {
                    continue;
                };
                let size = entry.metadata().await?.len();
                records.push(RemotePartRecord {
                    number,
                    checksum: stored_etag(&dir, number).await?,
                    size,
                });
            }
            records.sort_by_key(|r| r.number);
            Ok(records)
        })
    }

    fn complete_multipart_upload<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            check_ascending(parts)?;
            let dir = self.staged(upload).await?;
            let target = self.layout.object_path(&upload.key)?;

            let size = self.assemble(&dir, &target, parts).await?;
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(
                    upload_id = %upload.upload_id,
                    error = %e,
                    "failed to remove staging directory"
                );
            }
            info!(
                key = %upload.key,
                upload_id = %upload.upload_id,
                parts = parts.len(),
                size,
                "multipart upload completed"
            );
            Ok(())
        })
    }

    fn abort_multipart_upload<'a>(&'a self, upload: &'a MultipartUpload) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.layout.upload_dir(&upload.upload_id)?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    info!(
                        key = %upload.key,
                        upload_id = %upload.upload_id,
                        "multipart upload aborted"
                    );
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    Err(StoreError::NoSuchUpload(upload.upload_id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_multipart_uploads(&self) -> StoreFuture<'_, Vec<MultipartUpload>> {
        Box::pin(async move {
            let mut uploads = Vec::new();
            let mut entries = tokio::fs::read_dir(self.layout.uploads_dir()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let id = entry.file_name().to_string_lossy().into_owned();
                match read_meta(&entry.path(), &id).await {
                    Ok(meta) => uploads.push(MultipartUpload::new(meta.key, meta.upload_id)),
                    Err(e) => warn!(upload_id = %id, error = %e, "skipping unreadable upload"),
                }
            }
            uploads.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.upload_id.cmp(&b.upload_id)));
            Ok(uploads)
        })
    }
}
