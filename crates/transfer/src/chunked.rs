use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::types::Part;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes the ETag-style checksum of a part: quoted, hex-encoded MD5.
///
/// Object stores report part ETags in this format, so local and remote
/// fingerprints compare directly.
pub fn part_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Compares two checksums, ignoring surrounding quotes and hex case.
pub fn checksums_match(a: &str, b: &str) -> bool {
    a.trim_matches('"').eq_ignore_ascii_case(b.trim_matches('"'))
}

// ---------------------------------------------------------------------------
// PartReader
// ---------------------------------------------------------------------------

/// Reads planned parts from a local source file.
pub struct PartReader {
    file: File,
    position: u64,
    file_size: u64,
    path: PathBuf,
}

impl PartReader {
    /// Opens `path` for part reads.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            position: 0,
            file_size,
            path: path.to_path_buf(),
        })
    }

    /// Reads exactly the bytes of `part`.
    ///
    /// Fails with [`TransferError::SourceChanged`] if the file no longer
    /// holds the whole range.
    pub async fn read_part(&mut self, part: &Part) -> Result<Vec<u8>, TransferError> {
        if self.position != part.offset {
            self.file.seek(SeekFrom::Start(part.offset)).await?;
            self.position = part.offset;
        }

        let mut buf = vec![0u8; part.length as usize];
        match self.file.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransferError::SourceChanged {
                    number: part.number,
                    expected: part.length,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.position += part.length;
        Ok(buf)
    }

    /// Size of the source when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Destination file
// ---------------------------------------------------------------------------

/// Opens (or creates) a download destination for appending.
///
/// Returns the handle and the current file size, which is the offset the
/// download resumes from.
pub async fn open_destination(path: &Path) -> Result<(File, u64), TransferError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}
