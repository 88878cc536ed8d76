use std::path::{Component, Path};

use crate::TransferError;

/// Builds the object key for uploading `file_name` under `prefix`.
///
/// Only the final path component of `file_name` is used. An empty or `/`
/// prefix puts the object at the bucket root. Leading slashes are trimmed
/// because object keys are never absolute.
pub fn object_key(prefix: &str, file_name: &Path) -> Result<String, TransferError> {
    let base = file_name
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            TransferError::InvalidKey(format!("no file name in {}", file_name.display()))
        })?;

    let prefix = prefix.trim_matches('/');
    let key = if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{prefix}/{base}")
    };
    validate_key(&key)?;
    Ok(key)
}

/// Validates that an object key is relative and free of traversal.
///
/// Rejects:
/// - Empty keys
/// - Keys starting with `/`
/// - Parent directory segments (`..`)
/// - Windows prefix components (`C:`, `\\server`)
///
/// Keys must satisfy this before a directory-backed store maps them onto
/// the filesystem.
pub fn validate_key(key: &str) -> Result<(), TransferError> {
    if key.is_empty() {
        return Err(TransferError::InvalidKey("empty key".into()));
    }

    for component in Path::new(key).components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidKey(format!(
                    "parent directory segment not allowed: {key}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidKey(format!("absolute key not allowed: {key}")));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
