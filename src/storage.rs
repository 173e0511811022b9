use crate::error::StorageError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("filename pattern is valid"));

const MAX_FILENAME_LEN: usize = 200;

/// Writable directory holding attachment bytes while they are being OCR'd.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    /// Create the directory (and parents) if needed.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::CreateDir {
            path: root.clone(),
            source,
        })?;
        info!(path = %root.display(), "Upload directory ready");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path for an attachment, unique per submission and form field.
    pub fn attachment_path(&self, submission_id: &str, field_id: &str, filename: &str) -> PathBuf {
        let prefix = unique_prefix(submission_id, field_id);
        self.root.join(format!("{prefix}_{}", sanitize_filename(filename)))
    }

    pub async fn write(
        &self,
        submission_id: &str,
        field_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.attachment_path(submission_id, field_id, filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Attachment written");
        Ok(path)
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` and cap the length.
pub fn sanitize_filename(name: &str) -> String {
    let name = if name.is_empty() { "file.bin" } else { name };
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(name, "_");
    cleaned.chars().take(MAX_FILENAME_LEN).collect()
}

/// Short hex digest of submission + field, so concurrent submissions with
/// identically named files never share a path.
fn unique_prefix(submission_id: &str, field_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(submission_id.as_bytes());
    hasher.update(b"/");
    hasher.update(field_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Best-effort removal. Returns how many paths are gone afterwards;
/// a path that was already missing counts as removed.
pub async fn remove_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed transient file");
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                removed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete transient file");
            }
        }
    }
    removed
}
