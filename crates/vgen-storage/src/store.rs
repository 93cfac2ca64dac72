//! Storage seam used by the job handler.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Destination for finished artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the file at `path` under `key` and return its caller-visible URL.
    async fn store(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    /// Reachability check for readiness probes.
    async fn check(&self) -> StorageResult<()>;

    fn backend(&self) -> &'static str;
}

/// Build `{folder}/{filename}`, rejecting empty or traversing segments.
pub fn object_key(folder: &str, filename: &str) -> StorageResult<String> {
    if filename.is_empty() || filename.contains('/') || filename == ".." || filename == "." {
        return Err(StorageError::invalid_key(format!("bad filename '{}'", filename)));
    }
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        return Ok(filename.to_string());
    }
    if folder.split('/').any(|seg| seg.is_empty() || seg == ".." || seg == ".") {
        return Err(StorageError::invalid_key(format!("bad folder '{}'", folder)));
    }
    Ok(format!("{}/{}", folder, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("videos", "a.mp4").unwrap(), "videos/a.mp4");
        assert_eq!(object_key("/clips/2026/", "a.mp4").unwrap(), "clips/2026/a.mp4");
        assert_eq!(object_key("", "a.mp4").unwrap(), "a.mp4");
        assert!(object_key("videos/../secret", "a.mp4").is_err());
        assert!(object_key("videos", "../a.mp4").is_err());
        assert!(object_key("videos", "").is_err());
    }
}
