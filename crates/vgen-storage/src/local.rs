//! Local directory artifact store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::store::ArtifactStore;

/// Copies artifacts into `root/{key}`.
///
/// URLs are `{base_url}/{key}` when a base URL is configured (e.g. a static file server in
/// front of the directory), otherwise `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    base_url: Option<String>,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str, dest: &Path) -> StorageResult<String> {
        match &self.base_url {
            Some(base) => Ok(format!("{}/{}", base, key)),
            None => {
                let absolute = std::path::absolute(dest)?;
                url::Url::from_file_path(&absolute)
                    .map(|u| u.to_string())
                    .map_err(|_| {
                        StorageError::invalid_key(format!(
                            "cannot build URL for {}",
                            absolute.display()
                        ))
                    })
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<String> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Copy to a temporary name first so a reader never sees a half-written file.
        let partial = dest.with_extension("partial");
        tokio::fs::copy(path, &partial).await?;
        tokio::fs::rename(&partial, &dest).await?;

        info!(key, path = %dest.display(), "Stored artifact locally");
        self.url_for(key, &dest)
    }

    async fn check(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".write_probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
