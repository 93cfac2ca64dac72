//! R2 client implementation.

use async_trait::async_trait;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ArtifactStore;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Base of public object URLs, e.g. `https://media.example.com`
    pub public_base_url: String,
}

fn required(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
}

impl R2Config {
    /// Create config from environment variables.
    ///
    /// The endpoint comes from `R2_ENDPOINT_URL` or is derived from `R2_ACCOUNT_ID`; the
    /// public base from `R2_PUBLIC_BASE_URL` or `R2_CUSTOM_DOMAIN`.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint_url = match required("R2_ENDPOINT_URL") {
            Ok(url) => url,
            Err(_) => format!(
                "https://{}.r2.cloudflarestorage.com",
                required("R2_ACCOUNT_ID").map_err(|_| {
                    StorageError::config_error("R2_ENDPOINT_URL or R2_ACCOUNT_ID must be set")
                })?
            ),
        };

        let public_base_url = match required("R2_PUBLIC_BASE_URL") {
            Ok(url) => url,
            Err(_) => format!(
                "https://{}",
                required("R2_CUSTOM_DOMAIN").map_err(|_| {
                    StorageError::config_error("R2_PUBLIC_BASE_URL or R2_CUSTOM_DOMAIN must be set")
                })?
            ),
        };

        let config = Self {
            endpoint_url,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        url::Url::parse(&self.public_base_url)
            .map_err(|e| StorageError::config_error(format!("invalid public base URL: {}", e)))?;
        url::Url::parse(&self.endpoint_url)
            .map_err(|e| StorageError::config_error(format!("invalid endpoint URL: {}", e)))?;
        Ok(())
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(R2Config::from_env()?).await
    }

    /// Public URL of `key`.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    /// Upload a file to R2.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Check connectivity to R2 by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for R2Client {
    async fn store(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        self.upload_file(path, key, content_type).await?;
        Ok(self.public_url(key))
    }

    async fn check(&self) -> StorageResult<()> {
        self.check_connectivity().await
    }

    fn backend(&self) -> &'static str {
        "r2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> R2Config {
        R2Config {
            endpoint_url: "https://acct.r2.cloudflarestorage.com".into(),
            access_key_id: "id".into(),
            secret_access_key: "secret".into(),
            bucket_name: "videos".into(),
            region: "auto".into(),
            public_base_url: "https://media.example.com/".into(),
        }
    }

    #[tokio::test]
    async fn test_public_url_uses_custom_domain() {
        let client = R2Client::new(config()).await.unwrap();
        assert_eq!(
            client.public_url("videos/vgen_a.mp4"),
            "https://media.example.com/videos/vgen_a.mp4"
        );
        assert_eq!(client.backend(), "r2");
    }

    #[tokio::test]
    async fn test_rejects_invalid_public_base() {
        let mut bad = config();
        bad.public_base_url = "not a url".into();
        assert!(matches!(R2Client::new(bad).await, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore = "requires R2 credentials"]
    async fn test_upload_to_r2() {
        let client = R2Client::from_env().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.txt");
        std::fs::write(&path, b"vgen").unwrap();
        let url = client.store(&path, "selfcheck/probe.txt", "text/plain").await.unwrap();
        assert!(url.ends_with("/selfcheck/probe.txt"));
    }
}
