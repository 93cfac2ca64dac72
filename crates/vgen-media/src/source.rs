//! Resolving a job's media source to a local file.
//!
//! Supported sources:
//! - `http(s)://` URLs, streamed to disk with a size cap and content-type allow-list
//! - inline base64 bytes (optionally a `data:` URL)
//! - paths relative to a configured input directory

use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use vgen_models::MediaSource;

use crate::error::{MediaError, MediaResult};

/// Content types accepted from remote sources.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/jpg",
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/webm",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/x-m4a",
    "audio/aac",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/ogg",
    "audio/webm",
    "audio/flac",
    "audio/x-flac",
    "application/octet-stream",
];

/// Extensions accepted from URL paths and inline format hints.
const KNOWN_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "mp4", "mov", "avi", "webm", "mp3", "m4a", "aac", "wav", "ogg", "flac",
];

/// Limits applied while resolving sources.
#[derive(Debug, Clone)]
pub struct SourceResolverConfig {
    pub max_file_size: u64,
    pub download_timeout: Duration,
    /// Directory that relative path sources resolve against. `None` disables path sources.
    pub input_dir: Option<PathBuf>,
}

impl Default for SourceResolverConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            download_timeout: Duration::from_secs(300),
            input_dir: None,
        }
    }
}

/// Turns job sources and catalog URLs into local files inside a job's scratch directory.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Materialize the job's source in `dest_dir`.
    async fn resolve(&self, source: &MediaSource, dest_dir: &Path) -> MediaResult<PathBuf>;

    /// Download `url` to `dest_dir/{stem}.{ext}`.
    async fn fetch(&self, url: &str, dest_dir: &Path, stem: &str) -> MediaResult<PathBuf>;
}

/// Default resolver backed by `reqwest`.
pub struct HttpSourceResolver {
    client: reqwest::Client,
    config: SourceResolverConfig,
}

impl HttpSourceResolver {
    pub fn new(config: SourceResolverConfig) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("vgen-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MediaError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn download(&self, url: &str, dest_dir: &Path, stem: &str) -> MediaResult<PathBuf> {
        let parsed = url::Url::parse(url)
            .map_err(|e| MediaError::invalid_input(format!("invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MediaError::invalid_input(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        debug!(url = %url, "Downloading source");

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| download_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        if let Some(ct) = &content_type {
            if !ALLOWED_MIME_TYPES.contains(&ct.as_str()) {
                return Err(MediaError::UnsupportedFormat(format!(
                    "content type '{}' is not allowed",
                    ct
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len > self.config.max_file_size {
                return Err(MediaError::ResourceLimit(format!(
                    "{} is {} bytes, limit is {}",
                    url, len, self.config.max_file_size
                )));
            }
        }

        let ext = content_type
            .as_deref()
            .and_then(extension_for_mime)
            .or_else(|| extension_from_path(parsed.path()))
            .unwrap_or("tmp");
        let dest = dest_dir.join(format!("{}.{}", stem, ext));

        tokio::fs::create_dir_all(dest_dir).await?;
        let mut file = tokio::fs::File::create(&dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(download_error(url, e));
                }
            };
            written += chunk.len() as u64;
            if written > self.config.max_file_size {
                drop(file);
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(MediaError::ResourceLimit(format!(
                    "{} exceeds {} bytes",
                    url, self.config.max_file_size
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!(url = %url, bytes = written, path = %dest.display(), "Downloaded source");
        Ok(dest)
    }

    async fn write_inline(
        &self,
        data: &str,
        format: Option<&str>,
        dest_dir: &Path,
    ) -> MediaResult<PathBuf> {
        // Accept `data:<mime>;base64,<payload>` as well as bare base64.
        let data_url = data
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','));
        let (mime, payload) = match data_url {
            Some((meta, payload)) => (meta.split(';').next(), payload),
            None => (None, data),
        };

        // base64 of N bytes is ~4N/3 chars; reject before decoding.
        if (payload.len() as u64) / 4 * 3 > self.config.max_file_size {
            return Err(MediaError::ResourceLimit(format!(
                "inline source exceeds {} bytes",
                self.config.max_file_size
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| {
                MediaError::invalid_input(format!("inline source is not valid base64: {}", e))
            })?;

        if bytes.is_empty() {
            return Err(MediaError::invalid_input("inline source is empty"));
        }
        if bytes.len() as u64 > self.config.max_file_size {
            return Err(MediaError::ResourceLimit(format!(
                "inline source is {} bytes, limit is {}",
                bytes.len(),
                self.config.max_file_size
            )));
        }

        let ext = format
            .map(|f| f.trim_start_matches('.').to_ascii_lowercase())
            .filter(|f| KNOWN_EXTENSIONS.contains(&f.as_str()))
            .or_else(|| mime.and_then(extension_for_mime).map(str::to_string))
            .unwrap_or_else(|| "tmp".to_string());

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(format!("source.{}", ext));
        tokio::fs::write(&dest, &bytes).await?;

        debug!(bytes = bytes.len(), path = %dest.display(), "Wrote inline source");
        Ok(dest)
    }

    fn local_path(&self, reference: &str) -> MediaResult<PathBuf> {
        let input_dir = self.config.input_dir.as_ref().ok_or_else(|| {
            MediaError::invalid_input(format!(
                "'{}' is not a URL and local sources are disabled",
                reference
            ))
        })?;

        let rel = Path::new(reference);
        if !is_confined(rel) {
            return Err(MediaError::SecurityViolation(format!(
                "source path '{}' escapes the input directory",
                reference
            )));
        }

        let path = input_dir.join(rel);
        if !path.is_file() {
            return Err(MediaError::FileNotFound(path));
        }
        Ok(path)
    }
}

#[async_trait]
impl SourceResolver for HttpSourceResolver {
    async fn resolve(&self, source: &MediaSource, dest_dir: &Path) -> MediaResult<PathBuf> {
        match source {
            MediaSource::Reference(reference) if source.is_remote() => {
                self.download(reference, dest_dir, "source").await
            }
            MediaSource::Reference(reference) => self.local_path(reference.trim()),
            MediaSource::Inline { inline, format } => {
                self.write_inline(inline, format.as_deref(), dest_dir).await
            }
        }
    }

    async fn fetch(&self, url: &str, dest_dir: &Path, stem: &str) -> MediaResult<PathBuf> {
        self.download(url, dest_dir, stem).await
    }
}

fn download_error(url: &str, err: reqwest::Error) -> MediaError {
    if err.is_timeout() {
        MediaError::download_failed(format!("timed out fetching {}", url))
    } else {
        MediaError::download_failed(format!("{}: {}", url, err))
    }
}

/// Relative, without `..`, root or prefix components.
fn is_confined(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/x-msvideo" => Some("avi"),
        "video/webm" => Some("webm"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "audio/webm" => Some("webm"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

fn extension_from_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    KNOWN_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(max: u64, input_dir: Option<PathBuf>) -> HttpSourceResolver {
        HttpSourceResolver::new(SourceResolverConfig {
            max_file_size: max,
            download_timeout: Duration::from_secs(5),
            input_dir,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_download_writes_file_with_mime_extension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(vec![1u8; 64]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = MediaSource::Reference(format!("{}/clip", server.uri()));
        let path = resolver(1024, None).resolve(&source, dir.path()).await.unwrap();

        assert_eq!(path.extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(&path).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_download_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(vec![0u8; 2048]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = resolver(1024, None)
            .fetch(&format!("{}/big.mp3", server.uri()), dir.path(), "audio")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ResourceLimit(_)), "{:?}", err);
        assert!(!dir.path().join("audio.mp3").exists());
    }

    #[tokio::test]
    async fn test_common_audio_containers_are_accepted() {
        let server = MockServer::start().await;
        let cases = [
            ("audio/mp4", "m4a"),
            ("audio/x-wav", "wav"),
            ("audio/ogg; codecs=vorbis", "ogg"),
            ("audio/flac", "flac"),
        ];
        for (i, (mime, _)) in cases.iter().enumerate() {
            Mock::given(method("GET"))
                .and(path(format!("/track{}", i)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", *mime)
                        .set_body_bytes(vec![7u8; 16]),
                )
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        for (i, (mime, ext)) in cases.iter().enumerate() {
            let path = resolver(1024, None)
                .fetch(&format!("{}/track{}", server.uri(), i), dir.path(), &format!("audio{}", i))
                .await
                .unwrap_or_else(|e| panic!("{} rejected: {}", mime, e));
            assert_eq!(path.extension().unwrap(), *ext, "{}", mime);
        }
    }

    #[tokio::test]
    async fn test_download_rejects_disallowed_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = resolver(1024, None)
            .fetch(&server.uri(), dir.path(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = resolver(1024, None)
            .fetch(&format!("{}/missing.mp3", server.uri()), dir.path(), "a")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"), "{}", err);
    }

    #[tokio::test]
    async fn test_inline_source() {
        let dir = tempfile::tempdir().unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"not really a video");
        let source = MediaSource::Inline {
            inline: encoded.clone(),
            format: Some("MP4".into()),
        };
        let path = resolver(1024, None).resolve(&source, dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "source.mp4");
        assert_eq!(std::fs::read(&path).unwrap(), b"not really a video");

        let data_url = MediaSource::Inline {
            inline: format!("data:image/png;base64,{}", encoded),
            format: None,
        };
        let path = resolver(1024, None).resolve(&data_url, dir.path()).await.unwrap();
        assert_eq!(path.extension().unwrap(), "png");
    }

    #[tokio::test]
    async fn test_inline_rejects_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let source = MediaSource::Inline {
            inline: "!!!".into(),
            format: None,
        };
        let err = resolver(1024, None).resolve(&source, dir.path()).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_local_paths_confined_to_input_dir() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.mp4"), b"x").unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let r = resolver(1024, Some(input.path().to_path_buf()));

        let ok = r.resolve(&MediaSource::Reference("a.mp4".into()), scratch.path()).await.unwrap();
        assert_eq!(ok, input.path().join("a.mp4"));

        let escape = r
            .resolve(&MediaSource::Reference("../etc/passwd".into()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(escape, MediaError::SecurityViolation(_)));

        let absolute = r
            .resolve(&MediaSource::Reference("/etc/passwd".into()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(absolute, MediaError::SecurityViolation(_)));

        let missing = r
            .resolve(&MediaSource::Reference("b.mp4".into()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(missing, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_local_paths_disabled_without_input_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let err = resolver(1024, None)
            .resolve(&MediaSource::Reference("a.mp4".into()), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(extension_for_mime("video/quicktime"), Some("mov"));
        assert_eq!(extension_for_mime("application/octet-stream"), None);
        assert_eq!(extension_from_path("/sounds/lofi.MP3"), Some("mp3"));
        assert_eq!(extension_from_path("/sounds/lofi.exe"), None);
    }
}
