//! Artifact storage for the VGen worker.
//!
//! Rendered videos are handed to an [`ArtifactStore`], which returns the URL the caller
//! receives in the job result:
//! - [`R2Client`] uploads to Cloudflare R2 (S3 API) and builds public custom-domain URLs
//! - [`LocalArtifactStore`] copies into an output directory

pub mod error;
pub mod local;
pub mod r2;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use local::LocalArtifactStore;
pub use r2::{R2Client, R2Config};
pub use store::{object_key, ArtifactStore};
