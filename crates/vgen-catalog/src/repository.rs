//! Catalog repository seam.

use async_trait::async_trait;

use vgen_models::{AudioTrack, TrackFilter};

use crate::error::CatalogResult;

/// Read-only access to the audio catalog.
///
/// Unfiltered draws go through [`id_range`](Self::id_range) and [`get`](Self::get), both
/// primary-key lookups. Filtered draws address rows by their position in id order within
/// the subset, so a caller can draw from `0..count` without materializing the table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackRepository: Send + Sync {
    /// Number of tracks matching `filter`.
    async fn count(&self, filter: &TrackFilter) -> CatalogResult<u64>;

    /// The track at `offset` in id order among those matching `filter`.
    ///
    /// `None` when the subset shrank since [`count`](Self::count) was called.
    async fn nth(&self, filter: &TrackFilter, offset: u64) -> CatalogResult<Option<AudioTrack>>;

    /// Smallest and largest track id, `None` for an empty catalog.
    async fn id_range(&self) -> CatalogResult<Option<(i64, i64)>>;

    async fn get(&self, id: i64) -> CatalogResult<Option<AudioTrack>>;

    async fn find_by_name(&self, name: &str) -> CatalogResult<Option<AudioTrack>>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> CatalogResult<()>;

    fn backend(&self) -> &'static str;
}
