//! Static in-memory catalog.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use vgen_models::{AudioTrack, TrackFilter};

use crate::error::{CatalogError, CatalogResult};
use crate::repository::TrackRepository;

/// Catalog shipped with the worker, used when no database or file is configured.
const BUILTIN_CATALOG: &str = include_str!("../data/default_catalog.json");

/// One entry of a JSON catalog file. Missing ids are assigned after the highest given id.
#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: Option<i64>,
    name: String,
    url: String,
    #[serde(default)]
    duration_seconds: Option<f64>,
}

/// Catalog held in memory, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrackRepository {
    tracks: Vec<AudioTrack>,
}

impl InMemoryTrackRepository {
    /// Build from tracks, enforcing unique ids and row invariants.
    pub fn new(mut tracks: Vec<AudioTrack>) -> CatalogResult<Self> {
        let mut seen = HashSet::new();
        for track in &tracks {
            track.check().map_err(CatalogError::InvalidData)?;
            if !seen.insert(track.id) {
                return Err(CatalogError::invalid_data(format!("duplicate track id {}", track.id)));
            }
        }
        tracks.sort_by_key(|t| t.id);
        Ok(Self { tracks })
    }

    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        let mut next_id = entries.iter().filter_map(|e| e.id).max().unwrap_or(0) + 1;
        let now = Utc::now();

        let tracks = entries
            .into_iter()
            .map(|entry| {
                let id = entry.id.unwrap_or_else(|| {
                    let id = next_id;
                    next_id += 1;
                    id
                });
                AudioTrack {
                    id,
                    name: entry.name,
                    url: entry.url,
                    duration_seconds: entry.duration_seconds,
                    created_at: now,
                }
            })
            .collect();

        Self::new(tracks)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let repo = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), tracks = repo.len(), "Loaded catalog file");
        Ok(repo)
    }

    pub fn builtin() -> CatalogResult<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn filtered<'a>(
        &'a self,
        filter: &'a TrackFilter,
    ) -> impl Iterator<Item = &'a AudioTrack> + 'a {
        self.tracks.iter().filter(move |t| filter.matches(t))
    }
}

#[async_trait]
impl TrackRepository for InMemoryTrackRepository {
    async fn count(&self, filter: &TrackFilter) -> CatalogResult<u64> {
        Ok(self.filtered(filter).count() as u64)
    }

    async fn nth(&self, filter: &TrackFilter, offset: u64) -> CatalogResult<Option<AudioTrack>> {
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(None);
        };
        Ok(self.filtered(filter).nth(offset).cloned())
    }

    async fn id_range(&self) -> CatalogResult<Option<(i64, i64)>> {
        Ok(self.tracks.first().zip(self.tracks.last()).map(|(a, b)| (a.id, b.id)))
    }

    async fn get(&self, id: i64) -> CatalogResult<Option<AudioTrack>> {
        Ok(self
            .tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| self.tracks[i].clone()))
    }

    async fn find_by_name(&self, name: &str) -> CatalogResult<Option<AudioTrack>> {
        Ok(self.tracks.iter().find(|t| t.name == name).cloned())
    }

    async fn ping(&self) -> CatalogResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
