//! Random audio track selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use vgen_models::{AudioTrack, RandomizationToken, TrackFilter};

use crate::error::CatalogResult;
use crate::repository::TrackRepository;

/// Distinct candidates drawn per job so a failed track download can fall through.
pub const DEFAULT_CANDIDATES: usize = 3;

/// Id probes allowed per wanted track before falling back to an offset draw.
const DRAW_ATTEMPTS_PER_PICK: usize = 16;

/// A chosen track and the token that records the choice.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub track: AudioTrack,
    pub token: RandomizationToken,
}

/// Uniform random selection over the (optionally filtered) catalog.
///
/// The draw is a function of the seed and the catalog contents only, so the same seed over
/// the same catalog always yields the same tracks.
#[derive(Clone)]
pub struct AssetSelector {
    repo: Arc<dyn TrackRepository>,
}

impl AssetSelector {
    pub fn new(repo: Arc<dyn TrackRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn TrackRepository> {
        &self.repo
    }

    /// One uniformly random track, or `None` when the subset is empty.
    pub async fn select(
        &self,
        filter: Option<&TrackFilter>,
        seed: u64,
    ) -> CatalogResult<Option<Selection>> {
        Ok(self
            .select_candidates(filter, seed, 1)
            .await?
            .into_iter()
            .next())
    }

    /// Up to `max` distinct tracks in draw order.
    ///
    /// The first equals what [`select`](Self::select) returns.
    pub async fn select_candidates(
        &self,
        filter: Option<&TrackFilter>,
        seed: u64,
        max: usize,
    ) -> CatalogResult<Vec<Selection>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let selections = match filter.filter(|f| !f.is_empty()) {
            None => self.draw_by_id(seed, max).await?,
            Some(filter) => self.draw_by_offset(filter, seed, max).await?,
        };

        debug!(
            seed,
            picked = ?selections.iter().map(|s| s.track.id).collect::<Vec<_>>(),
            "Selected audio candidates"
        );
        Ok(selections)
    }

    /// Rejection sampling over the id range: every probe is a primary-key lookup.
    ///
    /// Ids that miss (deleted rows) are redrawn from the same generator. A catalog whose
    /// ids are too sparse to hit within the attempt budget is drawn by offset instead.
    async fn draw_by_id(&self, seed: u64, max: usize) -> CatalogResult<Vec<Selection>> {
        let Some((min_id, max_id)) = self.repo.id_range().await? else {
            debug!("No tracks available for selection");
            return Ok(Vec::new());
        };

        let span = (i128::from(max_id) - i128::from(min_id) + 1).max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tried = HashSet::new();
        let mut selections = Vec::with_capacity(max);

        for _ in 0..max.saturating_mul(DRAW_ATTEMPTS_PER_PICK) {
            if selections.len() == max || tried.len() as i128 >= span {
                return Ok(selections);
            }
            let id = rng.random_range(min_id..=max_id);
            if !tried.insert(id) {
                continue;
            }
            if let Some(track) = self.repo.get(id).await? {
                let token = RandomizationToken::new(&track, seed);
                selections.push(Selection { track, token });
            }
        }

        if selections.len() == max {
            return Ok(selections);
        }
        warn!(min_id, max_id, hits = selections.len(), "Catalog ids too sparse, drawing by offset");
        self.draw_by_offset(&TrackFilter::default(), seed, max).await
    }

    /// Uniform offsets into the filtered subset in id order.
    async fn draw_by_offset(
        &self,
        filter: &TrackFilter,
        seed: u64,
        max: usize,
    ) -> CatalogResult<Vec<Selection>> {
        let total = self.repo.count(filter).await?;
        if total == 0 {
            debug!("No tracks match the filter");
            return Ok(Vec::new());
        }

        let total = usize::try_from(total).unwrap_or(usize::MAX);
        let mut rng = StdRng::seed_from_u64(seed);
        let offsets = rand::seq::index::sample(&mut rng, total, max.min(total));

        let mut selections = Vec::with_capacity(offsets.len());
        for offset in offsets.iter() {
            match self.repo.nth(filter, offset as u64).await? {
                Some(track) => {
                    let token = RandomizationToken::new(&track, seed);
                    selections.push(Selection { track, token });
                }
                // Catalog shrank between count and lookup.
                None => warn!(offset, total, "Catalog row vanished during selection"),
            }
        }
        Ok(selections)
    }
}
