//! Audio track catalog for the VGen worker.
//!
//! The catalog is read through the [`TrackRepository`] seam so the selection policy in
//! [`AssetSelector`] can be exercised without a database:
//! - [`PgTrackRepository`] reads the `audio_tracks` table (PostgreSQL via sqlx)
//! - [`InMemoryTrackRepository`] serves a static JSON catalog

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod selector;

pub use error::{CatalogError, CatalogResult};
pub use memory::InMemoryTrackRepository;
pub use postgres::PgTrackRepository;
pub use repository::TrackRepository;
pub use selector::{AssetSelector, Selection, DEFAULT_CANDIDATES};
