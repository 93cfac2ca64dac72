//! PostgreSQL-backed catalog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use vgen_models::{AudioTrack, TrackFilter};

use crate::error::CatalogResult;
use crate::repository::TrackRepository;

const SCHEMA: &str = include_str!("../migrations/0001_create_audio_tracks.sql");

// NULL parameters disable the corresponding predicate. The prefix predicate is a
// left-anchored LIKE so it can use the text_pattern_ops index on name.
const FILTER_CLAUSE: &str = "($1::text IS NULL OR name LIKE $1 || '%') \
     AND ($2::float8 IS NULL OR duration_seconds >= $2) \
     AND ($3::float8 IS NULL OR duration_seconds <= $3)";

const COLUMNS: &str = "id, name, url, duration_seconds::float8 AS duration_seconds, created_at";

#[derive(Debug, sqlx::FromRow)]
struct TrackRow {
    id: i64,
    name: String,
    url: String,
    duration_seconds: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<TrackRow> for AudioTrack {
    fn from(row: TrackRow) -> Self {
        AudioTrack {
            id: row.id,
            name: row.name,
            url: row.url,
            duration_seconds: row.duration_seconds,
            created_at: row.created_at,
        }
    }
}

/// `audio_tracks` table reader.
#[derive(Debug, Clone)]
pub struct PgTrackRepository {
    pool: PgPool,
}

impl PgTrackRepository {
    pub async fn connect(database_url: &str, max_connections: u32) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to catalog database");
        Ok(Self { pool })
    }

    /// Create the table and index if they do not exist.
    pub async fn migrate(&self) -> CatalogResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

/// Escape LIKE metacharacters so a prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl TrackRepository for PgTrackRepository {
    async fn count(&self, filter: &TrackFilter) -> CatalogResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM audio_tracks WHERE {}", FILTER_CLAUSE);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(filter.name_prefix.as_deref().map(like_prefix))
            .bind(filter.min_duration_seconds)
            .bind(filter.max_duration_seconds)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn nth(&self, filter: &TrackFilter, offset: u64) -> CatalogResult<Option<AudioTrack>> {
        let sql = format!(
            "SELECT {} FROM audio_tracks WHERE {} ORDER BY id OFFSET $4 LIMIT 1",
            COLUMNS, FILTER_CLAUSE
        );
        let row: Option<TrackRow> = sqlx::query_as(&sql)
            .bind(filter.name_prefix.as_deref().map(like_prefix))
            .bind(filter.min_duration_seconds)
            .bind(filter.max_duration_seconds)
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AudioTrack::from))
    }

    async fn id_range(&self) -> CatalogResult<Option<(i64, i64)>> {
        // MIN/MAX on the primary key are answered from the index ends.
        let (min, max): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(id), MAX(id) FROM audio_tracks")
                .fetch_one(&self.pool)
                .await?;
        Ok(min.zip(max))
    }

    async fn get(&self, id: i64) -> CatalogResult<Option<AudioTrack>> {
        let sql = format!("SELECT {} FROM audio_tracks WHERE id = $1", COLUMNS);
        let row: Option<TrackRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(AudioTrack::from))
    }

    async fn find_by_name(&self, name: &str) -> CatalogResult<Option<AudioTrack>> {
        let sql = format!(
            "SELECT {} FROM audio_tracks WHERE name = $1 ORDER BY id LIMIT 1",
            COLUMNS
        );
        let row: Option<TrackRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AudioTrack::from))
    }

    async fn ping(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
