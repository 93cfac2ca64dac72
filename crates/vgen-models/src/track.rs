//! Audio catalog tracks and randomization tokens.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

/// A selectable audio track from the catalog.
///
/// Rows are created by catalog ingestion and are read-only to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioTrack {
    /// Unique, auto-assigned identifier.
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Non-negative when present.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AudioTrack {
    pub fn new(id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            duration_seconds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Check the row invariants that the catalog schema also enforces.
    pub fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("track {} has an empty name", self.id));
        }
        if self.url.trim().is_empty() {
            return Err(format!("track {} has an empty url", self.id));
        }
        match self.duration_seconds {
            Some(d) if !d.is_finite() || d < 0.0 => {
                Err(format!("track {} has invalid duration {}", self.id, d))
            }
            _ => Ok(()),
        }
    }
}

/// Optional criteria narrowing the selectable subset of the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[validate(schema(function = "validate_filter"))]
pub struct TrackFilter {
    /// Only tracks whose name starts with this prefix.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub name_prefix: Option<String>,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub min_duration_seconds: Option<f64>,

    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub max_duration_seconds: Option<f64>,
}

fn validate_filter(filter: &TrackFilter) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (filter.min_duration_seconds, filter.max_duration_seconds) {
        if min > max {
            return Err(ValidationError::new("audio_filter")
                .with_message("min_duration_seconds exceeds max_duration_seconds".into()));
        }
    }
    Ok(())
}

impl TrackFilter {
    pub fn is_empty(&self) -> bool {
        self.name_prefix.is_none()
            && self.min_duration_seconds.is_none()
            && self.max_duration_seconds.is_none()
    }

    /// Whether `track` belongs to the filtered subset.
    ///
    /// Tracks without a duration never match a duration bound, which mirrors SQL `NULL`
    /// comparison semantics in the relational catalog.
    pub fn matches(&self, track: &AudioTrack) -> bool {
        if let Some(prefix) = &self.name_prefix {
            if !track.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_duration_seconds {
            match track.duration_seconds {
                Some(d) if d >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_duration_seconds {
            match track.duration_seconds {
                Some(d) if d <= max => {}
                _ => return false,
            }
        }
        true
    }
}

/// Identifies which track a job used and the seed that picked it.
///
/// Rendered as `{track_id}:{seed as 16 hex digits}:{track_name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(into = "String", try_from = "String")]
pub struct RandomizationToken {
    pub track_id: i64,
    pub seed: u64,
    pub track_name: String,
}

impl RandomizationToken {
    pub fn new(track: &AudioTrack, seed: u64) -> Self {
        Self {
            track_id: track.id,
            seed,
            track_name: track.name.clone(),
        }
    }
}

impl fmt::Display for RandomizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}:{}", self.track_id, self.seed, self.track_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid randomization token '{0}'")]
pub struct TokenParseError(pub String);

impl FromStr for RandomizationToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(id), Some(seed), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TokenParseError(s.to_string()));
        };
        let track_id = id.parse().map_err(|_| TokenParseError(s.to_string()))?;
        let seed = u64::from_str_radix(seed, 16).map_err(|_| TokenParseError(s.to_string()))?;
        Ok(Self {
            track_id,
            seed,
            track_name: name.to_string(),
        })
    }
}

impl From<RandomizationToken> for String {
    fn from(token: RandomizationToken) -> Self {
        token.to_string()
    }
}

impl TryFrom<String> for RandomizationToken {
    type Error = TokenParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
