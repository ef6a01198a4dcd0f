use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A scan of a tag the directory could not resolve, kept for admin review.
///
/// Repeat sightings inside the cooldown window bump `last_seen` and `hits`
/// on the same row instead of appending a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct UnknownTagEvent {
    #[schema(example = 7)]
    pub id: u64,

    #[schema(example = "UNKNOWN123")]
    pub tag: String,

    /// Block of the first sighting in this window.
    #[schema(example = "A1")]
    pub block: String,

    #[schema(example = "2026-01-05T10:00:00Z", value_type = String, format = "date-time")]
    pub first_seen: DateTime<Utc>,

    #[schema(example = "2026-01-05T10:04:00Z", value_type = String, format = "date-time")]
    pub last_seen: DateTime<Utc>,

    #[schema(example = 3)]
    pub hits: u32,
}
