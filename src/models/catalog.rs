//! Catalog entities produced by the bulk ingestion pipeline.
//!
//! Every row carries a `natural_key` (the source dump's stable numeric id)
//! so the buffer workers can deduplicate and upsert without a round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Artist {
    pub id: Uuid,
    pub natural_key: i64,
    pub name: String,
    pub real_name: Option<String>,
    pub profile: Option<String>,
    pub data_quality: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Label {
    pub id: Uuid,
    pub natural_key: i64,
    pub name: String,
    pub contact_info: Option<String>,
    pub profile: Option<String>,
    pub parent_label_key: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// `type` in the §3 `(nameLower, type)` invariant: genres and styles share one
/// table, distinguished by this tag, never mixed in the uniqueness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum GenreKind {
    Genre,
    Style,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Genre {
    pub id: Uuid,
    /// Proper-cased display name as it appeared in the dump.
    pub name: String,
    /// Normalization key: `name` lowercased and trimmed. Dedup/uniqueness key
    /// together with `kind`.
    pub name_lower: String,
    pub kind: GenreKind,
}

impl Genre {
    pub fn new(name: impl Into<String>, kind: GenreKind) -> Self {
        let name = name.into();
        let name_lower = name.trim().to_lowercase();
        Self {
            id: Uuid::new_v4(),
            name,
            name_lower,
            kind,
        }
    }

    pub fn natural_key(&self) -> (String, GenreKind) {
        (self.name_lower.clone(), self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ImageableKind {
    Artist,
    Master,
    Release,
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Image {
    pub id: Uuid,
    pub imageable_external_id: i64,
    pub imageable_kind: ImageableKind,
    pub url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl Image {
    pub fn natural_key(&self) -> (i64, ImageableKind, &str) {
        (self.imageable_external_id, self.imageable_kind, &self.url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Master {
    pub id: Uuid,
    pub natural_key: i64,
    pub title: String,
    pub year: Option<i32>,
    pub main_release_key: Option<i64>,
    pub data_quality: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Release {
    pub id: Uuid,
    pub natural_key: i64,
    pub title: String,
    pub master_key: Option<i64>,
    pub country: Option<String>,
    pub released: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Many-to-many association row emitted by the association workers, kept
/// separate from the primary entity rows so the ingest orchestrator can
/// close those channels only after every referenced master/artist has
/// already been flushed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MasterArtist {
    pub master_key: i64,
    pub artist_key: i64,
    pub role: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MasterGenre {
    pub master_key: i64,
    pub genre_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::company::en::CompanyName;
    use fake::Fake;

    #[test]
    fn genre_natural_key_normalizes_case_and_whitespace() {
        let a = Genre::new("  Deep House ", GenreKind::Style);
        let b = Genre::new("deep house", GenreKind::Style);
        assert_eq!(a.natural_key(), b.natural_key());

        let as_genre = Genre::new("Deep House", GenreKind::Genre);
        assert_ne!(a.natural_key(), as_genre.natural_key());
    }

    #[test]
    fn genre_natural_key_is_stable_for_random_display_names() {
        for _ in 0..20 {
            let name: String = CompanyName().fake();
            let shouted = Genre::new(name.to_uppercase(), GenreKind::Genre);
            let quiet = Genre::new(name.to_lowercase(), GenreKind::Genre);
            assert_eq!(shouted.natural_key(), quiet.natural_key());
        }
    }
}
