//! Post-commit catalog enrichment (§4.7 T4 step 3): extracts the artists,
//! labels, genres, masters and minimal release rows embedded in each
//! collection item's `basic_information` blob and upserts them through the
//! same batch APIs the bulk ingestion pipeline uses. Best-effort: a
//! malformed or sparse payload just yields fewer rows, never an error.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Artist, Genre, GenreKind, Label, Master, MasterArtist, MasterGenre, Release};
use crate::store;

#[derive(Default)]
struct Extracted {
    releases: HashMap<i64, Release>,
    masters: HashMap<i64, Master>,
    labels: HashMap<i64, Label>,
    artists: HashMap<i64, Artist>,
    genres: HashMap<(String, GenreKind), Genre>,
    master_artists: HashMap<(i64, i64), MasterArtist>,
    master_genres: HashMap<(i64, String), MasterGenre>,
}

fn stub_artist(natural_key: i64, name: &str) -> Artist {
    Artist {
        id: Uuid::new_v4(),
        natural_key,
        name: name.to_string(),
        real_name: None,
        profile: None,
        data_quality: None,
        updated_at: Utc::now(),
    }
}

fn extract_one(info: &serde_json::Value, out: &mut Extracted) {
    let Some(release_key) = info.get("id").and_then(|v| v.as_i64()) else {
        return;
    };
    let title = info.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let master_key = info.get("master_id").and_then(|v| v.as_i64()).filter(|&id| id > 0);
    let year = info
        .get("year")
        .and_then(|v| v.as_i64())
        .map(|y| y as i32)
        .filter(|&y| y > 0);

    out.releases.entry(release_key).or_insert(Release {
        id: Uuid::new_v4(),
        natural_key: release_key,
        title: title.clone(),
        master_key,
        country: None,
        released: year.map(|y| y.to_string()),
        status: None,
        notes: None,
        updated_at: Utc::now(),
    });

    if let Some(master_key) = master_key {
        out.masters.entry(master_key).or_insert(Master {
            id: Uuid::new_v4(),
            natural_key: master_key,
            title: title.clone(),
            year,
            main_release_key: Some(release_key),
            data_quality: None,
            updated_at: Utc::now(),
        });
    }

    if let Some(labels) = info.get("labels").and_then(|v| v.as_array()) {
        for label in labels {
            let Some(label_key) = label.get("id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let name = label.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            out.labels.entry(label_key).or_insert(Label {
                id: Uuid::new_v4(),
                natural_key: label_key,
                name,
                contact_info: None,
                profile: None,
                parent_label_key: None,
                updated_at: Utc::now(),
            });
        }
    }

    if let Some(artists) = info.get("artists").and_then(|v| v.as_array()) {
        for artist in artists {
            let Some(artist_key) = artist.get("id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let name = artist.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            out.artists.entry(artist_key).or_insert_with(|| stub_artist(artist_key, &name));

            if let Some(master_key) = master_key {
                let role = artist
                    .get("role")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                out.master_artists.entry((master_key, artist_key)).or_insert(MasterArtist {
                    master_key,
                    artist_key,
                    role,
                    position: None,
                });
            }
        }
    }

    let genre_names = info
        .get("genres")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(|name| (name, GenreKind::Genre))
        .chain(
            info.get("styles")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
                .map(|name| (name, GenreKind::Style)),
        );

    for (name, kind) in genre_names {
        let genre = Genre::new(name, kind);
        if let Some(master_key) = master_key {
            out.master_genres
                .entry((master_key, genre.name.clone()))
                .or_insert(MasterGenre {
                    master_key,
                    genre_name: genre.name.clone(),
                });
        }
        out.genres.entry(genre.natural_key()).or_insert(genre);
    }
}

/// Walks every merged collection item's raw `basic_information` payload,
/// extracts the entities and joins it carries, and upserts them. Each entity
/// kind is flushed independently and a failure on one kind is logged and
/// skipped rather than aborting the rest — this runs after the differential
/// commit has already succeeded, so nothing here can roll that back.
pub async fn extract_and_upsert(pool: &PgPool, original_releases: &HashMap<i64, serde_json::Value>) {
    let mut extracted = Extracted::default();
    for raw in original_releases.values() {
        if let Some(info) = raw.get("basic_information") {
            extract_one(info, &mut extracted);
        }
    }

    if !extracted.releases.is_empty() {
        let rows: Vec<Release> = extracted.releases.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::upsert_releases(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit release extraction upsert failed");
        }
    }
    if !extracted.masters.is_empty() {
        let rows: Vec<Master> = extracted.masters.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::upsert_masters(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit master extraction upsert failed");
        }
    }
    if !extracted.labels.is_empty() {
        let rows: Vec<Label> = extracted.labels.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::upsert_labels(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit label extraction upsert failed");
        }
    }
    if !extracted.artists.is_empty() {
        let rows: Vec<Artist> = extracted.artists.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::upsert_artists(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit artist extraction upsert failed");
        }
    }
    if !extracted.genres.is_empty() {
        let rows: Vec<Genre> = extracted.genres.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::upsert_genres(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit genre extraction upsert failed");
        }
    }
    // Associations reference masters and artists by natural key, so these
    // run last, after both sides have already been upserted above.
    if !extracted.master_artists.is_empty() {
        let rows: Vec<MasterArtist> = extracted.master_artists.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::insert_master_artists(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit master_artist extraction upsert failed");
        }
    }
    if !extracted.master_genres.is_empty() {
        let rows: Vec<MasterGenre> = extracted.master_genres.into_values().collect();
        let count = rows.len();
        if let Err(e) = store::catalog::reconcile_master_genres(pool, &rows).await {
            tracing::warn!(error = %e, count, "post-commit master_genre extraction upsert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_basic_information() -> serde_json::Value {
        serde_json::json!({
            "basic_information": {
                "id": 555,
                "master_id": 42,
                "title": "Test Pressing",
                "year": 1979,
                "labels": [{"id": 7, "name": "Test Label", "catno": "TL-001"}],
                "artists": [{"id": 9, "name": "Test Artist", "role": "Main"}],
                "genres": ["Rock"],
                "styles": ["Prog Rock"],
            }
        })
    }

    #[test]
    fn extracts_release_master_label_artist_and_genres() {
        let mut out = Extracted::default();
        extract_one(&sample_basic_information()["basic_information"], &mut out);

        assert_eq!(out.releases.len(), 1);
        assert_eq!(out.masters.len(), 1);
        assert_eq!(out.labels.len(), 1);
        assert_eq!(out.artists.len(), 1);
        assert_eq!(out.genres.len(), 2);
        assert_eq!(out.master_artists.len(), 1);
        assert_eq!(out.master_genres.len(), 2);

        let master_artist = out.master_artists.get(&(42, 9)).unwrap();
        assert_eq!(master_artist.role.as_deref(), Some("Main"));
    }

    #[test]
    fn skips_release_with_no_id() {
        let mut out = Extracted::default();
        extract_one(&serde_json::json!({"title": "No id here"}), &mut out);
        assert!(out.releases.is_empty());
    }

    #[test]
    fn masterless_release_skips_association_rows() {
        let mut out = Extracted::default();
        extract_one(
            &serde_json::json!({
                "id": 1,
                "title": "No master",
                "artists": [{"id": 2, "name": "Solo Artist"}],
                "genres": ["Jazz"],
            }),
            &mut out,
        );
        assert_eq!(out.releases.len(), 1);
        assert!(out.masters.is_empty());
        assert!(out.master_artists.is_empty());
        assert!(out.master_genres.is_empty());
        assert_eq!(out.artists.len(), 1);
        assert_eq!(out.genres.len(), 1);
    }
}
