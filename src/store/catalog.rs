//! Batch upsert contract for catalog entities produced by the ingestion
//! buffer workers (§4.4): one `INSERT ... ON CONFLICT DO UPDATE` loop per
//! entity kind, batched inside a single transaction.

use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{Artist, Genre, Image, Label, Master, MasterArtist, MasterGenre, Release};

/// Batch upsert functions report the callers' batch failure via `Result`
/// only; none of the ingestion or sync callers need an insert/update split,
/// so there is no per-row counter to get wrong.
pub async fn upsert_artists(pool: &PgPool, rows: &[Artist]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for artist in rows {
        sqlx::query(
            r#"
            INSERT INTO artists (id, natural_key, name, real_name, profile, data_quality, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (natural_key) DO UPDATE SET
                name = EXCLUDED.name,
                real_name = EXCLUDED.real_name,
                profile = EXCLUDED.profile,
                data_quality = EXCLUDED.data_quality,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(artist.id)
        .bind(artist.natural_key)
        .bind(&artist.name)
        .bind(&artist.real_name)
        .bind(&artist.profile)
        .bind(&artist.data_quality)
        .bind(artist.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("artists", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("artists", e))?;
    Ok(())
}

pub async fn upsert_labels(pool: &PgPool, rows: &[Label]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for label in rows {
        sqlx::query(
            r#"
            INSERT INTO labels (id, natural_key, name, contact_info, profile, parent_label_key, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (natural_key) DO UPDATE SET
                name = EXCLUDED.name,
                contact_info = EXCLUDED.contact_info,
                profile = EXCLUDED.profile,
                parent_label_key = EXCLUDED.parent_label_key,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(label.id)
        .bind(label.natural_key)
        .bind(&label.name)
        .bind(&label.contact_info)
        .bind(&label.profile)
        .bind(label.parent_label_key)
        .bind(label.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("labels", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("labels", e))?;
    Ok(())
}

pub async fn upsert_masters(pool: &PgPool, rows: &[Master]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for master in rows {
        sqlx::query(
            r#"
            INSERT INTO masters (id, natural_key, title, year, main_release_key, data_quality, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (natural_key) DO UPDATE SET
                title = EXCLUDED.title,
                year = EXCLUDED.year,
                main_release_key = EXCLUDED.main_release_key,
                data_quality = EXCLUDED.data_quality,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(master.id)
        .bind(master.natural_key)
        .bind(&master.title)
        .bind(master.year)
        .bind(master.main_release_key)
        .bind(&master.data_quality)
        .bind(master.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("masters", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("masters", e))?;
    Ok(())
}

pub async fn upsert_releases(pool: &PgPool, rows: &[Release]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for release in rows {
        sqlx::query(
            r#"
            INSERT INTO releases (id, natural_key, title, master_key, country, released, status, notes, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (natural_key) DO UPDATE SET
                title = EXCLUDED.title,
                master_key = EXCLUDED.master_key,
                country = EXCLUDED.country,
                released = EXCLUDED.released,
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(release.id)
        .bind(release.natural_key)
        .bind(&release.title)
        .bind(release.master_key)
        .bind(&release.country)
        .bind(&release.released)
        .bind(&release.status)
        .bind(&release.notes)
        .bind(release.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("releases", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("releases", e))?;
    Ok(())
}

pub async fn upsert_genres(pool: &PgPool, rows: &[Genre]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for genre in rows {
        sqlx::query(
            r#"
            INSERT INTO genres (id, name, name_lower, kind)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name_lower, kind) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(genre.id)
        .bind(&genre.name)
        .bind(&genre.name_lower)
        .bind(genre.kind)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("genres", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("genres", e))?;
    Ok(())
}

pub async fn upsert_images(pool: &PgPool, rows: &[Image]) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for image in rows {
        sqlx::query(
            r#"
            INSERT INTO images (id, imageable_external_id, imageable_kind, url, width, height)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (imageable_external_id, imageable_kind, url) DO UPDATE SET
                width = EXCLUDED.width,
                height = EXCLUDED.height
            "#,
        )
        .bind(image.id)
        .bind(image.imageable_external_id)
        .bind(image.imageable_kind)
        .bind(&image.url)
        .bind(image.width)
        .bind(image.height)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("images", e))?;
    }
    tx.commit().await.map_err(|e| AppError::store_batch("images", e))?;
    Ok(())
}

/// Insert-ignore-duplicates on the composite key, per §4.5's MasterArtist worker.
pub async fn insert_master_artists(pool: &PgPool, rows: &[MasterArtist]) -> Result<u64, AppError> {
    let mut written = 0u64;
    let mut tx = pool.begin().await?;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO master_artists (master_key, artist_key, role, position)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (master_key, artist_key) DO NOTHING
            "#,
        )
        .bind(row.master_key)
        .bind(row.artist_key)
        .bind(&row.role)
        .bind(row.position)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("master_artists", e))?;
        written += result.rows_affected();
    }
    tx.commit()
        .await
        .map_err(|e| AppError::store_batch("master_artists", e))?;
    Ok(written)
}

/// Reconciles the master/genre join table for one flush batch: inserts every
/// `(masterKey, genreName)` pair missing from the table, leaves existing rows
/// untouched, per §4.5's MasterGenre worker contract.
pub async fn reconcile_master_genres(pool: &PgPool, rows: &[MasterGenre]) -> Result<u64, AppError> {
    let mut written = 0u64;
    let mut tx = pool.begin().await?;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO master_genres (master_key, genre_name)
            VALUES ($1, $2)
            ON CONFLICT (master_key, genre_name) DO NOTHING
            "#,
        )
        .bind(row.master_key)
        .bind(&row.genre_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::store_batch("master_genres", e))?;
        written += result.rows_affected();
    }
    tx.commit()
        .await
        .map_err(|e| AppError::store_batch("master_genres", e))?;
    Ok(written)
}

