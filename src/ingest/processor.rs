//! Entity Processor (§4.3): pure fan-out from a parsed [`XmlNode`] onto the
//! per-kind channels. Holds no aggregation state of its own — every bit of
//! bookkeeping (dedup, thresholds) lives in the buffer workers downstream.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::MetricsCollector;
use crate::models::{
    Artist, DumpKind, Genre, GenreKind, Image, ImageableKind, Label, Master, MasterArtist, Release,
};

use super::raw::{self, XmlNode};

/// The full set of channels a processing run fans records out onto. Built
/// once per ingestion run (§4.6 step 2) and shared across all four dump
/// files so cross-file references (a release naming an artist not present
/// in `artists.xml`) still materialize a row.
pub struct EntityChannels {
    pub artist: mpsc::Sender<Artist>,
    pub label: mpsc::Sender<Label>,
    pub master: mpsc::Sender<Master>,
    pub release: mpsc::Sender<Release>,
    pub image: mpsc::Sender<Image>,
    pub genre: mpsc::Sender<Genre>,
    pub master_artist: mpsc::Sender<MasterArtist>,
    pub master_genre: mpsc::Sender<(i64, String)>,
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

async fn push_images(channels: &EntityChannels, kind: ImageableKind, external_id: i64, images: Vec<raw::RawImage>) {
    for image in images {
        // A send error here means the worker side has already shut down
        // (cancellation or a fatal store error upstream); nothing further to
        // do but stop pushing onto a channel nobody is receiving from.
        if channels
            .image
            .send(Image {
                id: Uuid::new_v4(),
                imageable_external_id: external_id,
                imageable_kind: kind,
                url: image.url,
                width: image.width,
                height: image.height,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn push_genres(channels: &EntityChannels, master_key: Option<i64>, genres: Vec<(String, bool)>) {
    for (name, is_style) in genres {
        let kind = if is_style { GenreKind::Style } else { GenreKind::Genre };
        if channels.genre.send(Genre::new(&name, kind)).await.is_err() {
            return;
        }
        if let Some(master_key) = master_key {
            if channels.master_genre.send((master_key, name)).await.is_err() {
                return;
            }
        }
    }
}

/// Processes one decoded element according to which dump file it came from,
/// emitting onto `channels`. Every emit awaits `Sender::send`, so a full
/// downstream channel backpressures this call (and transitively the decoder
/// that drives it) instead of dropping the record (§5: bounded channels
/// provide backpressure, not a license to discard).
pub async fn process_node(kind: DumpKind, node: &XmlNode, channels: &EntityChannels, metrics: &Arc<MetricsCollector>) {
    match kind {
        DumpKind::Artists => {
            let Some(artist) = raw::parse_artist(node) else {
                metrics.record_ingest_parse_error("artist");
                return;
            };
            push_images(channels, ImageableKind::Artist, artist.natural_key, artist.images.clone()).await;
            let natural_key = artist.natural_key;
            if channels
                .artist
                .send(Artist {
                    id: Uuid::new_v4(),
                    natural_key,
                    name: artist.name,
                    real_name: artist.real_name,
                    profile: artist.profile,
                    data_quality: artist.data_quality,
                    updated_at: Utc::now(),
                })
                .await
                .is_ok()
            {
                metrics.record_ingest_entity("artist", 1);
            }
        }
        DumpKind::Labels => {
            let Some(label) = raw::parse_label(node) else {
                metrics.record_ingest_parse_error("label");
                return;
            };
            push_images(channels, ImageableKind::Label, label.natural_key, label.images.clone()).await;
            if channels
                .label
                .send(Label {
                    id: Uuid::new_v4(),
                    natural_key: label.natural_key,
                    name: label.name,
                    contact_info: label.contact_info,
                    profile: label.profile,
                    parent_label_key: label.parent_label_key,
                    updated_at: Utc::now(),
                })
                .await
                .is_ok()
            {
                metrics.record_ingest_entity("label", 1);
            }
        }
        DumpKind::Masters => {
            let Some(master) = raw::parse_master(node) else {
                metrics.record_ingest_parse_error("master");
                return;
            };
            push_images(channels, ImageableKind::Master, master.natural_key, master.images.clone()).await;
            push_genres(channels, Some(master.natural_key), master.genres.clone()).await;
            for (artist_key, name, role, position) in &master.artist_refs {
                if channels.artist.send(stub_artist(*artist_key, name)).await.is_err() {
                    return;
                }
                if channels
                    .master_artist
                    .send(MasterArtist {
                        master_key: master.natural_key,
                        artist_key: *artist_key,
                        role: role.clone(),
                        position: *position,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if channels
                .master
                .send(Master {
                    id: Uuid::new_v4(),
                    natural_key: master.natural_key,
                    title: master.title,
                    year: master.year,
                    main_release_key: master.main_release_key,
                    data_quality: master.data_quality,
                    updated_at: Utc::now(),
                })
                .await
                .is_ok()
            {
                metrics.record_ingest_entity("master", 1);
            }
        }
        DumpKind::Releases => {
            let Some(release) = raw::parse_release(node) else {
                metrics.record_ingest_parse_error("release");
                return;
            };
            push_images(channels, ImageableKind::Release, release.natural_key, release.images.clone()).await;
            push_genres(channels, None, release.genres.clone()).await;
            for (artist_key, name) in &release.artist_refs {
                if channels.artist.send(stub_artist(*artist_key, name)).await.is_err() {
                    return;
                }
            }
            if channels
                .release
                .send(Release {
                    id: Uuid::new_v4(),
                    natural_key: release.natural_key,
                    title: release.title,
                    master_key: release.master_key,
                    country: release.country,
                    released: release.released,
                    status: release.status,
                    notes: release.notes,
                    updated_at: Utc::now(),
                })
                .await
                .is_ok()
            {
                metrics.record_ingest_entity("release", 1);
            }
        }
    }
}
