//! JSON seed files.
//!
//! A seed file lists artists, songs and extra edges. Importing runs every item
//! through the regular write path, so the same validation applies; items that
//! are rejected are logged and counted, and only storage failures abort.

use crate::knowledge_base::{AudioFeatures, KbError, KnowledgeBase, NewSong, RelationType};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Score of the "similar to" edges created from an artist's `similar_to` list.
pub const SIMILAR_ARTIST_SCORE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub artists: Vec<SeedArtist>,
    pub songs: Vec<SeedSong>,
    pub edges: Vec<SeedEdge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedArtist {
    pub name: String,
    pub genres: Vec<String>,
    #[serde(alias = "num_spotify_followers")]
    pub num_followers: Option<i64>,
    /// Connected in both directions.
    pub similar_to: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedSong {
    pub name: String,
    pub artist: String,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub spotify_uri: Option<String>,
    pub audio_features: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SeedEdge {
    pub source: String,
    pub dest: String,
    #[serde(default)]
    pub relation: RelationType,
    pub score: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub artists_imported: usize,
    pub songs_imported: usize,
    pub edges_imported: usize,
    pub errors: usize,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file: {:?}", path))
    }
}

impl SeedSong {
    fn to_new_song(&self) -> Result<NewSong, KbError> {
        Ok(NewSong {
            duration_ms: self.duration_ms,
            popularity: self.popularity,
            spotify_uri: self.spotify_uri.clone(),
            audio_features: AudioFeatures::from_raw(&self.audio_features)?,
        })
    }
}

/// Count a rejected item, or abort on a storage failure.
fn record_failure(stats: &mut ImportStats, what: &str, e: KbError) -> Result<()> {
    if e.is_storage() {
        return Err(e).with_context(|| format!("Storage failure while importing {}", what));
    }
    error!("Failed to import {}: {}", what, e);
    stats.errors += 1;
    Ok(())
}

/// Connect `source` to `dest`, treating an existing edge as success.
fn connect_once(
    kb: &dyn KnowledgeBase,
    source: &str,
    dest: &str,
    relation: &RelationType,
    score: i64,
) -> Result<bool, KbError> {
    match kb.connect(source, dest, relation, score) {
        Ok(()) => Ok(true),
        Err(KbError::DuplicateEdge { .. }) => {
            debug!("Edge '{}' -[{}]-> '{}' already present", source, relation, dest);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

pub fn import_seed(kb: &dyn KnowledgeBase, seed: &SeedFile) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    info!("Importing {} artists...", seed.artists.len());
    for artist in &seed.artists {
        match kb.add_artist(&artist.name, &artist.genres, artist.num_followers) {
            Ok(_) => stats.artists_imported += 1,
            Err(e) => record_failure(&mut stats, &format!("artist '{}'", artist.name), e)?,
        }
    }

    // every artist exists by now, so similar_to may point forward in the file
    for artist in &seed.artists {
        for other in &artist.similar_to {
            for (source, dest) in [(&artist.name, other), (other, &artist.name)] {
                match connect_once(kb, source, dest, &RelationType::SimilarTo, SIMILAR_ARTIST_SCORE) {
                    Ok(true) => stats.edges_imported += 1,
                    Ok(false) => {}
                    Err(e) => record_failure(
                        &mut stats,
                        &format!("similarity '{}' -> '{}'", source, dest),
                        e,
                    )?,
                }
            }
        }
    }

    info!("Importing {} songs...", seed.songs.len());
    for song in &seed.songs {
        let result = song
            .to_new_song()
            .and_then(|new_song| kb.add_song(&song.name, &song.artist, &new_song));
        match result {
            Ok(_) => stats.songs_imported += 1,
            Err(e) => record_failure(
                &mut stats,
                &format!("song '{}' by '{}'", song.name, song.artist),
                e,
            )?,
        }
    }

    info!("Importing {} edges...", seed.edges.len());
    for edge in &seed.edges {
        match kb.connect(&edge.source, &edge.dest, &edge.relation, edge.score) {
            Ok(()) => stats.edges_imported += 1,
            Err(e) => record_failure(
                &mut stats,
                &format!("edge '{}' -> '{}'", edge.source, edge.dest),
                e,
            )?,
        }
    }

    info!(
        "Import done: {} artists, {} songs, {} edges",
        stats.artists_imported, stats.songs_imported, stats.edges_imported
    );
    if stats.errors > 0 {
        warn!("Errors encountered: {}", stats.errors);
    }
    Ok(stats)
}
