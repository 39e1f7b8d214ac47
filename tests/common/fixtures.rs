//! Reference catalog construction
//!
//! The catalog is built through the public write path, so ids follow
//! insertion order: artists first, then songs in `ALL_SONGS` order.

use super::constants::*;
use muze_kb::knowledge_base::{
    AudioFeatures, KnowledgeBase, NameMatching, NewSong, RelationType, SqliteKnowledgeBase,
};
use muze_kb::recommend::{AdjectiveTable, CandidateOrder, RecommendationEngine};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A knowledge base in a temporary directory.
pub struct TestKb {
    pub kb: Arc<SqliteKnowledgeBase>,
    pub db_path: PathBuf,
    _dir: TempDir,
}

impl TestKb {
    /// An empty knowledge base.
    pub fn empty() -> Self {
        Self::empty_with(NameMatching::Exact)
    }

    pub fn empty_with(matching: NameMatching) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("kb.db");
        let kb = Arc::new(SqliteKnowledgeBase::new(&db_path, 2, matching).unwrap());
        TestKb {
            kb,
            db_path,
            _dir: dir,
        }
    }

    /// The reference catalog: four artists, five songs, two genres.
    pub fn reference() -> Self {
        let test_kb = Self::empty();
        populate_reference_catalog(test_kb.kb.as_ref());
        test_kb
    }

    pub fn engine(&self) -> RecommendationEngine {
        self.engine_with(CandidateOrder::Insertion, 1, 42)
    }

    pub fn engine_with(&self, order: CandidateOrder, max_hops: usize, seed: u64) -> RecommendationEngine {
        RecommendationEngine::new(
            self.kb.clone(),
            Arc::new(AdjectiveTable::standard()),
            StdRng::seed_from_u64(seed),
        )
        .with_candidate_order(order)
        .with_max_hops(max_hops)
    }
}

fn song(
    duration_ms: i64,
    popularity: i64,
    valence: f64,
    acousticness: f64,
    danceability: f64,
) -> NewSong {
    NewSong {
        duration_ms: Some(duration_ms),
        popularity: Some(popularity),
        spotify_uri: None,
        audio_features: AudioFeatures {
            valence: Some(valence),
            acousticness: Some(acousticness),
            danceability: Some(danceability),
            ..Default::default()
        },
    }
}

fn with_uri(mut song: NewSong, uri: &str) -> NewSong {
    song.spotify_uri = Some(uri.to_string());
    song
}

pub fn populate_reference_catalog(kb: &dyn KnowledgeBase) {
    kb.add_artist(
        JUSTIN_BIEBER,
        &[POP.to_string(), SUPER_POP.to_string()],
        Some(JUSTIN_BIEBER_FOLLOWERS),
    )
    .unwrap();
    kb.add_artist(JUSTIN_TIMBERLAKE, &[POP.to_string()], None)
        .unwrap();
    kb.add_artist(U2, &[], None).unwrap();
    kb.add_artist(SHAWN_MENDES, &[], None).unwrap();

    kb.add_song(
        DESPACITO,
        JUSTIN_BIEBER,
        &with_uri(
            song(DESPACITO_DURATION_MS, DESPACITO_POPULARITY, 0.8, 0.2, 0.7),
            "spotify:track:despacito",
        ),
    )
    .unwrap();
    kb.add_song(
        ROCK_YOUR_BODY,
        JUSTIN_TIMBERLAKE,
        &with_uri(song(444_444, 30, 0.9, 0.05, 0.9), "spotify:track:rockyourbody"),
    )
    .unwrap();
    kb.add_song(BEAUTIFUL_DAY, U2, &song(555_555, 60, 0.5, 0.3, 0.5))
        .unwrap();
    kb.add_song(
        IN_MY_BLOOD,
        SHAWN_MENDES,
        &with_uri(song(666_666, 70, 0.2, 0.6, 0.4), "spotify:track:inmyblood"),
    )
    .unwrap();
    kb.add_song(
        SORRY,
        JUSTIN_BIEBER,
        &with_uri(
            song(333_333, SORRY_POPULARITY, 0.4, 0.1, 0.6),
            "spotify:track:sorry",
        ),
    )
    .unwrap();

    kb.connect(JUSTIN_BIEBER, JUSTIN_TIMBERLAKE, &RelationType::SimilarTo, 80)
        .unwrap();
    kb.connect(JUSTIN_BIEBER, SHAWN_MENDES, &RelationType::SimilarTo, 60)
        .unwrap();
    kb.connect(DESPACITO, ROCK_YOUR_BODY, &RelationType::SimilarTo, 50)
        .unwrap();
}

/// Path of the JSON seed describing the reference catalog.
pub fn reference_seed_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/reference_seed.json")
}
