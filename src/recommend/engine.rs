//! Recommendation traversal over the knowledge graph.
//!
//! Candidates are searched tier by tier: first the songs of the reference
//! song's artist, then the songs of artists reached over "similar to" edges,
//! one hop at a time, each artist visited at most once.

use super::adjectives::{Adjective, AdjectiveTable};
use crate::knowledge_base::{
    Candidate, EntityId, EntityType, KbResult, KnowledgeBase, RelationType, SongRecord,
};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Order in which the songs of one tier are tested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrder {
    #[default]
    Insertion,
    Shuffled,
}

impl FromStr for CandidateOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insertion" => Ok(CandidateOrder::Insertion),
            "shuffled" => Ok(CandidateOrder::Shuffled),
            other => Err(format!("unknown candidate order '{}'", other)),
        }
    }
}

/// Picks the reference song when a name matches several.
///
/// The lowest id wins, i.e. the earliest inserted song.
pub struct FirstMatchPolicy;

impl FirstMatchPolicy {
    pub fn pick<'a>(name: &str, matches: &'a [SongRecord]) -> Option<&'a SongRecord> {
        let first = matches.iter().min_by_key(|s| s.id)?;
        if matches.len() > 1 {
            warn!(
                "'{}' matches {} songs, using id {} by {}",
                name,
                matches.len(),
                first.id,
                first.artist_name.as_deref().unwrap_or("unknown artist")
            );
        }
        Some(first)
    }
}

pub struct RecommendationEngine {
    kb: Arc<dyn KnowledgeBase>,
    adjectives: Arc<AdjectiveTable>,
    order: CandidateOrder,
    max_hops: usize,
    rng: Mutex<StdRng>,
}

impl RecommendationEngine {
    pub fn new(kb: Arc<dyn KnowledgeBase>, adjectives: Arc<AdjectiveTable>, rng: StdRng) -> Self {
        RecommendationEngine {
            kb,
            adjectives,
            order: CandidateOrder::default(),
            max_hops: 1,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_candidate_order(mut self, order: CandidateOrder) -> Self {
        self.order = order;
        self
    }

    /// Number of "similar to" hops searched beyond the reference artist.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn adjectives(&self) -> &AdjectiveTable {
        &self.adjectives
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether song `a` is `adjective` than song `b`.
    ///
    /// Unknown adjectives, unknown ids and missing attribute values all
    /// compare as false and are logged as warnings. Traversal uses
    /// `compare_records`, which logs misses at debug level only.
    pub fn compare(&self, a: EntityId, b: EntityId, adjective: &str) -> KbResult<bool> {
        let Some(adj) = self.adjectives.get(adjective) else {
            warn!("Unknown adjective '{}'", adjective);
            return Ok(false);
        };
        let Some(song_a) = self.kb.song_by_id(a)? else {
            warn!("No song with id {} to compare", a);
            return Ok(false);
        };
        let Some(song_b) = self.kb.song_by_id(b)? else {
            warn!("No song with id {} to compare", b);
            return Ok(false);
        };
        match (adj.attribute.value(&song_a), adj.attribute.value(&song_b)) {
            (Some(va), Some(vb)) => Ok(adj.comparison.holds(va, vb)),
            _ => {
                warn!(
                    "Cannot compare {} of songs {} and {}: missing value",
                    adj.attribute, a, b
                );
                Ok(false)
            }
        }
    }

    /// First song satisfying `adjective` relative to `song_name`.
    pub fn find_recommendation(
        &self,
        song_name: &str,
        adjective: &str,
    ) -> KbResult<Option<Candidate>> {
        Ok(self
            .find_recommendations(song_name, adjective, 1)?
            .into_iter()
            .next())
    }

    /// Up to `limit` songs satisfying `adjective` relative to `song_name`,
    /// nearest tier first.
    pub fn find_recommendations(
        &self,
        song_name: &str,
        adjective: &str,
        limit: usize,
    ) -> KbResult<Vec<Candidate>> {
        let mut hits = Vec::new();
        if limit == 0 {
            return Ok(hits);
        }
        let Some(adj) = self.adjectives.get(adjective) else {
            warn!("Unknown adjective '{}'", adjective);
            return Ok(hits);
        };
        let matches = self.kb.song_data(Some(song_name), None)?;
        let Some(reference) = FirstMatchPolicy::pick(song_name, &matches) else {
            info!("No song named '{}'", song_name);
            return Ok(hits);
        };
        let Some(artist_id) = reference.artist_id else {
            info!("Song '{}' has no main artist", song_name);
            return Ok(hits);
        };

        let mut visited = HashSet::from([artist_id]);
        let mut frontier = vec![artist_id];
        for hop in 0..=self.max_hops {
            let mut next = Vec::new();
            for &artist in &frontier {
                let mut candidates = self.kb.songs_of_artist(artist)?;
                self.order_candidates(&mut candidates);
                for candidate in &candidates {
                    if candidate.id == reference.id || !compare_records(&adj, candidate, reference) {
                        continue;
                    }
                    debug!(
                        "'{}' is {} than '{}' (hop {})",
                        candidate.song_name, adjective, reference.song_name, hop
                    );
                    hits.push(Candidate::from(candidate));
                    if hits.len() >= limit {
                        return Ok(hits);
                    }
                }
                if hop < self.max_hops {
                    next.extend(
                        self.related_artists(artist)?
                            .into_iter()
                            .filter(|id| visited.insert(*id)),
                    );
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        if hits.is_empty() {
            info!("No song is {} than '{}'", adjective, song_name);
        }
        Ok(hits)
    }

    /// A song similar to `song_name`.
    ///
    /// Direct song-to-song edges win. Otherwise a related artist with at least
    /// one other song is picked, falling back to the reference artist, and
    /// one of that artist's songs is returned. The reference itself is never
    /// returned.
    pub fn find_similar_song(&self, song_name: &str) -> KbResult<Option<Candidate>> {
        let matches = self.kb.song_data(Some(song_name), None)?;
        let Some(reference) = FirstMatchPolicy::pick(song_name, &matches) else {
            info!("No song named '{}'", song_name);
            return Ok(None);
        };

        let direct: Vec<EntityId> = self
            .kb
            .related_to(reference.id, &RelationType::SimilarTo)?
            .into_iter()
            .filter(|e| e.entity_type == EntityType::Song && e.id != reference.id)
            .map(|e| e.id)
            .collect();
        let picked = direct.choose(&mut *self.rng()).copied();
        if let Some(id) = picked {
            return Ok(self.kb.song_by_id(id)?.as_ref().map(Candidate::from));
        }

        let Some(artist_id) = reference.artist_id else {
            return Ok(None);
        };
        let mut eligible: Vec<Vec<SongRecord>> = Vec::new();
        for related in self.related_artists(artist_id)? {
            let songs = self.other_songs(related, reference.id)?;
            if !songs.is_empty() {
                eligible.push(songs);
            }
        }

        let pool = match eligible.choose(&mut *self.rng()) {
            Some(songs) => songs.clone(),
            None => self.other_songs(artist_id, reference.id)?,
        };
        Ok(pool.choose(&mut *self.rng()).map(Candidate::from))
    }

    pub fn random_song_uri(&self) -> KbResult<Option<String>> {
        self.kb.random_song_uri(&mut *self.rng())
    }

    fn related_artists(&self, artist_id: EntityId) -> KbResult<Vec<EntityId>> {
        Ok(self
            .kb
            .related_to(artist_id, &RelationType::SimilarTo)?
            .into_iter()
            .filter(|e| e.entity_type == EntityType::Artist && e.id != artist_id)
            .map(|e| e.id)
            .collect())
    }

    fn other_songs(&self, artist_id: EntityId, exclude: EntityId) -> KbResult<Vec<SongRecord>> {
        let mut songs = self.kb.songs_of_artist(artist_id)?;
        songs.retain(|s| s.id != exclude);
        Ok(songs)
    }

    fn order_candidates(&self, candidates: &mut [SongRecord]) {
        if self.order == CandidateOrder::Shuffled {
            candidates.shuffle(&mut *self.rng());
        }
    }
}

fn compare_records(adj: &Adjective, a: &SongRecord, b: &SongRecord) -> bool {
    match (adj.attribute.value(a), adj.attribute.value(b)) {
        (Some(va), Some(vb)) => adj.comparison.holds(va, vb),
        _ => {
            debug!(
                "Cannot compare {} of songs {} and {}: missing value",
                adj.attribute, a.id, b.id
            );
            false
        }
    }
}
