//! KnowledgeBase trait definition.
//!
//! The recommendation engine and the CLI only talk to the graph through this
//! trait, so a store can be shared as `Arc<dyn KnowledgeBase>`.

use super::error::KbResult;
use super::models::*;
use rand::RngCore;
use std::collections::BTreeMap;

/// Trait for knowledge-graph storage backends.
///
/// Read operations only fail on storage errors; a name that resolves to
/// nothing yields an empty result. Write operations report rejected input
/// through the non-storage [`super::KbError`] variants.
pub trait KnowledgeBase: Send + Sync {
    // =========================================================================
    // Entities
    // =========================================================================

    /// Insert a bare entity of the given type, with an empty attribute row.
    fn add_entity(&self, name: &str, entity_type: EntityType) -> KbResult<EntityId>;

    /// Ids of every entity matching `name`, optionally restricted to a type,
    /// in insertion order.
    fn find_entity_ids(&self, name: &str, entity_type: Option<EntityType>)
        -> KbResult<Vec<EntityId>>;

    /// Ids matching `name`, grouped by type.
    fn node_ids_by_type(&self, name: &str) -> KbResult<BTreeMap<EntityType, Vec<EntityId>>>;

    fn entity_count(&self, entity_type: EntityType) -> KbResult<usize>;

    // =========================================================================
    // Relations
    // =========================================================================

    /// Add one directed edge between two uniquely named entities.
    fn connect(
        &self,
        source_name: &str,
        dest_name: &str,
        relation: &RelationType,
        score: i64,
    ) -> KbResult<()>;

    /// Names of the entities reached from `name` over `relation`, in the
    /// order the edges were added.
    fn related_entities(&self, name: &str, relation: &RelationType) -> KbResult<Vec<String>>;

    /// Same as [`KnowledgeBase::related_entities`] but anchored on an id.
    fn related_to(&self, id: EntityId, relation: &RelationType) -> KbResult<Vec<Entity>>;

    // =========================================================================
    // Songs and Artists
    // =========================================================================

    /// Songs matching `name`, narrowed by `id` when given. Both absent yields
    /// nothing.
    fn song_data(&self, name: Option<&str>, id: Option<EntityId>) -> KbResult<Vec<SongRecord>>;

    fn song_by_id(&self, id: EntityId) -> KbResult<Option<SongRecord>>;

    fn artist_data(&self, name: &str) -> KbResult<Vec<ArtistRecord>>;

    /// Songs whose main artist is `artist_name`.
    ///
    /// Fails with `UnknownEntity` or `AmbiguousEntity` when the name does not
    /// resolve to exactly one artist.
    fn songs_by_artist(&self, artist_name: &str) -> KbResult<Vec<SongRef>>;

    /// Full records of an artist's songs, in insertion order.
    fn songs_of_artist(&self, artist_id: EntityId) -> KbResult<Vec<SongRecord>>;

    fn all_song_names(&self) -> KbResult<Vec<String>>;

    fn all_artist_names(&self) -> KbResult<Vec<String>>;

    /// Songs strictly less popular than the first song matching `name`,
    /// least popular first.
    fn less_popular_songs(&self, name: &str) -> KbResult<Vec<SongRecord>>;

    /// Streaming URI of a uniformly chosen song that has one.
    fn random_song_uri(&self, rng: &mut dyn RngCore) -> KbResult<Option<String>>;

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Add an artist, or return the id of the existing one with that name.
    fn add_artist(
        &self,
        name: &str,
        genres: &[String],
        num_spotify_followers: Option<i64>,
    ) -> KbResult<EntityId>;

    fn add_song(&self, name: &str, artist_name: &str, song: &NewSong) -> KbResult<EntityId>;

    /// Add a genre, or return the id of the existing one with that name.
    fn add_genre(&self, name: &str) -> KbResult<EntityId>;
}
