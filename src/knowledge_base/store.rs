//! SQLite-backed knowledge base.
//!
//! Provides `SqliteKnowledgeBase`, which keeps the graph in a single SQLite
//! file: one write connection plus a small pool of read-only connections
//! over WAL.

use super::error::{KbError, KbResult};
use super::models::*;
use super::name_match::{register_fold_case, NameMatching};
use super::schema::KB_VERSIONED_SCHEMAS;
use super::trait_def::KnowledgeBase;
use super::validation::{validate_name, validate_new_song, validate_score};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use rand::{Rng, RngCore};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Score given to the artist -> genre edges created by `add_artist`.
pub const GENRE_EDGE_SCORE: i64 = 100;

const SONG_SELECT: &str = "SELECT n.id, n.name, s.main_artist_id, a.name, s.duration_ms, s.popularity, \
     s.spotify_uri, s.acousticness, s.danceability, s.energy, s.instrumentalness, s.liveness, \
     s.loudness, s.speechiness, s.valence, s.tempo, s.mode, s.musical_key, s.time_signature \
     FROM nodes n JOIN songs s ON s.node_id = n.id \
     LEFT JOIN nodes a ON a.id = s.main_artist_id";

/// SQLite-backed knowledge graph.
#[derive(Clone)]
pub struct SqliteKnowledgeBase {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
    matching: NameMatching,
}

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = KB_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &KB_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )?;

    if table_count == 0 {
        info!("Creating knowledge base schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return Ok(());
    }

    if db_version < BASE_DB_VERSION as i64 {
        anyhow::bail!(
            "Database has user_version {} and was not created by muze-kb",
            db_version
        );
    }
    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;

    if current_version < latest_version {
        let tx = conn.transaction()?;
        for schema in KB_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating knowledge base from version {} to {}",
                    current_version, schema.version
                );
                migration_fn(&tx)?;
            }
            current_version = schema.version;
        }
        tx.pragma_update(None, "user_version", (BASE_DB_VERSION + current_version) as i64)?;
        tx.commit()?;
    }

    latest_schema
        .validate(conn)
        .context("Knowledge base schema validation failed")?;
    Ok(())
}

/// Lock a connection, recovering it if a previous holder panicked.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SqliteKnowledgeBase {
    /// Open (creating if needed) the knowledge base at `db_path`.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of read-only connections (at least 1 is used)
    /// * `matching` - Name matching used by every lookup
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        read_pool_size: usize,
        matching: NameMatching,
    ) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open knowledge base at {:?}", db_path_ref))?;

        register_fold_case(&write_conn)?;
        migrate_if_needed(&mut write_conn)?;

        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.pragma_update(None, "foreign_keys", "ON")?;
            register_fold_case(&read_conn)?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        let store = SqliteKnowledgeBase {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
            matching,
        };

        info!(
            "Opened knowledge base: {} songs, {} artists, {} genres",
            store.entity_count(EntityType::Song)?,
            store.entity_count(EntityType::Artist)?,
            store.entity_count(EntityType::Genre)?
        );
        Ok(store)
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    /// Run `f` on the write connection inside `BEGIN IMMEDIATE`, committing
    /// on success and rolling back on any error.
    fn in_write_transaction<T>(&self, f: impl FnOnce(&Connection) -> KbResult<T>) -> KbResult<T> {
        let conn = lock(&self.write_conn);
        conn.execute("BEGIN IMMEDIATE", [])?;

        match f(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", []) {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Internal Helper Methods
    // =========================================================================

    fn find_ids(
        conn: &Connection,
        matching: NameMatching,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> rusqlite::Result<Vec<EntityId>> {
        let pattern = matching.pattern(name);
        let type_str = entity_type.map(|t| t.to_db_str());
        let mut sql = format!("SELECT id FROM nodes WHERE {}", matching.predicate("name"));
        let mut args: Vec<&dyn ToSql> = vec![&pattern];
        if let Some(type_str) = &type_str {
            sql.push_str(" AND type = ?");
            args.push(type_str);
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare_cached(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(args), |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<EntityId>>>()?;
        Ok(ids)
    }

    /// Resolve `name` to exactly one entity.
    fn resolve_one(
        conn: &Connection,
        matching: NameMatching,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> KbResult<EntityId> {
        let ids = Self::find_ids(conn, matching, name, entity_type)?;
        match ids.as_slice() {
            [] => Err(KbError::UnknownEntity(name.to_string())),
            [id] => Ok(*id),
            _ => Err(KbError::AmbiguousEntity {
                name: name.to_string(),
                matches: ids.len(),
            }),
        }
    }

    /// First existing entity with exactly this name and type. Identity checks
    /// always use exact matching, whatever the lookup matcher is.
    fn existing_id(
        conn: &Connection,
        name: &str,
        entity_type: EntityType,
    ) -> rusqlite::Result<Option<EntityId>> {
        Ok(Self::find_ids(conn, NameMatching::Exact, name, Some(entity_type))?
            .into_iter()
            .next())
    }

    fn insert_node(conn: &Connection, name: &str, entity_type: EntityType) -> KbResult<EntityId> {
        conn.execute(
            "INSERT INTO nodes (name, type) VALUES (?1, ?2)",
            params![name.trim(), entity_type.to_db_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a node and an attribute row with only the key set.
    fn insert_bare_entity(
        conn: &Connection,
        name: &str,
        entity_type: EntityType,
    ) -> KbResult<EntityId> {
        let id = Self::insert_node(conn, name, entity_type)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (node_id) VALUES (?1)",
                entity_type.attribute_table()
            ),
            params![id],
        )?;
        Ok(id)
    }

    fn insert_song(
        conn: &Connection,
        name: &str,
        artist_id: EntityId,
        song: &NewSong,
    ) -> KbResult<EntityId> {
        let id = Self::insert_node(conn, name, EntityType::Song)?;
        let f = &song.audio_features;
        conn.execute(
            "INSERT INTO songs (node_id, main_artist_id, duration_ms, popularity, spotify_uri, \
             acousticness, danceability, energy, instrumentalness, liveness, loudness, \
             speechiness, valence, tempo, mode, musical_key, time_signature) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                id,
                artist_id,
                song.duration_ms,
                song.popularity,
                song.spotify_uri,
                f.acousticness,
                f.danceability,
                f.energy,
                f.instrumentalness,
                f.liveness,
                f.loudness,
                f.speechiness,
                f.valence,
                f.tempo,
                f.mode.map(|m| m.to_db_str()),
                f.musical_key,
                f.time_signature,
            ],
        )?;
        Ok(id)
    }

    fn edge_exists(
        conn: &Connection,
        source: EntityId,
        dest: EntityId,
        relation: &RelationType,
    ) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM edges WHERE source = ?1 AND dest = ?2 AND rel = ?3)",
            params![source, dest, relation.as_str()],
            |r| r.get(0),
        )
    }

    fn entity_name(conn: &Connection, id: EntityId) -> rusqlite::Result<Option<String>> {
        conn.query_row("SELECT name FROM nodes WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .optional()
    }

    /// Insert one edge between known ids, rejecting duplicates.
    fn insert_edge(
        conn: &Connection,
        source: EntityId,
        dest: EntityId,
        relation: &RelationType,
        score: i64,
    ) -> KbResult<()> {
        if Self::edge_exists(conn, source, dest, relation)? {
            return Err(KbError::DuplicateEdge {
                source_name: Self::entity_name(conn, source)?.unwrap_or_default(),
                dest_name: Self::entity_name(conn, dest)?.unwrap_or_default(),
                relation: relation.to_string(),
            });
        }
        if !relation.is_approved() {
            warn!("Adding edge with unapproved relation type '{}'", relation);
        }
        conn.execute(
            "INSERT INTO edges (source, dest, rel, score) VALUES (?1, ?2, ?3, ?4)",
            params![source, dest, relation.as_str(), score],
        )?;
        Ok(())
    }

    fn song_from_row(row: &Row) -> rusqlite::Result<SongRecord> {
        Ok(SongRecord {
            id: row.get(0)?,
            song_name: row.get(1)?,
            artist_id: row.get(2)?,
            artist_name: row.get(3)?,
            duration_ms: row.get(4)?,
            popularity: row.get(5)?,
            spotify_uri: row.get(6)?,
            acousticness: row.get(7)?,
            danceability: row.get(8)?,
            energy: row.get(9)?,
            instrumentalness: row.get(10)?,
            liveness: row.get(11)?,
            loudness: row.get(12)?,
            speechiness: row.get(13)?,
            valence: row.get(14)?,
            tempo: row.get(15)?,
            mode: row
                .get::<_, Option<String>>(16)?
                .as_deref()
                .and_then(Mode::from_db_str),
            musical_key: row.get(17)?,
            time_signature: row.get(18)?,
        })
    }

    fn query_songs(
        conn: &Connection,
        where_clause: &str,
        args: &[&dyn ToSql],
    ) -> rusqlite::Result<Vec<SongRecord>> {
        let mut stmt = conn.prepare_cached(&format!("{} {}", SONG_SELECT, where_clause))?;
        let songs = stmt
            .query_map(args, Self::song_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn related_ids(
        conn: &Connection,
        source: EntityId,
        relation: &RelationType,
    ) -> rusqlite::Result<Vec<Entity>> {
        let mut stmt = conn.prepare_cached(
            "SELECT d.id, d.name, d.type FROM edges e JOIN nodes d ON d.id = e.dest \
             WHERE e.source = ?1 AND e.rel = ?2 ORDER BY e.id",
        )?;
        let rows = stmt
            .query_map(params![source, relation.as_str()], |r| {
                Ok((r.get::<_, EntityId>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, name, t)| {
                EntityType::from_db_str(&t).map(|entity_type| Entity {
                    id,
                    name,
                    entity_type,
                })
            })
            .collect())
    }

    fn names_of_type(&self, entity_type: EntityType) -> KbResult<Vec<String>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let mut stmt = conn.prepare_cached("SELECT name FROM nodes WHERE type = ?1 ORDER BY id")?;
        let names = stmt
            .query_map(params![entity_type.to_db_str()], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

impl KnowledgeBase for SqliteKnowledgeBase {
    // =========================================================================
    // Entities
    // =========================================================================

    fn add_entity(&self, name: &str, entity_type: EntityType) -> KbResult<EntityId> {
        validate_name(name, entity_type)?;
        let id = self.in_write_transaction(|conn| Self::insert_bare_entity(conn, name, entity_type))?;
        debug!("Added {} '{}' with id {}", entity_type, name, id);
        Ok(id)
    }

    fn find_entity_ids(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> KbResult<Vec<EntityId>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        Ok(Self::find_ids(&conn, self.matching, name, entity_type)?)
    }

    fn node_ids_by_type(&self, name: &str) -> KbResult<BTreeMap<EntityType, Vec<EntityId>>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let pattern = self.matching.pattern(name);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT id, type FROM nodes WHERE {} ORDER BY id",
            self.matching.predicate("name")
        ))?;
        let rows = stmt
            .query_map(params![pattern], |r| {
                Ok((r.get::<_, EntityId>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_type: BTreeMap<EntityType, Vec<EntityId>> = BTreeMap::new();
        for (id, t) in rows {
            if let Some(entity_type) = EntityType::from_db_str(&t) {
                by_type.entry(entity_type).or_default().push(id);
            }
        }
        Ok(by_type)
    }

    fn entity_count(&self, entity_type: EntityType) -> KbResult<usize> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE type = ?1",
            params![entity_type.to_db_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // =========================================================================
    // Relations
    // =========================================================================

    fn connect(
        &self,
        source_name: &str,
        dest_name: &str,
        relation: &RelationType,
        score: i64,
    ) -> KbResult<()> {
        validate_score(score)?;
        let matching = self.matching;
        self.in_write_transaction(|conn| {
            let source = Self::resolve_one(conn, matching, source_name, None)?;
            let dest = Self::resolve_one(conn, matching, dest_name, None)?;
            Self::insert_edge(conn, source, dest, relation, score)
        })?;
        debug!(
            "Connected '{}' -[{}]-> '{}' ({})",
            source_name, relation, dest_name, score
        );
        Ok(())
    }

    fn related_entities(&self, name: &str, relation: &RelationType) -> KbResult<Vec<String>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let pattern = self.matching.pattern(name);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT d.name FROM edges e \
             JOIN nodes s ON s.id = e.source \
             JOIN nodes d ON d.id = e.dest \
             WHERE {} AND e.rel = ? ORDER BY e.id",
            self.matching.predicate("s.name")
        ))?;
        let names = stmt
            .query_map(params![pattern, relation.as_str()], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn related_to(&self, id: EntityId, relation: &RelationType) -> KbResult<Vec<Entity>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        Ok(Self::related_ids(&conn, id, relation)?)
    }

    // =========================================================================
    // Songs and Artists
    // =========================================================================

    fn song_data(&self, name: Option<&str>, id: Option<EntityId>) -> KbResult<Vec<SongRecord>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let songs = match (name, id) {
            (None, None) => return Ok(Vec::new()),
            (None, Some(id)) => Self::query_songs(&conn, "WHERE n.id = ?1", &[&id])?,
            (Some(name), _) => {
                let pattern = self.matching.pattern(name);
                Self::query_songs(
                    &conn,
                    &format!("WHERE {} ORDER BY n.id", self.matching.predicate("n.name")),
                    &[&pattern],
                )?
            }
        };
        Ok(match id {
            Some(id) => songs.into_iter().filter(|s| s.id == id).collect(),
            None => songs,
        })
    }

    fn song_by_id(&self, id: EntityId) -> KbResult<Option<SongRecord>> {
        Ok(self.song_data(None, Some(id))?.into_iter().next())
    }

    fn artist_data(&self, name: &str) -> KbResult<Vec<ArtistRecord>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let pattern = self.matching.pattern(name);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT n.id, n.name, a.num_spotify_followers FROM nodes n \
             JOIN artists a ON a.node_id = n.id WHERE {} ORDER BY n.id",
            self.matching.predicate("n.name")
        ))?;
        let rows = stmt
            .query_map(params![pattern], |r| {
                Ok((
                    r.get::<_, EntityId>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<i64>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut artists = Vec::with_capacity(rows.len());
        for (id, name, num_spotify_followers) in rows {
            let genres = Self::related_ids(&conn, id, &RelationType::OfGenre)?
                .into_iter()
                .map(|e| e.name)
                .collect();
            artists.push(ArtistRecord {
                id,
                name,
                num_spotify_followers,
                genres,
            });
        }
        Ok(artists)
    }

    fn songs_by_artist(&self, artist_name: &str) -> KbResult<Vec<SongRef>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let artist_id = Self::resolve_one(&conn, self.matching, artist_name, Some(EntityType::Artist))?;
        let mut stmt = conn.prepare_cached(
            "SELECT n.id, n.name FROM songs s JOIN nodes n ON n.id = s.node_id \
             WHERE s.main_artist_id = ?1 ORDER BY n.id",
        )?;
        let songs = stmt
            .query_map(params![artist_id], |r| {
                Ok(SongRef {
                    id: r.get(0)?,
                    song_name: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn songs_of_artist(&self, artist_id: EntityId) -> KbResult<Vec<SongRecord>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        Ok(Self::query_songs(
            &conn,
            "WHERE s.main_artist_id = ?1 ORDER BY n.id",
            &[&artist_id],
        )?)
    }

    fn all_song_names(&self) -> KbResult<Vec<String>> {
        self.names_of_type(EntityType::Song)
    }

    fn all_artist_names(&self) -> KbResult<Vec<String>> {
        self.names_of_type(EntityType::Artist)
    }

    fn less_popular_songs(&self, name: &str) -> KbResult<Vec<SongRecord>> {
        let Some(reference) = self.song_data(Some(name), None)?.into_iter().next() else {
            return Ok(Vec::new());
        };
        let Some(popularity) = reference.popularity else {
            return Ok(Vec::new());
        };
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        Ok(Self::query_songs(
            &conn,
            "WHERE s.popularity < ?1 ORDER BY s.popularity ASC, n.id",
            &[&popularity],
        )?)
    }

    fn random_song_uri(&self, rng: &mut dyn RngCore) -> KbResult<Option<String>> {
        let conn = self.get_read_conn();
        let conn = lock(&conn);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM songs WHERE spotify_uri IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        if count == 0 {
            return Ok(None);
        }
        let offset = rng.random_range(0..count);
        let uri = conn
            .query_row(
                "SELECT spotify_uri FROM songs WHERE spotify_uri IS NOT NULL \
                 ORDER BY node_id LIMIT 1 OFFSET ?1",
                params![offset],
                |r| r.get(0),
            )
            .optional()?;
        Ok(uri)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    fn add_artist(
        &self,
        name: &str,
        genres: &[String],
        num_spotify_followers: Option<i64>,
    ) -> KbResult<EntityId> {
        validate_name(name, EntityType::Artist)?;

        let (artist_id, created) = self.in_write_transaction(|conn| {
            if let Some(id) = Self::existing_id(conn, name, EntityType::Artist)? {
                return Ok((id, false));
            }
            let id = Self::insert_node(conn, name, EntityType::Artist)?;
            conn.execute(
                "INSERT INTO artists (node_id, num_spotify_followers) VALUES (?1, ?2)",
                params![id, num_spotify_followers],
            )?;
            Ok((id, true))
        })?;

        if !created {
            info!("Artist '{}' already exists with id {}", name, artist_id);
            return Ok(artist_id);
        }
        info!("Added artist '{}' with id {}", name, artist_id);

        for genre in genres {
            let result = self.add_genre(genre).and_then(|genre_id| {
                self.in_write_transaction(|conn| {
                    Self::insert_edge(conn, artist_id, genre_id, &RelationType::OfGenre, GENRE_EDGE_SCORE)
                })
            });
            if let Err(e) = result {
                warn!("Could not link artist '{}' to genre '{}': {}", name, genre, e);
            }
        }
        Ok(artist_id)
    }

    fn add_song(&self, name: &str, artist_name: &str, song: &NewSong) -> KbResult<EntityId> {
        validate_name(name, EntityType::Song)?;
        validate_new_song(song)?;

        let matching = self.matching;
        let id = self.in_write_transaction(|conn| {
            let artist_id = Self::resolve_one(conn, matching, artist_name, Some(EntityType::Artist))?;
            let duplicate: bool = conn.query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM nodes n JOIN songs s ON s.node_id = n.id \
                     WHERE {} AND s.main_artist_id = ?)",
                    NameMatching::Exact.predicate("n.name")
                ),
                params![NameMatching::Exact.pattern(name), artist_id],
                |r| r.get(0),
            )?;
            if duplicate {
                return Err(KbError::DuplicateSong {
                    song: name.to_string(),
                    artist: artist_name.to_string(),
                });
            }
            Self::insert_song(conn, name, artist_id, song)
        })?;
        info!("Added song '{}' by '{}' with id {}", name, artist_name, id);
        Ok(id)
    }

    fn add_genre(&self, name: &str) -> KbResult<EntityId> {
        validate_name(name, EntityType::Genre)?;
        let (id, created) = self.in_write_transaction(|conn| {
            if let Some(id) = Self::existing_id(conn, name, EntityType::Genre)? {
                return Ok((id, false));
            }
            Ok((Self::insert_bare_entity(conn, name, EntityType::Genre)?, true))
        })?;
        if created {
            info!("Added genre '{}' with id {}", name, id);
        } else {
            debug!("Genre '{}' already exists with id {}", name, id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteKnowledgeBase, TempDir) {
        create_test_store_with(NameMatching::Exact)
    }

    fn create_test_store_with(matching: NameMatching) -> (SqliteKnowledgeBase, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("kb.db");
        let store = SqliteKnowledgeBase::new(&db_path, 2, matching).unwrap();
        (store, temp_dir)
    }

    fn song(popularity: i64, valence: f64) -> NewSong {
        NewSong {
            popularity: Some(popularity),
            duration_ms: Some(200_000),
            spotify_uri: Some(format!("spotify:track:{}", popularity)),
            audio_features: AudioFeatures {
                valence: Some(valence),
                ..Default::default()
            },
        }
    }

    fn node_count(store: &SqliteKnowledgeBase) -> i64 {
        let conn = lock(&store.write_conn);
        conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_new_store_is_empty_and_valid() {
        let (store, _dir) = create_test_store();
        for t in EntityType::ALL {
            assert_eq!(store.entity_count(t).unwrap(), 0);
        }
        assert!(store.all_song_names().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("kb.db");
        {
            let store = SqliteKnowledgeBase::new(&db_path, 1, NameMatching::Exact).unwrap();
            store.add_artist("Luis Fonsi", &[], None).unwrap();
        }
        let store = SqliteKnowledgeBase::new(&db_path, 1, NameMatching::Exact).unwrap();
        assert_eq!(store.all_artist_names().unwrap(), vec!["Luis Fonsi"]);
    }

    #[test]
    fn test_open_migrates_v0_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("kb.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            KB_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        }
        SqliteKnowledgeBase::new(&db_path, 1, NameMatching::Exact).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + KB_VERSIONED_SCHEMAS.len() - 1);
        let has_index: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='index' AND name='idx_nodes_type')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(has_index);
    }

    #[test]
    fn test_open_rejects_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY)", [])
                .unwrap();
        }
        assert!(SqliteKnowledgeBase::new(&db_path, 1, NameMatching::Exact).is_err());
    }

    #[test]
    fn test_add_entity_returns_latest_id() {
        let (store, _dir) = create_test_store();
        let first = store.add_entity("Pop", EntityType::Genre).unwrap();
        let second = store.add_entity("Pop", EntityType::Genre).unwrap();
        assert!(second > first);
        assert_eq!(
            store.find_entity_ids("pop", Some(EntityType::Genre)).unwrap(),
            vec![first, second]
        );
    }

    #[test]
    fn test_add_entity_rejects_empty_name() {
        let (store, _dir) = create_test_store();
        assert!(matches!(
            store.add_entity("  ", EntityType::Song),
            Err(KbError::EmptyName { .. })
        ));
        assert_eq!(node_count(&store), 0);
    }

    #[test]
    fn test_node_ids_by_type_groups_collisions() {
        let (store, _dir) = create_test_store();
        let artist = store.add_artist("Sorry", &[], None).unwrap();
        store
            .add_song("Sorry", "Sorry", &NewSong::default())
            .unwrap();
        let by_type = store.node_ids_by_type("Sorry").unwrap();
        assert_eq!(by_type.get(&EntityType::Artist), Some(&vec![artist]));
        assert_eq!(by_type.get(&EntityType::Song).map(Vec::len), Some(1));
        assert!(!by_type.contains_key(&EntityType::Genre));
        assert_eq!(store.find_entity_ids("Sorry", None).unwrap().len(), 2);
    }

    #[test]
    fn test_connect_and_related_entities_in_edge_order() {
        let (store, _dir) = create_test_store();
        for name in ["Shawn Mendes", "Justin Timberlake", "Camila Cabello"] {
            store.add_artist(name, &[], None).unwrap();
        }
        store
            .connect("Shawn Mendes", "Justin Timberlake", &RelationType::SimilarTo, 70)
            .unwrap();
        store
            .connect("Shawn Mendes", "Camila Cabello", &RelationType::SimilarTo, 90)
            .unwrap();
        assert_eq!(
            store
                .related_entities("Shawn Mendes", &RelationType::SimilarTo)
                .unwrap(),
            vec!["Justin Timberlake", "Camila Cabello"]
        );
        // edges are directed
        assert!(store
            .related_entities("Justin Timberlake", &RelationType::SimilarTo)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_connect_rejections() {
        let (store, _dir) = create_test_store();
        store.add_artist("A", &[], None).unwrap();
        store.add_artist("B", &[], None).unwrap();
        store.add_entity("B", EntityType::Genre).unwrap();

        assert!(matches!(
            store.connect("A", "Nobody", &RelationType::SimilarTo, 50),
            Err(KbError::UnknownEntity(n)) if n == "Nobody"
        ));
        assert!(matches!(
            store.connect("A", "B", &RelationType::SimilarTo, 50),
            Err(KbError::AmbiguousEntity { matches: 2, .. })
        ));
        assert!(matches!(
            store.connect("B", "A", &RelationType::SimilarTo, 101),
            Err(KbError::InvalidScore(101))
        ));
        assert!(matches!(
            store.connect("A", "B", &RelationType::SimilarTo, -3),
            Err(KbError::InvalidScore(-3))
        ));
    }

    #[test]
    fn test_connect_duplicate_and_unapproved_relation() {
        let (store, _dir) = create_test_store();
        store.add_artist("A", &[], None).unwrap();
        store.add_artist("C", &[], None).unwrap();
        let covers = RelationType::from("covers");
        store.connect("A", "C", &covers, 10).unwrap();
        assert!(matches!(
            store.connect("A", "C", &covers, 20),
            Err(KbError::DuplicateEdge { .. })
        ));
        // same pair, other label
        store.connect("A", "C", &RelationType::SimilarTo, 20).unwrap();
        assert_eq!(store.related_entities("A", &covers).unwrap(), vec!["C"]);
    }

    #[test]
    fn test_add_artist_is_idempotent_and_links_genres() {
        let (store, _dir) = create_test_store();
        let genres = vec!["pop".to_string(), "dance pop".to_string()];
        let id = store
            .add_artist("Justin Bieber", &genres, Some(1_000_000))
            .unwrap();
        let again = store.add_artist("justin bieber", &[], None).unwrap();
        assert_eq!(id, again);
        assert_eq!(store.entity_count(EntityType::Artist).unwrap(), 1);

        let artists = store.artist_data("Justin Bieber").unwrap();
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].num_spotify_followers, Some(1_000_000));
        assert_eq!(artists[0].genres, genres);
    }

    #[test]
    fn test_add_genre_is_idempotent() {
        let (store, _dir) = create_test_store();
        let a = store.add_genre("latin").unwrap();
        let b = store.add_genre("Latin").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.entity_count(EntityType::Genre).unwrap(), 1);
    }

    #[test]
    fn test_add_song_duplicate_per_artist() {
        let (store, _dir) = create_test_store();
        store.add_artist("Luis Fonsi", &[], None).unwrap();
        store.add_artist("Cover Band", &[], None).unwrap();
        store
            .add_song("Despacito", "Luis Fonsi", &song(10, 0.8))
            .unwrap();
        assert!(matches!(
            store.add_song("Despacito", "Luis Fonsi", &song(10, 0.8)),
            Err(KbError::DuplicateSong { .. })
        ));
        store
            .add_song("Despacito", "Cover Band", &song(5, 0.4))
            .unwrap();
        assert_eq!(store.song_data(Some("Despacito"), None).unwrap().len(), 2);
    }

    #[test]
    fn test_add_song_requires_single_artist() {
        let (store, _dir) = create_test_store();
        assert!(matches!(
            store.add_song("Sorry", "Justin Bieber", &NewSong::default()),
            Err(KbError::UnknownEntity(_))
        ));
        store.add_entity("Twins", EntityType::Artist).unwrap();
        store.add_entity("Twins", EntityType::Artist).unwrap();
        assert!(matches!(
            store.add_song("Sorry", "Twins", &NewSong::default()),
            Err(KbError::AmbiguousEntity { .. })
        ));
        assert_eq!(store.entity_count(EntityType::Song).unwrap(), 0);
    }

    #[test]
    fn test_add_song_rejects_invalid_features_before_insert() {
        let (store, _dir) = create_test_store();
        store.add_artist("Luis Fonsi", &[], None).unwrap();
        let before = node_count(&store);
        let bad = NewSong {
            audio_features: AudioFeatures {
                energy: Some(2.0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            store.add_song("Despacito", "Luis Fonsi", &bad),
            Err(KbError::InvalidAudioFeature { .. })
        ));
        assert_eq!(node_count(&store), before);
    }

    #[test]
    fn test_failed_attribute_insert_rolls_back_node() {
        let (store, _dir) = create_test_store();
        let result = store.in_write_transaction(|conn| {
            // no artist with this id, so the songs row violates its foreign key
            SqliteKnowledgeBase::insert_song(conn, "Ghost", 9999, &NewSong::default())
        });
        assert!(matches!(result, Err(KbError::Storage(_))));
        assert_eq!(node_count(&store), 0);
    }

    #[test]
    fn test_song_data_filters() {
        let (store, _dir) = create_test_store();
        store.add_artist("Justin Bieber", &[], None).unwrap();
        let sorry = store
            .add_song("Sorry", "Justin Bieber", &song(20, 0.4))
            .unwrap();
        store
            .add_song("Baby", "Justin Bieber", &song(30, 0.9))
            .unwrap();

        assert!(store.song_data(None, None).unwrap().is_empty());
        assert!(store.song_data(Some("Nope"), None).unwrap().is_empty());

        let records = store.song_data(Some("sorry"), None).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, sorry);
        assert_eq!(record.artist_name.as_deref(), Some("Justin Bieber"));
        assert_eq!(record.popularity, Some(20));
        assert_eq!(record.valence, Some(0.4));
        assert_eq!(record.energy, None);

        assert_eq!(store.song_data(None, Some(sorry)).unwrap().len(), 1);
        assert!(store.song_data(Some("Baby"), Some(sorry)).unwrap().is_empty());
    }

    #[test]
    fn test_contains_matching_widens_lookups() {
        let (store, _dir) = create_test_store_with(NameMatching::Contains);
        store.add_artist("Justin Bieber", &[], None).unwrap();
        store
            .add_song("Love Yourself", "bieber", &NewSong::default())
            .unwrap();
        assert_eq!(store.song_data(Some("yourself"), None).unwrap().len(), 1);
        // identity checks stay exact
        store.add_artist("Justin", &[], None).unwrap();
        assert_eq!(store.entity_count(EntityType::Artist).unwrap(), 2);
    }

    #[test]
    fn test_songs_by_artist_sentinels() {
        let (store, _dir) = create_test_store();
        assert!(matches!(
            store.songs_by_artist("Nobody"),
            Err(KbError::UnknownEntity(_))
        ));
        store.add_artist("Justin Bieber", &[], None).unwrap();
        assert!(store.songs_by_artist("Justin Bieber").unwrap().is_empty());
        let id = store
            .add_song("Sorry", "Justin Bieber", &NewSong::default())
            .unwrap();
        assert_eq!(
            store.songs_by_artist("Justin Bieber").unwrap(),
            vec![SongRef {
                song_name: "Sorry".to_string(),
                id
            }]
        );
    }

    #[test]
    fn test_less_popular_songs() {
        let (store, _dir) = create_test_store();
        store.add_artist("Justin Bieber", &[], None).unwrap();
        store.add_song("Sorry", "Justin Bieber", &song(20, 0.4)).unwrap();
        store.add_song("Baby", "Justin Bieber", &song(30, 0.9)).unwrap();
        store.add_song("Yummy", "Justin Bieber", &song(5, 0.5)).unwrap();
        store.add_song("Hold On", "Justin Bieber", &song(20, 0.5)).unwrap();

        let names: Vec<String> = store
            .less_popular_songs("Baby")
            .unwrap()
            .into_iter()
            .map(|s| s.song_name)
            .collect();
        assert_eq!(names, vec!["Yummy", "Sorry", "Hold On"]);
        assert!(store.less_popular_songs("Yummy").unwrap().is_empty());
        assert!(store.less_popular_songs("Unknown").unwrap().is_empty());
    }

    #[test]
    fn test_random_song_uri() {
        let (store, _dir) = create_test_store();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(store.random_song_uri(&mut rng).unwrap(), None);

        store.add_artist("Justin Bieber", &[], None).unwrap();
        store.add_song("Sorry", "Justin Bieber", &song(20, 0.4)).unwrap();
        store
            .add_song("No Uri", "Justin Bieber", &NewSong::default())
            .unwrap();
        assert_eq!(
            store.random_song_uri(&mut rng).unwrap().as_deref(),
            Some("spotify:track:20")
        );
    }
}
