//! SQLite schema for the knowledge graph.
//!
//! Every entity is a row in `nodes`; songs, artists and genres each carry a
//! typed attribute row keyed by the node id. Relations live in `edges`.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    create_index, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};
use anyhow::Result;
use rusqlite::Connection;

const NODE_FK: ForeignKey = ForeignKey {
    foreign_table: "nodes",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ARTIST_FK: ForeignKey = ForeignKey {
    foreign_table: "artists",
    foreign_column: "node_id",
    on_delete: ForeignKeyOnChange::Restrict,
};

/// Nodes table - one row per entity
const NODES_TABLE_V0: Table = Table {
    name: "nodes",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("type", &SqlType::Text, non_null = true), // 'song', 'artist', 'genre'
    ],
    indices: &[("idx_nodes_name", "name")],
    unique_constraints: &[],
};

const NODES_TABLE_V1: Table = Table {
    indices: &[("idx_nodes_name", "name"), ("idx_nodes_type", "type")],
    ..NODES_TABLE_V0
};

/// Songs table - audio attributes, 1:1 with a song node
const SONGS_TABLE: Table = Table {
    name: "songs",
    columns: &[
        sqlite_column!(
            "node_id",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&NODE_FK)
        ),
        sqlite_column!(
            "main_artist_id",
            &SqlType::Integer,
            foreign_key = Some(&ARTIST_FK)
        ),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("spotify_uri", &SqlType::Text),
        sqlite_column!("acousticness", &SqlType::Real),
        sqlite_column!("danceability", &SqlType::Real),
        sqlite_column!("energy", &SqlType::Real),
        sqlite_column!("instrumentalness", &SqlType::Real),
        sqlite_column!("liveness", &SqlType::Real),
        sqlite_column!("loudness", &SqlType::Real),
        sqlite_column!("speechiness", &SqlType::Real),
        sqlite_column!("valence", &SqlType::Real),
        sqlite_column!("tempo", &SqlType::Real),
        sqlite_column!("mode", &SqlType::Text), // 'major', 'minor'
        sqlite_column!("musical_key", &SqlType::Integer),
        sqlite_column!("time_signature", &SqlType::Integer),
    ],
    indices: &[("idx_songs_main_artist", "main_artist_id")],
    unique_constraints: &[],
};

/// Artists table - follower count, 1:1 with an artist node
const ARTISTS_TABLE: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!(
            "node_id",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&NODE_FK)
        ),
        sqlite_column!("num_spotify_followers", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Genres table - marker row, 1:1 with a genre node
const GENRES_TABLE: Table = Table {
    name: "genres",
    columns: &[sqlite_column!(
        "node_id",
        &SqlType::Integer,
        is_primary_key = true,
        foreign_key = Some(&NODE_FK)
    )],
    indices: &[],
    unique_constraints: &[],
};

/// Edges table - directed, labelled, scored relations
const EDGES_TABLE: Table = Table {
    name: "edges",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "source",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&NODE_FK)
        ),
        sqlite_column!(
            "dest",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&NODE_FK)
        ),
        sqlite_column!("rel", &SqlType::Text, non_null = true),
        sqlite_column!("score", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_edges_source", "source")],
    unique_constraints: &[&["source", "dest", "rel"]],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    create_index(conn, "idx_nodes_type", "nodes", "type")
}

pub const KB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            NODES_TABLE_V0,
            SONGS_TABLE,
            ARTISTS_TABLE,
            GENRES_TABLE,
            EDGES_TABLE,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            NODES_TABLE_V1,
            SONGS_TABLE,
            ARTISTS_TABLE,
            GENRES_TABLE,
            EDGES_TABLE,
        ],
        migration: Some(migrate_v0_to_v1),
    },
];
