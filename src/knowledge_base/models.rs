//! Records and enumerations exchanged with the knowledge base.
//!
//! Rows coming out of SQLite are mapped into explicit structs; nothing is
//! handed out as loose maps.

use super::error::KbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub type EntityId = i64;

// =============================================================================
// Enumerations
// =============================================================================

/// Kind of a graph node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Song,
    Artist,
    Genre,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Song, EntityType::Artist, EntityType::Genre];

    pub fn to_db_str(&self) -> &'static str {
        match self {
            EntityType::Song => "song",
            EntityType::Artist => "artist",
            EntityType::Genre => "genre",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "song" => Some(EntityType::Song),
            "artist" => Some(EntityType::Artist),
            "genre" => Some(EntityType::Genre),
            _ => None,
        }
    }

    /// Table holding the typed attribute row for this kind.
    pub(crate) fn attribute_table(&self) -> &'static str {
        match self {
            EntityType::Song => "songs",
            EntityType::Artist => "artists",
            EntityType::Genre => "genres",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for EntityType {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::from_db_str(&s.trim().to_lowercase())
            .ok_or_else(|| KbError::InvalidType(s.to_string()))
    }
}

/// Label carried by an edge.
///
/// The two approved labels get their own variants; anything else is still
/// storable but flagged when written.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    #[default]
    SimilarTo,
    OfGenre,
    Other(String),
}

impl RelationType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::SimilarTo => "similar to",
            RelationType::OfGenre => "of genre",
            RelationType::Other(s) => s.as_str(),
        }
    }

    pub fn is_approved(&self) -> bool {
        !matches!(self, RelationType::Other(_))
    }
}

impl From<&str> for RelationType {
    fn from(s: &str) -> Self {
        match s {
            "similar to" => RelationType::SimilarTo,
            "of genre" => RelationType::OfGenre,
            other => RelationType::Other(other.to_string()),
        }
    }
}

impl From<String> for RelationType {
    fn from(s: String) -> Self {
        RelationType::from(s.as_str())
    }
}

impl From<RelationType> for String {
    fn from(r: RelationType) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Musical mode of a track.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "ModeRepr")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "major" => Some(Mode::Major),
            "minor" => Some(Mode::Minor),
            _ => None,
        }
    }
}

impl FromStr for Mode {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::from_db_str(&s.trim().to_lowercase()).ok_or_else(|| KbError::InvalidMode(s.to_string()))
    }
}

/// Accepted wire shapes for a mode: a name, or the 1/0 flag used by audio
/// analysis dumps.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Name(String),
    Flag(i64),
}

impl TryFrom<ModeRepr> for Mode {
    type Error = KbError;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        match repr {
            ModeRepr::Name(name) => name.parse(),
            ModeRepr::Flag(1) => Ok(Mode::Major),
            ModeRepr::Flag(0) => Ok(Mode::Minor),
            ModeRepr::Flag(other) => Err(KbError::InvalidMode(other.to_string())),
        }
    }
}

// =============================================================================
// Core Entities
// =============================================================================

/// A graph node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
}

/// A song joined with its attribute row and main artist name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub id: EntityId,
    pub song_name: String,
    pub artist_id: Option<EntityId>,
    pub artist_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub spotify_uri: Option<String>,
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub speechiness: Option<f64>,
    pub valence: Option<f64>,
    pub tempo: Option<f64>,
    pub mode: Option<Mode>,
    pub musical_key: Option<i64>,
    pub time_signature: Option<i64>,
}

/// An artist with follower count and genre names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub id: EntityId,
    pub name: String,
    pub num_spotify_followers: Option<i64>,
    pub genres: Vec<String>,
}

/// Short song reference returned by artist listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRef {
    pub song_name: String,
    pub id: EntityId,
}

/// A playable track picked by the recommendation engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub song_id: EntityId,
    pub song_name: String,
    pub artist_name: Option<String>,
    pub spotify_uri: Option<String>,
}

impl From<&SongRecord> for Candidate {
    fn from(song: &SongRecord) -> Self {
        Candidate {
            song_id: song.id,
            song_name: song.song_name.clone(),
            artist_name: song.artist_name.clone(),
            spotify_uri: song.spotify_uri.clone(),
        }
    }
}

// =============================================================================
// Write Inputs
// =============================================================================

/// Audio analysis values for a new song. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFeatures {
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub speechiness: Option<f64>,
    pub valence: Option<f64>,
    pub tempo: Option<f64>,
    pub mode: Option<Mode>,
    pub musical_key: Option<i64>,
    pub time_signature: Option<i64>,
}

const REAL_FEATURES: &[&str] = &[
    "acousticness",
    "danceability",
    "energy",
    "instrumentalness",
    "liveness",
    "loudness",
    "speechiness",
    "valence",
    "tempo",
];

impl AudioFeatures {
    /// Build from a loosely typed map such as an analysis dump.
    ///
    /// Unknown keys are dropped with a warning, `null` leaves a field unset,
    /// and a value of the wrong shape is rejected. Range checks happen later,
    /// on insert.
    pub fn from_raw(raw: &BTreeMap<String, serde_json::Value>) -> Result<Self, KbError> {
        let mut features = AudioFeatures::default();
        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            let invalid = || KbError::InvalidAudioFeature {
                feature: key.clone(),
                value: value.to_string(),
            };
            match key.as_str() {
                k if REAL_FEATURES.contains(&k) => {
                    let v = value.as_f64().ok_or_else(invalid)?;
                    *features.real_slot(k) = Some(v);
                }
                "mode" => {
                    features.mode = Some(
                        serde_json::from_value::<Mode>(value.clone())
                            .map_err(|_| KbError::InvalidMode(value.to_string()))?,
                    );
                }
                "musical_key" | "key" => {
                    features.musical_key = Some(value.as_i64().ok_or_else(invalid)?);
                }
                "time_signature" => {
                    features.time_signature = Some(value.as_i64().ok_or_else(invalid)?);
                }
                _ => warn!("Dropping unrecognized audio feature '{}'", key),
            }
        }
        Ok(features)
    }

    fn real_slot(&mut self, key: &str) -> &mut Option<f64> {
        match key {
            "acousticness" => &mut self.acousticness,
            "danceability" => &mut self.danceability,
            "energy" => &mut self.energy,
            "instrumentalness" => &mut self.instrumentalness,
            "liveness" => &mut self.liveness,
            "loudness" => &mut self.loudness,
            "speechiness" => &mut self.speechiness,
            "valence" => &mut self.valence,
            _ => &mut self.tempo,
        }
    }

    /// Named real-valued features, for validation.
    pub(crate) fn reals(&self) -> [(&'static str, Option<f64>); 9] {
        [
            ("acousticness", self.acousticness),
            ("danceability", self.danceability),
            ("energy", self.energy),
            ("instrumentalness", self.instrumentalness),
            ("liveness", self.liveness),
            ("loudness", self.loudness),
            ("speechiness", self.speechiness),
            ("valence", self.valence),
            ("tempo", self.tempo),
        ]
    }
}

/// Attributes for a song about to be inserted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSong {
    pub duration_ms: Option<i64>,
    pub popularity: Option<i64>,
    pub spotify_uri: Option<String>,
    pub audio_features: AudioFeatures,
}
