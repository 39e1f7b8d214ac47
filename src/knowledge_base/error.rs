use super::models::EntityType;
use thiserror::Error;

/// Errors produced by the knowledge base.
///
/// Everything except [`KbError::Storage`] describes an expected outcome of bad
/// or unlucky input: read operations fold those into empty results, write
/// operations hand them back as the failure value. `Storage` is the only hard
/// operational error.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("no entity named '{0}'")]
    UnknownEntity(String),

    #[error("'{name}' is ambiguous: {matches} matching entities")]
    AmbiguousEntity { name: String, matches: usize },

    #[error("'{0}' is not a valid entity type (expected song, artist or genre)")]
    InvalidType(String),

    #[error("{entity_type} name must not be empty")]
    EmptyName { entity_type: EntityType },

    #[error("score {0} is outside the [0, 100] range")]
    InvalidScore(i64),

    #[error("edge '{source_name}' -[{relation}]-> '{dest_name}' already exists")]
    DuplicateEdge {
        source_name: String,
        dest_name: String,
        relation: String,
    },

    #[error("song '{song}' by '{artist}' already exists")]
    DuplicateSong { song: String, artist: String },

    #[error("invalid value for audio feature '{feature}': {value}")]
    InvalidAudioFeature { feature: String, value: String },

    #[error("'{0}' is not a valid mode (expected major or minor)")]
    InvalidMode(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl KbError {
    pub fn is_storage(&self) -> bool {
        matches!(self, KbError::Storage(_))
    }

    /// True for the "name resolves to nothing" class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KbError::UnknownEntity(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, KbError::AmbiguousEntity { .. })
    }
}

pub type KbResult<T> = Result<T, KbError>;
