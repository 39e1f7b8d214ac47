mod error;
mod models;
mod name_match;
mod schema;
mod store;
mod trait_def;
mod validation;

pub use error::{KbError, KbResult};
pub use models::*;
pub use name_match::NameMatching;
pub use schema::KB_VERSIONED_SCHEMAS;
pub use store::{SqliteKnowledgeBase, GENRE_EDGE_SCORE};
pub use trait_def::KnowledgeBase;
pub use validation::{MAX_SCORE, MIN_SCORE};
