//! Muze knowledge base library
//!
//! A typed song/artist/genre graph stored in SQLite, plus the traversal that
//! turns "something like X but happier" into a concrete track.

pub mod config;
pub mod knowledge_base;
pub mod recommend;
pub mod seed;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use knowledge_base::{KbError, KnowledgeBase, SqliteKnowledgeBase};
pub use recommend::{AdjectiveTable, RecommendationEngine};
