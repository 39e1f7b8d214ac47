mod adjectives;
mod engine;

pub use adjectives::{Adjective, AdjectiveTable, Comparison, SongAttribute};
pub use engine::{CandidateOrder, FirstMatchPolicy, RecommendationEngine};
