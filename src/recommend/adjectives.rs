//! Mapping from comparison phrases to song attributes.

use crate::knowledge_base::SongRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Song attribute an adjective can compare on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SongAttribute {
    Acousticness,
    Valence,
    Danceability,
    Popularity,
    DurationMs,
}

impl SongAttribute {
    pub fn name(&self) -> &'static str {
        match self {
            SongAttribute::Acousticness => "acousticness",
            SongAttribute::Valence => "valence",
            SongAttribute::Danceability => "danceability",
            SongAttribute::Popularity => "popularity",
            SongAttribute::DurationMs => "duration_ms",
        }
    }

    /// Attribute value of `song`, if recorded.
    pub fn value(&self, song: &SongRecord) -> Option<f64> {
        match self {
            SongAttribute::Acousticness => song.acousticness,
            SongAttribute::Valence => song.valence,
            SongAttribute::Danceability => song.danceability,
            SongAttribute::Popularity => song.popularity.map(|v| v as f64),
            SongAttribute::DurationMs => song.duration_ms.map(|v| v as f64),
        }
    }
}

impl fmt::Display for SongAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Greater,
    Less,
}

impl Comparison {
    /// Strict comparison; equal values never hold.
    pub fn holds(&self, a: f64, b: f64) -> bool {
        match self {
            Comparison::Greater => a > b,
            Comparison::Less => a < b,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Adjective {
    pub attribute: SongAttribute,
    pub comparison: Comparison,
}

/// Immutable phrase table, built once and shared.
#[derive(Clone, Debug)]
pub struct AdjectiveTable {
    entries: BTreeMap<String, Adjective>,
}

impl AdjectiveTable {
    /// The built-in vocabulary.
    pub fn standard() -> Self {
        use Comparison::*;
        use SongAttribute::*;

        Self::from_entries([
            ("more acoustic", Acousticness, Greater),
            ("less acoustic", Acousticness, Less),
            ("happier", Valence, Greater),
            ("sadder", Valence, Less),
            ("dancier", Danceability, Greater),
            ("less dancey", Danceability, Less),
            ("more popular", Popularity, Greater),
            ("less popular", Popularity, Less),
            ("longer", DurationMs, Greater),
            // same direction as "longer", as observed
            ("shorter", DurationMs, Greater),
        ])
    }

    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (&'a str, SongAttribute, Comparison)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(phrase, attribute, comparison)| {
                (
                    normalize(phrase),
                    Adjective {
                        attribute,
                        comparison,
                    },
                )
            })
            .collect();
        AdjectiveTable { entries }
    }

    pub fn get(&self, phrase: &str) -> Option<Adjective> {
        self.entries.get(&normalize(phrase)).copied()
    }

    /// All entries, sorted by phrase.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Adjective)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}
