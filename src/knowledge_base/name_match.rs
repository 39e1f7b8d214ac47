//! Name matching shared by every lookup of the store.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// SQL function lowercasing its argument, non-ASCII letters included.
/// Registered on every connection by [`register_fold_case`].
pub(crate) const FOLD_CASE_FN: &str = "fold_case";

/// Register [`FOLD_CASE_FN`] on `conn`. SQLite's own `LIKE` only folds ASCII.
pub(crate) fn register_fold_case(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        FOLD_CASE_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|s| s.to_lowercase()))
        },
    )
}

/// How an entity name given by a caller is matched against stored names.
///
/// Both strategies are case-insensitive (Unicode-aware) and treat `%`/`_` in the input
/// literally. One matcher is shared by every lookup of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatching {
    #[default]
    Exact,
    Contains,
}

impl NameMatching {
    /// SQL predicate on `column`, to be bound with [`NameMatching::pattern`].
    pub fn predicate(&self, column: &str) -> String {
        format!(
            "{fold}({}) LIKE {fold}(?) ESCAPE '\\'",
            column,
            fold = FOLD_CASE_FN
        )
    }

    pub fn pattern(&self, name: &str) -> String {
        let escaped = escape_like(name.trim());
        match self {
            NameMatching::Exact => escaped,
            NameMatching::Contains => format!("%{}%", escaped),
        }
    }
}

impl FromStr for NameMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(NameMatching::Exact),
            "contains" => Ok(NameMatching::Contains),
            other => Err(format!("unknown name matching '{}'", other)),
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
