//! Shared constants for end-to-end tests
//!
//! Names and attribute values of the reference catalog. When the catalog
//! changes, update only this file and `fixtures.rs`.

// ============================================================================
// Artists
// ============================================================================

pub const JUSTIN_BIEBER: &str = "Justin Bieber";
pub const JUSTIN_TIMBERLAKE: &str = "Justin Timberlake";
pub const U2: &str = "U2";
pub const SHAWN_MENDES: &str = "Shawn Mendes";

pub const JUSTIN_BIEBER_FOLLOWERS: i64 = 4000;

// ============================================================================
// Genres
// ============================================================================

pub const POP: &str = "Pop";
pub const SUPER_POP: &str = "Super pop";

// ============================================================================
// Songs
// ============================================================================

/// By Justin Bieber, popularity 10
pub const DESPACITO: &str = "Despacito";

/// By Justin Bieber, popularity 20
pub const SORRY: &str = "Sorry";

/// By Justin Timberlake, popularity 30
pub const ROCK_YOUR_BODY: &str = "Rock Your Body";

/// By U2, popularity 60
pub const BEAUTIFUL_DAY: &str = "Beautiful Day";

/// By Shawn Mendes, popularity 70
pub const IN_MY_BLOOD: &str = "In My Blood";

pub const DESPACITO_DURATION_MS: i64 = 222_222;
pub const DESPACITO_POPULARITY: i64 = 10;
pub const SORRY_POPULARITY: i64 = 20;

pub const ALL_SONGS: [&str; 5] = [DESPACITO, ROCK_YOUR_BODY, BEAUTIFUL_DAY, IN_MY_BLOOD, SORRY];
pub const ALL_ARTISTS: [&str; 4] = [JUSTIN_BIEBER, JUSTIN_TIMBERLAKE, U2, SHAWN_MENDES];
