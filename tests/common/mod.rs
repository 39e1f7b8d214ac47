//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestKb, DESPACITO};
//!
//! #[test]
//! fn test_song_lookup() {
//!     let test_kb = TestKb::reference();
//!     assert_eq!(test_kb.kb.song_data(Some(DESPACITO), None).unwrap().len(), 1);
//! }
//! ```

#[allow(dead_code)]
mod constants;
#[allow(dead_code)]
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{populate_reference_catalog, reference_seed_path, TestKb};
