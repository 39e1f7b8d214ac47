//! End-to-end tests for the command line binary

mod common;

use common::*;
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn muze(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_muze-kb"))
        .arg("--db")
        .arg(db)
        .arg("--seed")
        .arg("42")
        .args(args)
        .env("LOG_LEVEL", "warn")
        .output()
        .unwrap()
}

/// Every JSON document printed on stdout.
fn json_docs(output: &Output) -> Vec<Value> {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::Deserializer::from_slice(&output.stdout)
        .into_iter::<Value>()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn seeded_db() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("kb.db");
    let seed = reference_seed_path();
    let docs = json_docs(&muze(&db, &["init", "--seed-file", seed.to_str().unwrap()]));

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["artists_imported"], 4);
    assert_eq!(docs[0]["songs_imported"], 5);
    assert_eq!(docs[0]["edges_imported"], 5);
    assert_eq!(docs[0]["errors"], 0);
    assert_eq!(docs[1]["song"], 5);
    assert_eq!(docs[1]["artist"], 4);
    assert_eq!(docs[1]["genre"], 2);
    (dir, db)
}

#[test]
fn test_init_without_seed_creates_empty_db() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("kb.db");

    let docs = json_docs(&muze(&db, &["init"]));

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["song"], 0);
    assert!(db.exists());
}

#[test]
fn test_recommend_after_seed_import() {
    let (_dir, db) = seeded_db();

    let docs = json_docs(&muze(&db, &["recommend", DESPACITO, "more popular"]));
    let hits = docs[0].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["song_name"], SORRY);
    assert_eq!(hits[0]["artist_name"], JUSTIN_BIEBER);

    let docs = json_docs(&muze(
        &db,
        &["recommend", DESPACITO, "more popular", "--limit", "10"],
    ));
    let names: Vec<&str> = docs[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["song_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec![SORRY, ROCK_YOUR_BODY, IN_MY_BLOOD]);
}

#[test]
fn test_song_shows_record() {
    let (_dir, db) = seeded_db();

    let docs = json_docs(&muze(&db, &["song", DESPACITO]));
    let songs = docs[0].as_array().unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0]["popularity"], DESPACITO_POPULARITY);
    assert_eq!(songs[0]["duration_ms"], DESPACITO_DURATION_MS);
    assert_eq!(songs[0]["mode"], "major");
    assert_eq!(songs[0]["artist_name"], JUSTIN_BIEBER);
}

#[test]
fn test_related_and_similar() {
    let (_dir, db) = seeded_db();

    let docs = json_docs(&muze(&db, &["related", SHAWN_MENDES]));
    assert_eq!(docs[0], serde_json::json!([JUSTIN_BIEBER]));

    let docs = json_docs(&muze(&db, &["similar", DESPACITO]));
    assert_eq!(docs[0]["song_name"], ROCK_YOUR_BODY);

    let docs = json_docs(&muze(&db, &["similar", BEAUTIFUL_DAY]));
    assert_eq!(docs[0], Value::Null);
}

#[test]
fn test_write_commands() {
    let (_dir, db) = seeded_db();

    let docs = json_docs(&muze(
        &db,
        &[
            "add-song",
            "Baby",
            JUSTIN_BIEBER,
            "--popularity",
            "90",
            "--features",
            r#"{"valence": 0.95}"#,
        ],
    ));
    assert!(docs[0]["id"].is_i64());

    let docs = json_docs(&muze(&db, &["songs-by", JUSTIN_BIEBER]));
    let names: Vec<&str> = docs[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["song_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec![DESPACITO, SORRY, "Baby"]);

    json_docs(&muze(&db, &["connect", U2, SHAWN_MENDES, "--score", "10"]));
    let docs = json_docs(&muze(&db, &["related", U2]));
    assert_eq!(docs[0], serde_json::json!([SHAWN_MENDES]));
}

#[test]
fn test_songs_by_reports_unknown_and_ambiguous_artists() {
    let (_dir, db) = seeded_db();

    let docs = json_docs(&muze(&db, &["songs-by", "Justin"]));
    assert_eq!(docs[0]["status"], "not_found");
    assert_eq!(docs[0]["artist"], "Justin");

    let docs = json_docs(&muze(&db, &["--name-matching", "contains", "songs-by", "Justin"]));
    assert_eq!(docs[0]["status"], "ambiguous");
    assert!(docs[0]["message"].as_str().unwrap().contains("2 matching"));

    let docs = json_docs(&muze(&db, &["songs-by", U2]));
    assert_eq!(docs[0].as_array().unwrap().len(), 1);
}

#[test]
fn test_rejected_write_fails_with_message() {
    let (_dir, db) = seeded_db();

    let output = muze(&db, &["add-song", DESPACITO, JUSTIN_BIEBER]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(DESPACITO), "stderr: {}", stderr);

    let output = muze(&db, &["connect", U2, SHAWN_MENDES, "--score", "101"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_db_is_an_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_muze-kb"))
        .arg("songs")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("db_path"));
}
