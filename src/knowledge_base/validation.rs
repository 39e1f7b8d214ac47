//! Input checks run before anything touches the database.

use super::error::{KbError, KbResult};
use super::models::{EntityType, NewSong};

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

/// Features bounded to the unit interval.
const UNIT_FEATURES: &[&str] = &[
    "acousticness",
    "danceability",
    "energy",
    "instrumentalness",
    "liveness",
    "speechiness",
    "valence",
];

pub fn validate_name(name: &str, entity_type: EntityType) -> KbResult<()> {
    if name.trim().is_empty() {
        return Err(KbError::EmptyName { entity_type });
    }
    Ok(())
}

pub fn validate_score(score: i64) -> KbResult<()> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(KbError::InvalidScore(score));
    }
    Ok(())
}

fn invalid(feature: &str, value: impl ToString) -> KbError {
    KbError::InvalidAudioFeature {
        feature: feature.to_string(),
        value: value.to_string(),
    }
}

/// Validate every populated attribute of a new song.
pub fn validate_new_song(song: &NewSong) -> KbResult<()> {
    if let Some(duration) = song.duration_ms {
        if duration < 0 {
            return Err(invalid("duration_ms", duration));
        }
    }
    if let Some(popularity) = song.popularity {
        if !(0..=100).contains(&popularity) {
            return Err(invalid("popularity", popularity));
        }
    }

    let features = &song.audio_features;
    for (feature, value) in features.reals() {
        let Some(value) = value else { continue };
        if !value.is_finite() {
            return Err(invalid(feature, value));
        }
        if UNIT_FEATURES.contains(&feature) && !(0.0..=1.0).contains(&value) {
            return Err(invalid(feature, value));
        }
        if feature == "tempo" && value < 0.0 {
            return Err(invalid(feature, value));
        }
    }
    if let Some(key) = features.musical_key {
        // -1 means no key was detected
        if !(-1..=11).contains(&key) {
            return Err(invalid("musical_key", key));
        }
    }
    if let Some(time_signature) = features.time_signature {
        if !(1..=12).contains(&time_signature) {
            return Err(invalid("time_signature", time_signature));
        }
    }
    Ok(())
}
