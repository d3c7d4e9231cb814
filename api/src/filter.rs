use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{PlayRecord, RawStreamRecord};

/// Plays at or below this many milliseconds are treated as skips.
pub const MIN_MS_PLAYED: i64 = 25_000;

/// Export fields that carry nothing useful for play counts. `PlayRecord` has
/// no slot for any of them, so they are gone once a row is reshaped; the list
/// is kept for logging and for checking the reshaped schema.
pub const DROPPED_FIELDS: &[&str] = &[
    "platform",
    "ip_addr",
    "shuffle",
    "offline",
    "offline_timestamp",
    "conn_country",
    "incognito_mode",
    "reason_start",
    "spotify_track_uri",
    "spotify_episode_uri",
    "audiobook_chapter_title",
    "audiobook_chapter_uri",
    "audiobook_title",
    "audiobook_uri",
    "episode_show_name",
    "episode_name",
    "skipped",
];

fn is_music_play(track_name: Option<&str>, ms_played: i64) -> bool {
    matches!(track_name, Some(name) if !name.is_empty()) && ms_played > MIN_MS_PLAYED
}

/// Parse an export timestamp and keep only the UTC calendar date.
pub fn parse_play_date(ts: &str) -> Result<NaiveDate> {
    let dt = DateTime::parse_from_rfc3339(ts)
        .with_context(|| format!("invalid timestamp '{}'", ts))?;
    Ok(dt.with_timezone(&Utc).date_naive())
}

/// Turn raw export records into music plays.
///
/// Rows without a track name (podcasts, audiobooks) and rows played for
/// `MIN_MS_PLAYED` or less are removed. Surviving rows are projected onto the
/// six-field schema; a timestamp that does not parse aborts the whole batch.
pub fn filter_history(raw: Vec<RawStreamRecord>) -> Result<Vec<PlayRecord>> {
    tracing::debug!(
        "filtering {} records, dropping fields: {}",
        raw.len(),
        DROPPED_FIELDS.join(", ")
    );

    let mut plays = Vec::with_capacity(raw.len());
    for record in raw {
        if !is_music_play(record.master_metadata_track_name.as_deref(), record.ms_played) {
            continue;
        }

        let ts = parse_play_date(&record.ts)?;
        let Some(track_name) = record.master_metadata_track_name else {
            continue;
        };

        plays.push(PlayRecord {
            ts,
            ms_played: record.ms_played,
            track_name,
            artist_name: record.master_metadata_album_artist_name,
            album_name: record.master_metadata_album_album_name,
            reason_end: record.reason_end,
        });
    }

    Ok(plays)
}

/// Apply the play predicate to rows that are already in the reshaped schema.
pub fn retain_plays(mut plays: Vec<PlayRecord>) -> Vec<PlayRecord> {
    plays.retain(|p| is_music_play(Some(&p.track_name), p.ms_played));
    plays
}
