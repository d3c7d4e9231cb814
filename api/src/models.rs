use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One entry of a streaming history export file.
///
/// Only `ts` and `ms_played` are mandatory; the rest are nullable in the
/// export and frequently missing from older dumps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamRecord {
    pub ts: String,
    pub ms_played: i64,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub conn_country: Option<String>,
    #[serde(default)]
    pub ip_addr: Option<String>,
    #[serde(default)]
    pub master_metadata_track_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_artist_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_album_name: Option<String>,
    #[serde(default)]
    pub spotify_track_uri: Option<String>,
    #[serde(default)]
    pub episode_name: Option<String>,
    #[serde(default)]
    pub episode_show_name: Option<String>,
    #[serde(default)]
    pub spotify_episode_uri: Option<String>,
    #[serde(default)]
    pub audiobook_title: Option<String>,
    #[serde(default)]
    pub audiobook_uri: Option<String>,
    #[serde(default)]
    pub audiobook_chapter_uri: Option<String>,
    #[serde(default)]
    pub audiobook_chapter_title: Option<String>,
    #[serde(default)]
    pub reason_start: Option<String>,
    #[serde(default)]
    pub reason_end: Option<String>,
    #[serde(default)]
    pub shuffle: Option<bool>,
    #[serde(default)]
    pub skipped: Option<bool>,
    #[serde(default)]
    pub offline: Option<bool>,
    #[serde(default)]
    pub offline_timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub incognito_mode: Option<bool>,
}

/// A filtered listening event in the six-field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PlayRecord {
    pub ts: NaiveDate,
    pub ms_played: i64,
    pub track_name: String,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub reason_end: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserPlayCount {
    pub username: String,
    pub plays: i64,
}
