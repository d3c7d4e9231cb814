use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::models::{PlayRecord, User, UserPlayCount};

pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url '{}'", database_url))?;
    open_pool(options).await
}

/// Open (creating if needed) a database file directly by path.
pub async fn init_db_file(path: impl AsRef<Path>) -> Result<SqlitePool> {
    open_pool(SqliteConnectOptions::new().filename(path.as_ref())).await
}

async fn open_pool(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_with(options)
        .await
        .context("failed to connect to sqlite database")?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Insert the user if absent and return its id.
pub async fn get_or_create_user(pool: &SqlitePool, username: &str) -> Result<i64> {
    let created = sqlx::query("INSERT OR IGNORE INTO users (username) VALUES (?)")
        .bind(username)
        .execute(pool)
        .await?
        .rows_affected();

    let user_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await?;

    if created > 0 {
        tracing::info!("created user '{}' with id {}", username, user_id);
    } else {
        tracing::debug!("found existing user '{}' with id {}", username, user_id);
    }

    Ok(user_id)
}

pub async fn find_user(pool: &SqlitePool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT id, username FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<UserPlayCount>> {
    let users = sqlx::query_as::<_, UserPlayCount>(
        r#"
        SELECT u.username, COUNT(h.id) AS plays
        FROM users u
        LEFT JOIN streaming_history h ON h.user_id = u.id
        GROUP BY u.id, u.username
        ORDER BY plays DESC, u.username
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(users)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReport {
    pub user_id: i64,
    pub inserted: u64,
}

/// Append plays to the user's history.
///
/// The user row is created up front and committed on its own; the history
/// rows go in as one transaction. Existing rows are never matched, so storing
/// the same plays twice doubles them.
pub async fn store_history(
    pool: &SqlitePool,
    username: &str,
    plays: &[PlayRecord],
) -> Result<StoreReport> {
    let user_id = get_or_create_user(pool, username).await?;

    let mut tx = pool.begin().await.map_err(|e| {
        tracing::error!("Failed to begin transaction: {}", e);
        e
    })?;

    let mut inserted = 0;
    for play in plays {
        inserted += sqlx::query(
            r#"
            INSERT INTO streaming_history (
                user_id, ts, ms_played, track_name, artist_name, album_name, reason_end
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(play.ts)
        .bind(play.ms_played)
        .bind(&play.track_name)
        .bind(&play.artist_name)
        .bind(&play.album_name)
        .bind(&play.reason_end)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert play '{}' for {}: {}", play.track_name, username, e);
            e
        })?
        .rows_affected();
    }

    tx.commit().await.map_err(|e| {
        tracing::error!("Failed to commit transaction: {}", e);
        e
    })?;

    Ok(StoreReport { user_id, inserted })
}

pub async fn fetch_history(pool: &SqlitePool, username: &str) -> Result<Vec<PlayRecord>> {
    let plays = sqlx::query_as::<_, PlayRecord>(
        r#"
        SELECT h.ts, h.ms_played, h.track_name, h.artist_name, h.album_name, h.reason_end
        FROM streaming_history h
        JOIN users u ON u.id = h.user_id
        WHERE u.username = ?
        ORDER BY h.id
        "#,
    )
    .bind(username)
    .fetch_all(pool)
    .await?;
    Ok(plays)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopCategory {
    Artists,
    Tracks,
    Albums,
}

impl FromStr for TopCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "artists" => Ok(Self::Artists),
            "tracks" => Ok(Self::Tracks),
            "albums" => Ok(Self::Albums),
            other => Err(anyhow!(
                "unknown category '{}', expected artists, tracks or albums",
                other
            )),
        }
    }
}

impl TopCategory {
    fn query(self) -> &'static str {
        match self {
            Self::Artists => {
                r#"
                SELECT artist_name AS name, NULL AS artist,
                       COUNT(*) AS plays, SUM(ms_played) AS total_ms
                FROM streaming_history
                WHERE user_id = ? AND ts BETWEEN ? AND ? AND artist_name IS NOT NULL
                GROUP BY artist_name
                ORDER BY plays DESC, name
                LIMIT ?
                "#
            }
            Self::Tracks => {
                r#"
                SELECT track_name AS name, artist_name AS artist,
                       COUNT(*) AS plays, SUM(ms_played) AS total_ms
                FROM streaming_history
                WHERE user_id = ? AND ts BETWEEN ? AND ?
                GROUP BY track_name, artist_name
                ORDER BY plays DESC, name
                LIMIT ?
                "#
            }
            Self::Albums => {
                r#"
                SELECT album_name AS name, artist_name AS artist,
                       COUNT(*) AS plays, SUM(ms_played) AS total_ms
                FROM streaming_history
                WHERE user_id = ? AND ts BETWEEN ? AND ? AND album_name IS NOT NULL
                GROUP BY album_name, artist_name
                ORDER BY plays DESC, name
                LIMIT ?
                "#
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub plays: i64,
    pub minutes: f64,
}

/// Default lower bound for date-range queries.
pub fn history_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

/// Most played artists, tracks or albums for a user between two dates
/// (inclusive).
pub async fn fetch_top_items(
    pool: &SqlitePool,
    user_id: i64,
    start: NaiveDate,
    end: NaiveDate,
    top_n: u32,
    category: TopCategory,
) -> Result<Vec<TopItem>> {
    let rows = sqlx::query(category.query())
        .bind(user_id)
        .bind(start)
        .bind(end)
        .bind(i64::from(top_n))
        .fetch_all(pool)
        .await?;

    let items = rows
        .iter()
        .map(|row| {
            let total_ms: i64 = row.try_get("total_ms")?;
            Ok(TopItem {
                name: row.try_get("name")?,
                artist: row.try_get("artist")?,
                plays: row.try_get("plays")?,
                minutes: total_ms as f64 / (1000.0 * 60.0),
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .context("failed to decode top items")?;

    Ok(items)
}
