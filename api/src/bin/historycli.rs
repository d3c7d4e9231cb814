use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use streaming_history_api::{
    aggregate::{self, HistorySummary},
    config::Config,
    db::{self, TopCategory},
    import,
};

#[derive(Parser)]
#[command(name = "historycli")]
#[command(about = "streaming history import and stats tool", long_about = None)]
struct Cli {
    /// Database URL, overrides DATABASE_URL
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a directory of streaming history exports for a user
    Import {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Show per-artist play counts
    Summary {
        #[arg(value_name = "USERNAME")]
        username: String,

        /// Summarize export files directly instead of stored history
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Print the full nested summary as JSON
        #[arg(long)]
        json: bool,

        /// Number of artists to list
        #[arg(short = 'n', long, default_value_t = 10)]
        top: usize,
    },

    /// Show top artists, tracks or albums from stored history
    Top {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(short, long, default_value = "artists")]
        category: TopCategory,

        #[arg(short = 'n', long, default_value_t = 10)]
        limit: u32,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// List users with their stored play counts
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    streaming_history_api::init_tracing("historycli=info,streaming_history_api=info");

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }

    match cli.command {
        Commands::Import { username, dir } => handle_import(&config, &username, dir).await,
        Commands::Summary {
            username,
            dir,
            json,
            top,
        } => handle_summary(&config, &username, dir, json, top).await,
        Commands::Top {
            username,
            category,
            limit,
            from,
            to,
        } => handle_top(&config, &username, category, limit, from, to).await,
        Commands::Users => handle_users(&config).await,
    }
}

async fn open_db(config: &Config) -> Result<sqlx::SqlitePool> {
    db::init_db(&config.database_url)
        .await
        .context("Failed to initialize database")
}

async fn handle_import(config: &Config, username: &str, dir: PathBuf) -> Result<()> {
    let pool = open_db(config).await?;

    let report = import::import_directory(&pool, username, &dir)
        .await
        .with_context(|| format!("Failed to import {}", dir.display()))?;

    tracing::info!(
        "Imported {} of {} records for '{}' (user id {})",
        report.stored_records,
        report.raw_records,
        username,
        report.user_id
    );

    Ok(())
}

async fn handle_summary(
    config: &Config,
    username: &str,
    dir: Option<PathBuf>,
    json: bool,
    top: usize,
) -> Result<()> {
    let summary = match dir {
        Some(dir) => import::summarize_directory(&dir, username).await?,
        None => {
            let pool = open_db(config).await?;
            if db::find_user(&pool, username).await?.is_none() {
                return Err(anyhow!("No stored history for user '{}'", username));
            }
            let plays = db::fetch_history(&pool, username).await?;
            aggregate::summarize(&plays, username)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, top);
    }

    Ok(())
}

fn print_summary(summary: &HistorySummary, top: usize) {
    println!(
        "{}: {} plays across {} artists",
        summary.username,
        summary.total_plays,
        summary.artists.len()
    );

    for (rank, (name, plays)) in summary.top_artists(top).into_iter().enumerate() {
        println!("{:>3}. {} ({} plays)", rank + 1, name, plays);

        let Some(artist) = summary.artists.get(name) else {
            continue;
        };
        if let Some((track, count)) = artist.tracks.iter().max_by_key(|(_, c)| **c) {
            println!("       top track: {} ({})", track, count);
        }
    }
}

async fn handle_top(
    config: &Config,
    username: &str,
    category: TopCategory,
    limit: u32,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let pool = open_db(config).await?;

    let user = db::find_user(&pool, username)
        .await?
        .ok_or_else(|| anyhow!("No stored history for user '{}'", username))?;

    let start = from.unwrap_or_else(db::history_start);
    let end = to.unwrap_or_else(|| Utc::now().date_naive());

    let items = db::fetch_top_items(&pool, user.id, start, end, limit, category).await?;
    if items.is_empty() {
        tracing::warn!("No plays found for {} between {} and {}", username, start, end);
        return Ok(());
    }

    for (rank, item) in items.iter().enumerate() {
        match &item.artist {
            Some(artist) => println!(
                "{:>3}. {} - {} ({} plays, {:.0} min)",
                rank + 1,
                item.name,
                artist,
                item.plays,
                item.minutes
            ),
            None => println!(
                "{:>3}. {} ({} plays, {:.0} min)",
                rank + 1,
                item.name,
                item.plays,
                item.minutes
            ),
        }
    }

    Ok(())
}

async fn handle_users(config: &Config) -> Result<()> {
    let pool = open_db(config).await?;
    let users = db::list_users(&pool).await?;

    if users.is_empty() {
        tracing::info!("No users in database");
        return Ok(());
    }

    println!("users in database:");
    for user in users {
        println!("  {} - {} plays", user.username, user.plays);
    }

    Ok(())
}
