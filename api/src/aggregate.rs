use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::PlayRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistSummary {
    pub total_plays: u64,
    pub tracks: BTreeMap<String, u64>,
    pub albums: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub username: String,
    pub total_plays: u64,
    pub artists: BTreeMap<String, ArtistSummary>,
}

/// Group plays by artist, then count tracks and albums within each artist.
///
/// Keys are compared verbatim, so "Beatles" and "beatles" are two artists.
/// Plays without an artist still count toward `total_plays`.
pub fn summarize(plays: &[PlayRecord], username: &str) -> HistorySummary {
    let mut artists: BTreeMap<String, ArtistSummary> = BTreeMap::new();

    for play in plays {
        let Some(artist_name) = play.artist_name.as_ref() else {
            continue;
        };

        let artist = artists.entry(artist_name.clone()).or_default();
        artist.total_plays += 1;
        *artist.tracks.entry(play.track_name.clone()).or_insert(0) += 1;
        if let Some(album) = &play.album_name {
            *artist.albums.entry(album.clone()).or_insert(0) += 1;
        }
    }

    HistorySummary {
        username: username.to_string(),
        total_plays: plays.len() as u64,
        artists,
    }
}

impl HistorySummary {
    /// The `n` most played artists, ties broken by name.
    pub fn top_artists(&self, n: usize) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self
            .artists
            .iter()
            .map(|(name, summary)| (name.as_str(), summary.total_plays))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(n);
        ranked
    }
}
