//! Affinity profiles: which genres and artists a listener leans towards.
//!
//! Weight is accumulated from three sources and then ranked:
//!
//! - favorites: a favorited artist adds a large fixed weight, a favorited
//!   track adds a smaller fixed weight to each of its artists and genres
//! - history: every play inside the lookback window adds one to the played
//!   track's artists and genres
//! - interactions: the listener's top-scored interactions add their
//!   affinity score to the track's artists and genres
//!
//! Ties go to the most recently active id, then to the smaller id. Either
//! list may come back empty; callers fall back instead of failing.

use crate::model::{ArtistId, GenreId, ListenerId, Track, TrackId};
use crate::store::RecommendationStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub lookback_days: i64,
    /// How many top interactions to read.
    pub interaction_limit: usize,
    /// How many history entries to read inside the lookback window.
    pub history_limit: usize,
    pub favorite_artist_weight: f64,
    pub favorite_track_weight: f64,
    pub history_play_weight: f64,
    pub genre_cap: usize,
    pub artist_cap: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            interaction_limit: 50,
            history_limit: 500,
            favorite_artist_weight: 100.0,
            favorite_track_weight: 10.0,
            history_play_weight: 1.0,
            genre_cap: 3,
            artist_cap: 8,
        }
    }
}

/// Ranked top genres and artists, strongest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffinityProfile {
    pub genres: Vec<GenreId>,
    pub artists: Vec<ArtistId>,
}

impl AffinityProfile {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty() && self.artists.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Weight {
    total: f64,
    last_seen: DateTime<Utc>,
}

/// Accumulates weight per id and remembers the latest activity.
#[derive(Debug, Default)]
struct Tally {
    weights: HashMap<i64, Weight>,
}

impl Tally {
    fn add(&mut self, id: i64, weight: f64, at: DateTime<Utc>) {
        if !weight.is_finite() || weight <= 0.0 {
            return;
        }
        let entry = self.weights.entry(id).or_insert(Weight {
            total: 0.0,
            last_seen: at,
        });
        entry.total += weight;
        entry.last_seen = entry.last_seen.max(at);
    }

    fn ranked(self, cap: Option<usize>) -> Vec<(i64, f64)> {
        let mut entries: Vec<(i64, Weight)> = self.weights.into_iter().collect();
        entries.sort_by(|(id_a, a), (id_b, b)| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| id_a.cmp(id_b))
        });
        entries
            .into_iter()
            .take(cap.unwrap_or(usize::MAX))
            .map(|(id, weight)| (id, weight.total))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Tallies {
    genres: Tally,
    artists: Tally,
}

impl Tallies {
    fn add_track(&mut self, track: &Track, weight: f64, at: DateTime<Utc>) {
        for &artist in &track.artist_ids {
            self.artists.add(artist, weight, at);
        }
        for &genre in &track.genre_ids {
            self.genres.add(genre, weight, at);
        }
    }
}

fn collect_tallies(
    store: &dyn RecommendationStore,
    listener_id: ListenerId,
    now: DateTime<Utc>,
    config: &ProfileConfig,
) -> Result<Tallies> {
    let mut tallies = Tallies::default();

    for artist in store
        .favorite_artists_by_listener(listener_id)
        .context("Failed to read favorite artists")?
    {
        tallies.artists.add(artist, config.favorite_artist_weight, now);
    }

    let favorite_tracks = store
        .favorite_tracks_by_listener(listener_id)
        .context("Failed to read favorite tracks")?;
    for track in store.tracks_by_ids(&favorite_tracks)? {
        tallies.add_track(&track, config.favorite_track_weight, now);
    }

    let since = now - Duration::days(config.lookback_days);
    let history = store
        .history_since(listener_id, since, config.history_limit)
        .context("Failed to read listening history")?;
    let interactions = store
        .top_interactions_by_listener(listener_id, config.interaction_limit)
        .context("Failed to read top interactions")?;

    let mut wanted: Vec<TrackId> = history
        .iter()
        .map(|event| event.track_id)
        .chain(interactions.iter().map(|interaction| interaction.track_id))
        .collect();
    let mut seen = HashSet::new();
    wanted.retain(|id| seen.insert(*id));
    let tracks: HashMap<TrackId, Track> = store
        .tracks_by_ids(&wanted)?
        .into_iter()
        .map(|track| (track.id, track))
        .collect();

    for event in &history {
        if let Some(track) = tracks.get(&event.track_id) {
            tallies.add_track(track, config.history_play_weight, event.played_at);
        }
    }
    for interaction in &interactions {
        if let Some(track) = tracks.get(&interaction.track_id) {
            tallies.add_track(track, interaction.affinity_score, interaction.updated_at);
        }
    }

    Ok(tallies)
}

/// Top genres and artists for `listener_id`, capped per [`ProfileConfig`].
pub fn build_profile(
    store: &dyn RecommendationStore,
    listener_id: ListenerId,
    now: DateTime<Utc>,
    config: &ProfileConfig,
) -> Result<AffinityProfile> {
    let tallies = collect_tallies(store, listener_id, now, config)?;
    let profile = AffinityProfile {
        genres: ids(tallies.genres.ranked(Some(config.genre_cap))),
        artists: ids(tallies.artists.ranked(Some(config.artist_cap))),
    };
    debug!(
        "Profile of listener {listener_id}: genres {:?}, artists {:?}",
        profile.genres, profile.artists
    );
    Ok(profile)
}

/// Every artist the listener has any signal for, with its weight, strongest
/// first and without a cap.
pub fn rank_artists(
    store: &dyn RecommendationStore,
    listener_id: ListenerId,
    now: DateTime<Utc>,
    config: &ProfileConfig,
) -> Result<Vec<(ArtistId, f64)>> {
    Ok(collect_tallies(store, listener_id, now, config)?
        .artists
        .ranked(None))
}

fn ids(ranked: Vec<(i64, f64)>) -> Vec<i64> {
    ranked.into_iter().map(|(id, _)| id).collect()
}
