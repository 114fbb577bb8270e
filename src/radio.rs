//! Artist radio: composition of a single radio and freshness of the radios
//! a listener already has.
//!
//! A radio for seed artist `A` holds `T` tracks, `T` drawn once from
//! `[min_tracks, max_tracks]`, split into three segments:
//!
//! - own: `round(own_ratio * T)` shuffled tracks by `A`
//! - related: half of the remainder, from artists in the listener's recent
//!   history whose tracks share a genre with `A` (never tracks by `A`)
//! - genre: the rest, sampled from `A`'s genres (never tracks by `A` and
//!   never a track already picked)
//!
//! A segment that comes up short stays short, so a radio may hold fewer
//! than `T` tracks but never more.

use crate::generators::select_cover;
use crate::model::{ArtistId, GenreId, ListenerId, Playlist, PlaylistDraft, PlaylistKey, PlaylistType, Track, TrackId};
use crate::store::RecommendationStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// A radio untouched for longer than this is stale.
    pub staleness_days: i64,
    pub min_tracks: usize,
    pub max_tracks: usize,
    /// Share of the seed artist's own catalog.
    pub own_ratio: f64,
    /// Radios kept per listener when no target is given.
    pub default_target: usize,
    /// Window of history scanned for related artists.
    pub history_lookback_days: i64,
    pub history_limit: usize,
    /// Tracks read per seed genre before sampling.
    pub genre_pool: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            staleness_days: 7,
            min_tracks: 20,
            max_tracks: 30,
            own_ratio: 0.6,
            default_target: 5,
            history_lookback_days: 30,
            history_limit: 200,
            genre_pool: 100,
        }
    }
}

impl RadioConfig {
    #[must_use]
    pub fn staleness(&self) -> Duration {
        Duration::days(self.staleness_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Missing,
    Fresh,
    Stale,
}

/// Stale iff `now - updated_at > staleness`.
#[must_use]
pub fn radio_state(existing: Option<&Playlist>, now: DateTime<Utc>, staleness: Duration) -> RadioState {
    match existing {
        None => RadioState::Missing,
        Some(playlist) if now - playlist.updated_at > staleness => RadioState::Stale,
        Some(_) => RadioState::Fresh,
    }
}

/// Per-segment sizes for a radio of `total` tracks.
#[must_use]
pub fn segment_targets(total: usize, own_ratio: f64) -> (usize, usize, usize) {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let own = ((total as f64 * own_ratio).round() as usize).min(total);
    let rest = total - own;
    let related = rest / 2;
    (own, related, rest - related)
}

/// The three segments of one radio, before the final shuffle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioMix {
    pub own: Vec<Track>,
    pub related: Vec<Track>,
    pub genre: Vec<Track>,
}

impl RadioMix {
    #[must_use]
    pub fn len(&self) -> usize {
        self.own.len() + self.related.len() + self.genre.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All segments concatenated and shuffled.
    pub fn into_tracks<R: Rng + ?Sized>(self, rng: &mut R) -> Vec<Track> {
        let mut tracks = self.own;
        tracks.extend(self.related);
        tracks.extend(self.genre);
        tracks.shuffle(rng);
        tracks
    }
}

/// Take up to `count` shuffled tracks from `pool` that pass `keep`,
/// recording their ids in `selected`.
fn sample<R: Rng + ?Sized>(
    pool: &[Track],
    count: usize,
    selected: &mut HashSet<TrackId>,
    keep: impl Fn(&Track) -> bool,
    rng: &mut R,
) -> Vec<Track> {
    let mut eligible: Vec<&Track> = pool
        .iter()
        .filter(|track| track.active && !selected.contains(&track.id) && keep(track))
        .collect();
    eligible.shuffle(rng);

    let mut picked = Vec::with_capacity(count);
    for track in eligible {
        if picked.len() == count {
            break;
        }
        if selected.insert(track.id) {
            picked.push(track.clone());
        }
    }
    picked
}

/// Compose a radio of `total` tracks for `seed_artist`.
///
/// Pure: every input is already loaded. `related` should hold tracks of
/// related artists and `genre_pool` tracks of the seed's genres; both are
/// filtered again here.
pub fn compose_artist_radio<R: Rng + ?Sized>(
    seed_artist: ArtistId,
    seed_tracks: &[Track],
    related: &[Track],
    genre_pool: &[Track],
    total: usize,
    own_ratio: f64,
    rng: &mut R,
) -> RadioMix {
    let (own_target, related_target, genre_target) = segment_targets(total, own_ratio);
    let seed_genres = genres_of(seed_tracks);
    let mut selected = HashSet::new();

    let own = sample(seed_tracks, own_target, &mut selected, |t| t.has_artist(seed_artist), rng);
    let related = sample(
        related,
        related_target,
        &mut selected,
        |t| !t.has_artist(seed_artist) && t.shares_genre(&seed_genres),
        rng,
    );
    let genre = sample(
        genre_pool,
        genre_target,
        &mut selected,
        |t| !t.has_artist(seed_artist),
        rng,
    );

    trace!(
        "Radio for artist {seed_artist}: {}/{own_target} own, {}/{related_target} related, {}/{genre_target} genre",
        own.len(),
        related.len(),
        genre.len()
    );
    RadioMix { own, related, genre }
}

fn genres_of(tracks: &[Track]) -> Vec<GenreId> {
    let mut genres: Vec<GenreId> = tracks
        .iter()
        .flat_map(|track| track.genre_ids.iter().copied())
        .collect();
    genres.sort_unstable();
    genres.dedup();
    genres
}

/// Catalogs of the artists in a listener's recent history, most recently
/// heard artist first. Each catalog is read once, however many history
/// entries or radios need it.
#[derive(Debug, Default)]
pub struct RelatedArtistIndex {
    artists: Vec<ArtistId>,
    catalogs: HashMap<ArtistId, Vec<Track>>,
}

impl RelatedArtistIndex {
    pub fn from_history(
        store: &dyn RecommendationStore,
        listener_id: ListenerId,
        now: DateTime<Utc>,
        config: &RadioConfig,
    ) -> Result<Self> {
        let since = now - Duration::days(config.history_lookback_days);
        let history = store
            .history_since(listener_id, since, config.history_limit)
            .with_context(|| format!("Failed to read history of listener {listener_id}"))?;
        let track_ids: Vec<TrackId> = history.iter().map(|event| event.track_id).collect();

        let mut index = Self::default();
        for track in store.tracks_by_ids(&track_ids)? {
            for &artist in &track.artist_ids {
                if index.catalogs.contains_key(&artist) {
                    continue;
                }
                let catalog = store
                    .tracks_by_artist(artist)
                    .with_context(|| format!("Failed to read catalog of artist {artist}"))?;
                index.catalogs.insert(artist, catalog);
                index.artists.push(artist);
            }
        }
        debug!(
            "Related-artist index for listener {listener_id}: {} artists",
            index.artists.len()
        );
        Ok(index)
    }

    /// Tracks of indexed artists other than `seed_artist` sharing a genre
    /// with `seed_genres`. Tracks credited to the seed are left out.
    #[must_use]
    pub fn related_tracks(&self, seed_artist: ArtistId, seed_genres: &[GenreId]) -> Vec<Track> {
        let mut seen = HashSet::new();
        self.artists
            .iter()
            .filter(|&&artist| artist != seed_artist)
            .filter_map(|artist| self.catalogs.get(artist))
            .flatten()
            .filter(|track| !track.has_artist(seed_artist) && track.shares_genre(seed_genres))
            .filter(|track| seen.insert(track.id))
            .cloned()
            .collect()
    }
}

/// Build the draft of one artist radio.
///
/// # Errors
///
/// When the seed artist has no active tracks, or the store fails.
pub fn build_radio_draft(
    store: &dyn RecommendationStore,
    listener_id: ListenerId,
    seed_artist: ArtistId,
    index: &RelatedArtistIndex,
    config: &RadioConfig,
    rng: &mut dyn RngCore,
) -> Result<PlaylistDraft> {
    let seed_tracks: Vec<Track> = store
        .tracks_by_artist(seed_artist)
        .with_context(|| format!("Failed to read catalog of artist {seed_artist}"))?
        .into_iter()
        .filter(|track| track.active)
        .collect();
    if seed_tracks.is_empty() {
        bail!("Artist {seed_artist} has no eligible tracks for a radio");
    }

    let seed_genres = genres_of(&seed_tracks);
    let related = index.related_tracks(seed_artist, &seed_genres);
    let mut genre_pool = Vec::new();
    for &genre in &seed_genres {
        genre_pool.extend(store.tracks_by_genre(genre, config.genre_pool)?);
    }

    let total = rng.gen_range(config.min_tracks..=config.max_tracks.max(config.min_tracks));
    let mix = compose_artist_radio(
        seed_artist,
        &seed_tracks,
        &related,
        &genre_pool,
        total,
        config.own_ratio,
        rng,
    );
    let tracks = mix.into_tracks(rng);

    // Seed tracks are never empty, so the own segment has at least one.
    let cover = match tracks.first() {
        Some(first) => select_cover(store, first, PlaylistType::ArtistRadio)?,
        None => PlaylistType::ArtistRadio.default_cover(),
    };
    let artist_name = store
        .artist_name(seed_artist)?
        .unwrap_or_else(|| format!("Artist {seed_artist}"));

    Ok(PlaylistDraft {
        key: PlaylistKey::radio(listener_id, seed_artist),
        name: format!("{artist_name} Radio"),
        track_ids: tracks.iter().map(|track| track.id).collect(),
        cover,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(id: TrackId, artist: ArtistId, genre: GenreId) -> Track {
        Track {
            id,
            title: format!("Track {id}"),
            duration_secs: 200,
            artist_ids: vec![artist],
            genre_ids: vec![genre],
            album_id: None,
            play_count: 0,
            created_at: Utc::now(),
            cover: None,
            active: true,
        }
    }

    fn catalog(artist: ArtistId, genre: GenreId, count: i64) -> Vec<Track> {
        (0..count).map(|n| track(artist * 1000 + n, artist, genre)).collect()
    }

    fn playlist_updated(updated_at: DateTime<Utc>) -> Playlist {
        Playlist {
            id: 1,
            name: "Nina Radio".to_string(),
            playlist_type: PlaylistType::ArtistRadio,
            track_ids: vec![1],
            owner_id: Some(1),
            artist_id: Some(2),
            cover: None,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn test_radio_state_boundaries() {
        let now = Utc::now();
        let week = Duration::days(7);

        assert_eq!(radio_state(None, now, week), RadioState::Missing);
        let fresh = playlist_updated(now - Duration::days(1));
        assert_eq!(radio_state(Some(&fresh), now, week), RadioState::Fresh);
        let edge = playlist_updated(now - week);
        assert_eq!(radio_state(Some(&edge), now, week), RadioState::Fresh);
        let stale = playlist_updated(now - week - Duration::seconds(1));
        assert_eq!(radio_state(Some(&stale), now, week), RadioState::Stale);
    }

    #[test]
    fn test_segment_targets() {
        assert_eq!(segment_targets(20, 0.6), (12, 4, 4));
        assert_eq!(segment_targets(25, 0.6), (15, 5, 5));
        assert_eq!(segment_targets(27, 0.6), (16, 5, 6));
        assert_eq!(segment_targets(30, 0.6), (18, 6, 6));
    }

    #[test]
    fn test_full_composition_has_no_duplicates() {
        let seed = catalog(1, 7, 40);
        let related = catalog(2, 7, 40);
        let mut genre_pool = catalog(3, 7, 40);
        genre_pool.extend(seed.iter().take(10).cloned());
        genre_pool.extend(related.iter().take(10).cloned());
        let mut rng = StdRng::seed_from_u64(11);

        for total in 20..=30 {
            let mix = compose_artist_radio(1, &seed, &related, &genre_pool, total, 0.6, &mut rng);
            let (own, rel, genre) = segment_targets(total, 0.6);
            assert_eq!((mix.own.len(), mix.related.len(), mix.genre.len()), (own, rel, genre));

            let tracks = mix.into_tracks(&mut rng);
            let unique: HashSet<TrackId> = tracks.iter().map(|t| t.id).collect();
            assert_eq!(unique.len(), total);
            let own_share = tracks.iter().filter(|t| t.has_artist(1)).count();
            assert_eq!(own_share, own);
        }
    }

    #[test]
    fn test_shortfall_is_not_backfilled() {
        let seed = catalog(1, 7, 5);
        let genre_pool = catalog(3, 7, 100);
        let mut rng = StdRng::seed_from_u64(5);

        let mix = compose_artist_radio(1, &seed, &[], &genre_pool, 25, 0.6, &mut rng);
        assert_eq!(mix.own.len(), 5);
        assert!(mix.related.is_empty());
        assert_eq!(mix.genre.len(), 5);
        assert_eq!(mix.len(), 10);
    }

    #[test]
    fn test_related_must_share_genre_and_skip_seed() {
        let seed = catalog(1, 7, 20);
        let mut related = catalog(2, 8, 10);
        related.push(Track {
            artist_ids: vec![2, 1],
            ..track(5000, 2, 7)
        });
        related.push(track(5001, 2, 7));
        let mut rng = StdRng::seed_from_u64(5);

        let mix = compose_artist_radio(1, &seed, &related, &[], 20, 0.6, &mut rng);
        let ids: Vec<TrackId> = mix.related.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5001]);
    }
}
