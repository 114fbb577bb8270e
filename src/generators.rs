//! Playlist generators, one strategy per recommendation playlist type.
//!
//! A strategy only proposes candidate tracks. [`build_draft`] applies the
//! policy shared by every type on top of that:
//!
//! 1. drop inactive tracks and duplicates, keeping the first occurrence
//! 2. shuffle the mix types (artist mix, genre mix)
//! 3. truncate to the size configured for the type
//! 4. pick a cover: first track's artwork, then its album's, then the
//!    type default
//!
//! Charts keep the order their signal ranked them in. Artist radio has its
//! own composition rules and lives in [`crate::radio`].

use crate::config::EngineConfig;
use crate::hybrid::{self, BlendWeights, Candidate, MatchReason};
use crate::model::{ListenerId, PlaylistDraft, PlaylistKey, PlaylistType, Track, TrackId};
use crate::profile;
use crate::signals::{FallbackStage, SignalSources};
use crate::store::RecommendationStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maximum number of tracks per playlist type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistSizes {
    pub trending_weekly: usize,
    pub new_daily: usize,
    pub new_releases: usize,
    pub viral_hits: usize,
    pub discovery_weekly: usize,
    pub artist_mix: usize,
    pub genre_mix: usize,
}

impl Default for PlaylistSizes {
    fn default() -> Self {
        Self {
            trending_weekly: 50,
            new_daily: 30,
            new_releases: 40,
            viral_hits: 35,
            discovery_weekly: 30,
            artist_mix: 30,
            genre_mix: 30,
        }
    }
}

impl PlaylistSizes {
    /// Size for a generated type. Radio is sized by its own config, user
    /// playlists are never generated.
    #[must_use]
    pub fn for_type(&self, kind: PlaylistType) -> usize {
        match kind {
            PlaylistType::TrendingWeekly => self.trending_weekly,
            PlaylistType::NewDaily => self.new_daily,
            PlaylistType::NewReleases => self.new_releases,
            PlaylistType::ViralHits => self.viral_hits,
            PlaylistType::DiscoveryWeekly => self.discovery_weekly,
            PlaylistType::ArtistMix => self.artist_mix,
            PlaylistType::GenreMix => self.genre_mix,
            PlaylistType::ArtistRadio | PlaylistType::User | PlaylistType::Public => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sizes: PlaylistSizes,
    pub new_daily_days: i64,
    pub new_releases_days: i64,
    /// Tracks taken from each profile artist in the artist mix.
    pub per_artist_cap: usize,
    /// Tracks taken from each profile genre in the genre mix.
    pub per_genre_cap: usize,
    /// How many tracks of a genre are read before sampling.
    pub genre_pool: usize,
    /// Candidates read from each discovery source before blending.
    pub discovery_pool: usize,
    /// How far back already-known tracks are excluded from discovery.
    pub discovery_exclusion_limit: usize,
    pub blend: BlendWeights,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sizes: PlaylistSizes::default(),
            new_daily_days: 1,
            new_releases_days: 7,
            per_artist_cap: 5,
            per_genre_cap: 10,
            genre_pool: 50,
            discovery_pool: 200,
            discovery_exclusion_limit: 1000,
            blend: BlendWeights::default(),
        }
    }
}

/// Everything a strategy may read.
pub struct GenerationContext<'a> {
    pub store: &'a dyn RecommendationStore,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
    /// Listener the playlist is generated for; `None` for charts.
    pub owner: Option<ListenerId>,
}

impl<'a> GenerationContext<'a> {
    #[must_use]
    pub fn signals(&self) -> SignalSources<'a> {
        SignalSources::new(self.store, self.now, &self.config.signals)
    }

    fn listener(&self, kind: PlaylistType) -> Result<ListenerId> {
        match self.owner {
            Some(listener) => Ok(listener),
            None => bail!("{kind} playlists need an owning listener"),
        }
    }

    fn size(&self, kind: PlaylistType) -> usize {
        self.config.generators.sizes.for_type(kind)
    }
}

/// Candidate selection for one playlist type.
pub trait PlaylistStrategy: Send + Sync {
    fn playlist_type(&self) -> PlaylistType;

    /// Candidate tracks in playlist order. May contain duplicates and more
    /// tracks than fit; [`build_draft`] cleans up.
    ///
    /// # Errors
    ///
    /// Only when the store fails. Missing data yields fewer candidates.
    fn candidates(&self, ctx: &GenerationContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Track>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrendingWeekly;

impl PlaylistStrategy for TrendingWeekly {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::TrendingWeekly
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, _rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        ctx.signals().trending(ctx.size(self.playlist_type()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewDaily;

impl PlaylistStrategy for NewDaily {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::NewDaily
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, _rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        ctx.signals()
            .new_since(ctx.config.generators.new_daily_days, ctx.size(self.playlist_type()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewReleases;

impl PlaylistStrategy for NewReleases {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::NewReleases
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, _rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        ctx.signals()
            .new_since(ctx.config.generators.new_releases_days, ctx.size(self.playlist_type()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ViralHits;

impl PlaylistStrategy for ViralHits {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::ViralHits
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, _rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        ctx.signals().viral(ctx.size(self.playlist_type()))
    }
}

/// Collaborative and content candidates blended, excluding what the
/// listener already knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryWeekly;

impl DiscoveryWeekly {
    fn known_tracks(ctx: &GenerationContext<'_>, listener: ListenerId) -> Result<HashSet<TrackId>> {
        let limit = ctx.config.generators.discovery_exclusion_limit;
        let since = ctx.now - Duration::days(ctx.config.profile.lookback_days);

        let interacted = ctx.store.top_interactions_by_listener(listener, limit)?;
        let heard = ctx.store.history_since(listener, since, limit)?;
        Ok(interacted
            .iter()
            .map(|interaction| interaction.track_id)
            .chain(heard.iter().map(|event| event.track_id))
            .collect())
    }

    fn collaborative(
        ctx: &GenerationContext<'_>,
        listener: ListenerId,
        known: &HashSet<TrackId>,
    ) -> Result<Vec<Candidate>> {
        let peers = ctx
            .store
            .collaborative_candidates(listener, ctx.config.generators.discovery_pool)
            .context("Failed to read collaborative candidates")?;
        let peers: Vec<(TrackId, f64)> = peers
            .into_iter()
            .filter(|(track_id, _)| !known.contains(track_id))
            .collect();
        Ok(normalised(peers, MatchReason::Collaborative))
    }

    fn content(
        ctx: &GenerationContext<'_>,
        genres: &[i64],
        known: &HashSet<TrackId>,
    ) -> Result<Vec<Candidate>> {
        let mut scores: HashMap<TrackId, f64> = HashMap::new();
        let mut order = Vec::new();

        #[allow(clippy::cast_precision_loss)]
        let count = genres.len() as f64;
        for (rank, &genre) in genres.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let genre_weight = (count - rank as f64) / count;
            for track in ctx
                .store
                .tracks_by_genre(genre, ctx.config.generators.discovery_pool)?
            {
                if known.contains(&track.id) {
                    continue;
                }
                let score = scores.entry(track.id).or_insert_with(|| {
                    order.push(track.id);
                    0.0
                });
                *score += genre_weight;
            }
        }

        let ranked = order
            .into_iter()
            .filter_map(|id| scores.get(&id).map(|score| (id, *score)))
            .collect();
        Ok(normalised(ranked, MatchReason::ContentBased))
    }
}

/// Confidence of each candidate is its score relative to the best one.
fn normalised(scored: Vec<(TrackId, f64)>, reason: MatchReason) -> Vec<Candidate> {
    let best = scored
        .iter()
        .map(|(_, score)| *score)
        .filter(|score| score.is_finite())
        .fold(0.0_f64, f64::max);
    scored
        .into_iter()
        .map(|(track_id, score)| {
            let confidence = if best > 0.0 { score / best } else { 0.0 };
            Candidate::new(track_id, score, confidence, reason)
        })
        .collect()
}

impl PlaylistStrategy for DiscoveryWeekly {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::DiscoveryWeekly
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, _rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        let kind = self.playlist_type();
        let listener = ctx.listener(kind)?;
        let size = ctx.size(kind);

        let profile = profile::build_profile(ctx.store, listener, ctx.now, &ctx.config.profile)?;
        let known = Self::known_tracks(ctx, listener)?;
        let collaborative = Self::collaborative(ctx, listener, &known)?;
        let content = Self::content(ctx, &profile.genres, &known)?;

        let weights = ctx.config.generators.blend;
        let blended = hybrid::blend(
            &collaborative,
            &content,
            weights.collaborative,
            weights.content,
            size,
        );
        debug!(
            "Discovery for listener {listener}: {} collaborative, {} content, {} blended",
            collaborative.len(),
            content.len(),
            blended.len()
        );

        let ids: Vec<TrackId> = blended.iter().map(|candidate| candidate.track_id).collect();
        let tracks = ctx.store.tracks_by_ids(&ids)?;
        let (tracks, stage) = ctx.signals().with_fallback(tracks, size)?;
        log_stage(kind, listener, stage);
        Ok(tracks)
    }
}

/// A few shuffled tracks from each of the listener's top artists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtistMix;

impl PlaylistStrategy for ArtistMix {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::ArtistMix
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        let kind = self.playlist_type();
        let listener = ctx.listener(kind)?;
        let profile = profile::build_profile(ctx.store, listener, ctx.now, &ctx.config.profile)?;

        let mut picked = Vec::new();
        for &artist in &profile.artists {
            let mut catalog = ctx
                .store
                .tracks_by_artist(artist)
                .with_context(|| format!("Failed to read catalog of artist {artist}"))?;
            catalog.shuffle(rng);
            picked.extend(catalog.into_iter().take(ctx.config.generators.per_artist_cap));
        }

        let (tracks, stage) = ctx.signals().with_fallback(picked, ctx.size(kind))?;
        log_stage(kind, listener, stage);
        Ok(tracks)
    }
}

/// A handful of shuffled tracks from each of the listener's top genres.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenreMix;

impl PlaylistStrategy for GenreMix {
    fn playlist_type(&self) -> PlaylistType {
        PlaylistType::GenreMix
    }

    fn candidates(&self, ctx: &GenerationContext<'_>, rng: &mut dyn RngCore) -> Result<Vec<Track>> {
        let kind = self.playlist_type();
        let listener = ctx.listener(kind)?;
        let profile = profile::build_profile(ctx.store, listener, ctx.now, &ctx.config.profile)?;

        let mut picked = Vec::new();
        for &genre in &profile.genres {
            let mut pool = ctx
                .store
                .tracks_by_genre(genre, ctx.config.generators.genre_pool)
                .with_context(|| format!("Failed to read tracks of genre {genre}"))?;
            pool.shuffle(rng);
            picked.extend(pool.into_iter().take(ctx.config.generators.per_genre_cap));
        }

        let (tracks, stage) = ctx.signals().with_fallback(picked, ctx.size(kind))?;
        log_stage(kind, listener, stage);
        Ok(tracks)
    }
}

fn log_stage(kind: PlaylistType, listener: ListenerId, stage: FallbackStage) {
    if stage != FallbackStage::Primary {
        debug!("{kind} for listener {listener} fell back to {stage}");
    }
}

/// The strategy producing `kind`.
///
/// # Errors
///
/// For types that are not generated here.
pub fn strategy_for(kind: PlaylistType) -> Result<Box<dyn PlaylistStrategy>> {
    Ok(match kind {
        PlaylistType::TrendingWeekly => Box::new(TrendingWeekly),
        PlaylistType::NewDaily => Box::new(NewDaily),
        PlaylistType::NewReleases => Box::new(NewReleases),
        PlaylistType::ViralHits => Box::new(ViralHits),
        PlaylistType::DiscoveryWeekly => Box::new(DiscoveryWeekly),
        PlaylistType::ArtistMix => Box::new(ArtistMix),
        PlaylistType::GenreMix => Box::new(GenreMix),
        PlaylistType::ArtistRadio | PlaylistType::User | PlaylistType::Public => {
            bail!("{kind} playlists have no generator strategy")
        }
    })
}

/// Whether the final track order of `kind` is shuffled.
#[must_use]
pub const fn is_shuffled(kind: PlaylistType) -> bool {
    matches!(
        kind,
        PlaylistType::ArtistMix | PlaylistType::GenreMix | PlaylistType::ArtistRadio
    )
}

/// Drop repeated track ids, keeping the first occurrence.
#[must_use]
pub fn dedup_tracks(tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.id))
        .collect()
}

/// Artwork of `first`, else its album's, else the default of `kind`.
pub fn select_cover(
    store: &dyn RecommendationStore,
    first: &Track,
    kind: PlaylistType,
) -> Result<String> {
    if let Some(cover) = first.cover.as_ref().filter(|cover| !cover.is_empty()) {
        return Ok(cover.clone());
    }
    if let Some(album) = first.album_id {
        if let Some(cover) = store.album_cover(album)?.filter(|cover| !cover.is_empty()) {
            return Ok(cover);
        }
    }
    Ok(kind.default_cover())
}

/// Run `strategy` and apply the shared playlist policy.
///
/// Returns `None` when there is nothing to put in the playlist.
pub fn build_draft(
    strategy: &dyn PlaylistStrategy,
    ctx: &GenerationContext<'_>,
    rng: &mut dyn RngCore,
) -> Result<Option<PlaylistDraft>> {
    let kind = strategy.playlist_type();
    let key = if kind.is_system() {
        PlaylistKey::system(kind)
    } else {
        PlaylistKey::personal(kind, ctx.listener(kind)?)
    };

    let mut tracks = dedup_tracks(strategy.candidates(ctx, rng)?);
    tracks.retain(|track| track.active);
    if is_shuffled(kind) {
        tracks.shuffle(rng);
    }
    tracks.truncate(ctx.size(kind));

    let Some(first) = tracks.first() else {
        info!("No candidates for {kind}, nothing generated");
        return Ok(None);
    };
    let cover = select_cover(ctx.store, first, kind)?;

    Ok(Some(PlaylistDraft {
        key,
        name: kind.display_name().to_string(),
        track_ids: tracks.iter().map(|track| track.id).collect(),
        cover,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::model::{ArtistId, Favorite, FavoriteTarget, GenreId};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(id: TrackId, artist: ArtistId, genre: GenreId, age_days: i64) -> Track {
        Track {
            id,
            title: format!("Track {id}"),
            duration_secs: 200,
            artist_ids: vec![artist],
            genre_ids: vec![genre],
            album_id: None,
            play_count: 0,
            created_at: Utc::now() - Duration::days(age_days),
            cover: None,
            active: true,
        }
    }

    /// Ten artists with ten tracks each, genre = artist % 3.
    fn create_tmp_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_listener(1, "ana", true).unwrap();
        for artist in 1..=10 {
            store.insert_artist(artist, &format!("Artist {artist}")).unwrap();
            for n in 0..10 {
                let id = artist * 100 + n;
                store.insert_track(&track(id, artist, artist % 3, 200)).unwrap();
            }
        }
        store
    }

    fn context<'a>(store: &'a SqliteStore, config: &'a EngineConfig, owner: Option<ListenerId>) -> GenerationContext<'a> {
        GenerationContext {
            store,
            config,
            now: Utc::now(),
            owner,
        }
    }

    fn has_duplicates(ids: &[TrackId]) -> bool {
        let unique: HashSet<_> = ids.iter().collect();
        unique.len() != ids.len()
    }

    #[test]
    fn test_strategy_for_rejects_user_playlists() {
        assert!(strategy_for(PlaylistType::User).is_err());
        assert!(strategy_for(PlaylistType::ArtistRadio).is_err());
        for kind in PlaylistType::SYSTEM.into_iter().chain(PlaylistType::PERSONAL) {
            assert_eq!(strategy_for(kind).unwrap().playlist_type(), kind);
        }
    }

    #[test]
    fn test_empty_chart_yields_no_draft() {
        let store = create_tmp_store();
        let config = EngineConfig::default();
        let ctx = context(&store, &config, None);
        let mut rng = StdRng::seed_from_u64(1);

        let draft = build_draft(&TrendingWeekly, &ctx, &mut rng).unwrap();
        assert!(draft.is_none());
    }

    #[test]
    fn test_trending_keeps_signal_order() {
        let store = create_tmp_store();
        let now = Utc::now();
        for (track_id, plays) in [(101, 1), (202, 3), (303, 2)] {
            for _ in 0..plays {
                store.record_play(1, track_id, now - Duration::hours(1)).unwrap();
            }
        }
        let config = EngineConfig::default();
        let ctx = context(&store, &config, None);
        let mut rng = StdRng::seed_from_u64(1);

        let draft = build_draft(&TrendingWeekly, &ctx, &mut rng).unwrap().unwrap();
        assert_eq!(draft.track_ids, vec![202, 303, 101]);
        assert_eq!(draft.name, "Trending This Week");
        assert_eq!(draft.key, PlaylistKey::system(PlaylistType::TrendingWeekly));
        assert_eq!(draft.cover, "covers/default-trending-weekly.png");
    }

    #[test]
    fn test_artist_mix_caps_tracks_per_artist() {
        let store = create_tmp_store();
        for artist in [2, 4] {
            store
                .add_favorite(&Favorite {
                    listener_id: 1,
                    target: FavoriteTarget::Artist(artist),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let config = EngineConfig::default();
        let ctx = context(&store, &config, Some(1));
        let mut rng = StdRng::seed_from_u64(7);

        let draft = build_draft(&ArtistMix, &ctx, &mut rng).unwrap().unwrap();
        assert_eq!(draft.track_ids.len(), 10);
        assert!(!has_duplicates(&draft.track_ids));
        for artist in [2, 4] {
            let from_artist = draft.track_ids.iter().filter(|id| *id / 100 == artist).count();
            assert_eq!(from_artist, config.generators.per_artist_cap);
        }
        assert_eq!(draft.key, PlaylistKey::personal(PlaylistType::ArtistMix, 1));
    }

    #[test]
    fn test_genre_mix_falls_back_for_cold_listener() {
        let store = create_tmp_store();
        let config = EngineConfig::default();
        let ctx = context(&store, &config, Some(1));
        let mut rng = StdRng::seed_from_u64(3);

        let draft = build_draft(&GenreMix, &ctx, &mut rng).unwrap().unwrap();
        assert_eq!(draft.track_ids.len(), 30);
        assert!(!has_duplicates(&draft.track_ids));
    }

    #[test]
    fn test_personal_strategy_requires_owner() {
        let store = create_tmp_store();
        let config = EngineConfig::default();
        let ctx = context(&store, &config, None);
        let mut rng = StdRng::seed_from_u64(3);

        assert!(build_draft(&DiscoveryWeekly, &ctx, &mut rng).is_err());
    }

    #[test]
    fn test_discovery_excludes_known_tracks() {
        let store = create_tmp_store();
        let now = Utc::now();
        store.record_play(1, 101, now - Duration::hours(1)).unwrap();
        store.record_play(1, 102, now - Duration::hours(1)).unwrap();

        let config = EngineConfig::default();
        let ctx = context(&store, &config, Some(1));
        let mut rng = StdRng::seed_from_u64(3);

        let draft = build_draft(&DiscoveryWeekly, &ctx, &mut rng).unwrap().unwrap();
        assert!(!draft.track_ids.contains(&101));
        assert!(!draft.track_ids.contains(&102));
        // Artist 1 is genre 1, shared with artists 4, 7 and 10.
        let genre_one = draft
            .track_ids
            .iter()
            .all(|id| [1, 4, 7, 10].contains(&(id / 100)));
        assert!(genre_one);
    }

    #[test]
    fn test_cover_selection_chain() {
        let store = create_tmp_store();
        store.insert_album(9, "Album", Some("covers/album-9.png")).unwrap();

        let mut subject = track(1, 1, 1, 0);
        assert_eq!(
            select_cover(&store, &subject, PlaylistType::NewDaily).unwrap(),
            "covers/default-new-daily.png"
        );

        subject.album_id = Some(9);
        assert_eq!(
            select_cover(&store, &subject, PlaylistType::NewDaily).unwrap(),
            "covers/album-9.png"
        );

        subject.cover = Some("covers/track-1.png".to_string());
        assert_eq!(
            select_cover(&store, &subject, PlaylistType::NewDaily).unwrap(),
            "covers/track-1.png"
        );
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let tracks = vec![track(1, 1, 1, 0), track(2, 1, 1, 0), track(1, 2, 2, 0)];
        let deduped = dedup_tracks(tracks);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].artist_ids, vec![1]);
    }
}
