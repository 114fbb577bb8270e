//! The operations exposed to the outside: playlist generation for charts,
//! listeners and artist radios, plus interaction recording.
//!
//! [`RecommendationEngine`] owns a store, the configuration, a clock and an
//! optional RNG seed. It holds no other state, so the same engine can be
//! shared between threads and every call is independent.

use crate::algorithm;
use crate::config::EngineConfig;
use crate::generators::{self, GenerationContext};
use crate::model::{
    ArtistId, Interaction, InteractionEvent, ListenerId, Playlist, PlaylistKey, PlaylistType, TrackId,
};
use crate::profile;
use crate::radio::{self, RadioState, RelatedArtistIndex};
use crate::store::RecommendationStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;

/// Source of "now" for staleness and time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }
}

/// When a refresh replaces an existing personal playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Only missing playlists and those older than the staleness window.
    IfStale,
    Always,
}

/// Outcome of topping up a listener's radios.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioReport {
    /// Fresh radios after the call, previously fresh ones first.
    pub radios: Vec<Playlist>,
    pub generated: usize,
    /// Candidate artists whose radio could not be generated.
    pub failed: usize,
}

const RADIO_SALT: i64 = 0x5241_4449;

pub struct RecommendationEngine<S: RecommendationStore> {
    store: S,
    config: EngineConfig,
    clock: Clock,
    seed: Option<u64>,
}

impl<S: RecommendationStore> RecommendationEngine<S> {
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            clock: Clock::System,
            seed: None,
        }
    }

    /// Make every random choice reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A fresh RNG for one unit of work. Seeded engines derive it from the
    /// seed and `parts`, so parallel work stays reproducible.
    fn rng_for(&self, parts: &[i64]) -> StdRng {
        match self.seed {
            Some(seed) => {
                #[allow(clippy::cast_sign_loss)]
                let mixed = parts.iter().fold(seed, |acc, &part| {
                    (acc ^ part as u64)
                        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                        .rotate_left(17)
                });
                StdRng::seed_from_u64(mixed)
            }
            None => StdRng::from_entropy(),
        }
    }

    fn context(&self, now: DateTime<Utc>, owner: Option<ListenerId>) -> GenerationContext<'_> {
        GenerationContext {
            store: &self.store,
            config: &self.config,
            now,
            owner,
        }
    }

    fn ensure_listener(&self, listener_id: ListenerId) -> Result<()> {
        if !self.store.listener_exists(listener_id)? {
            bail!("Unknown listener {listener_id}");
        }
        Ok(())
    }

    /// Regenerate one chart. With no candidates nothing is written and any
    /// existing chart is left as it was.
    pub fn generate_system_playlist(&self, kind: PlaylistType) -> Result<Option<Playlist>> {
        if !kind.is_system() {
            bail!("{kind} is not a system playlist");
        }
        let now = self.now();
        let strategy = generators::strategy_for(kind)?;
        let mut rng = self.rng_for(&[kind as i64, now.timestamp()]);

        let Some(draft) = generators::build_draft(strategy.as_ref(), &self.context(now, None), &mut rng)?
        else {
            info!("Skipped {kind}: no candidate tracks");
            return Ok(None);
        };

        let playlist = self
            .store
            .upsert_playlist(&draft, now)
            .with_context(|| format!("Failed to save {kind}"))?;
        info!("Generated {kind} with {} tracks", playlist.track_ids.len());
        Ok(Some(playlist))
    }

    fn generate_personal_playlist(
        &self,
        listener_id: ListenerId,
        kind: PlaylistType,
        now: DateTime<Utc>,
    ) -> Result<Option<Playlist>> {
        let strategy = generators::strategy_for(kind)?;
        let mut rng = self.rng_for(&[listener_id, kind as i64, now.timestamp()]);

        let Some(draft) =
            generators::build_draft(strategy.as_ref(), &self.context(now, Some(listener_id)), &mut rng)?
        else {
            info!("Skipped {kind} for listener {listener_id}: no candidate tracks");
            return Ok(None);
        };

        let playlist = self
            .store
            .upsert_playlist(&draft, now)
            .with_context(|| format!("Failed to save {kind} of listener {listener_id}"))?;
        info!(
            "Generated {kind} for listener {listener_id} with {} tracks",
            playlist.track_ids.len()
        );
        Ok(Some(playlist))
    }

    /// Regenerate the personal mixes of a listener.
    ///
    /// With [`RefreshPolicy::IfStale`] a mix updated within the personal
    /// staleness window is returned untouched.
    pub fn refresh_personal_playlists(
        &self,
        listener_id: ListenerId,
        policy: RefreshPolicy,
    ) -> Result<Vec<Playlist>> {
        self.ensure_listener(listener_id)?;
        let now = self.now();
        let staleness = Duration::days(self.config.personal.staleness_days);

        let mut playlists = Vec::with_capacity(PlaylistType::PERSONAL.len());
        for kind in PlaylistType::PERSONAL {
            let existing = self
                .store
                .find_playlist(&PlaylistKey::personal(kind, listener_id))?;
            let keep = match (&existing, policy) {
                (Some(playlist), RefreshPolicy::IfStale) => now - playlist.updated_at <= staleness,
                _ => false,
            };

            if keep {
                debug!("{kind} of listener {listener_id} is fresh, kept");
                playlists.extend(existing);
            } else {
                match self.generate_personal_playlist(listener_id, kind, now)? {
                    Some(playlist) => playlists.push(playlist),
                    None => playlists.extend(existing),
                }
            }
        }
        Ok(playlists)
    }

    /// Current recommendation playlists of a listener: the personal mixes
    /// (generating any that do not exist yet) followed by their radios.
    pub fn recommendations_for(&self, listener_id: ListenerId) -> Result<Vec<Playlist>> {
        self.ensure_listener(listener_id)?;
        let now = self.now();

        let mut playlists = Vec::new();
        for kind in PlaylistType::PERSONAL {
            match self
                .store
                .find_playlist(&PlaylistKey::personal(kind, listener_id))?
            {
                Some(existing) => playlists.push(existing),
                None => playlists.extend(self.generate_personal_playlist(listener_id, kind, now)?),
            }
        }
        playlists.extend(self.radios_of(listener_id)?);
        Ok(playlists)
    }

    /// Every artist radio owned by a listener, by artist.
    pub fn radios_of(&self, listener_id: ListenerId) -> Result<Vec<Playlist>> {
        Ok(self
            .store
            .playlists_for_owner(listener_id)?
            .into_iter()
            .filter(|playlist| playlist.playlist_type == PlaylistType::ArtistRadio)
            .collect())
    }

    /// State of every radio of a listener at the engine's current time.
    pub fn radio_states(&self, listener_id: ListenerId) -> Result<Vec<(Playlist, RadioState)>> {
        let now = self.now();
        let staleness = self.config.radio.staleness();
        Ok(self
            .radios_of(listener_id)?
            .into_iter()
            .map(|playlist| {
                let state = radio::radio_state(Some(&playlist), now, staleness);
                (playlist, state)
            })
            .collect())
    }

    fn build_and_save_radio(
        &self,
        listener_id: ListenerId,
        artist_id: ArtistId,
        index: &RelatedArtistIndex,
        rng: &mut dyn RngCore,
        now: DateTime<Utc>,
    ) -> Result<Playlist> {
        let draft = radio::build_radio_draft(
            &self.store,
            listener_id,
            artist_id,
            index,
            &self.config.radio,
            rng,
        )?;
        let playlist = self
            .store
            .upsert_playlist(&draft, now)
            .with_context(|| format!("Failed to save radio of artist {artist_id}"))?;
        info!(
            "Generated \"{}\" for listener {listener_id} with {} tracks",
            playlist.name,
            playlist.track_ids.len()
        );
        Ok(playlist)
    }

    /// The radio of `artist_id` for a listener. A fresh radio is returned
    /// as is; a missing or stale one is (re)generated.
    pub fn generate_artist_radio(&self, listener_id: ListenerId, artist_id: ArtistId) -> Result<Playlist> {
        self.ensure_listener(listener_id)?;
        let now = self.now();
        let existing = self
            .store
            .find_playlist(&PlaylistKey::radio(listener_id, artist_id))?;

        if let Some(playlist) = existing {
            if radio::radio_state(Some(&playlist), now, self.config.radio.staleness()) == RadioState::Fresh {
                debug!("Radio of artist {artist_id} for listener {listener_id} is fresh");
                return Ok(playlist);
            }
        }

        let index = RelatedArtistIndex::from_history(&self.store, listener_id, now, &self.config.radio)?;
        let mut rng = self.rng_for(&[listener_id, RADIO_SALT, artist_id, now.timestamp()]);
        self.build_and_save_radio(listener_id, artist_id, &index, &mut rng, now)
    }

    /// Make sure a listener has `target` fresh radios.
    ///
    /// Missing radios are generated for the listener's strongest artists
    /// that have no fresh radio yet. An artist whose radio fails is logged
    /// and skipped, and the next candidate is tried, until the deficit is
    /// covered or the candidates run out.
    pub fn artist_radios(&self, listener_id: ListenerId, target: usize) -> Result<RadioReport> {
        self.ensure_listener(listener_id)?;
        let now = self.now();

        let fresh: Vec<Playlist> = self
            .radio_states(listener_id)?
            .into_iter()
            .filter(|(_, state)| *state == RadioState::Fresh)
            .map(|(playlist, _)| playlist)
            .collect();
        if fresh.len() >= target {
            debug!(
                "Listener {listener_id} already has {} fresh radios (target {target})",
                fresh.len()
            );
            return Ok(RadioReport {
                radios: fresh,
                ..RadioReport::default()
            });
        }

        let deficit = target - fresh.len();
        let covered: HashSet<ArtistId> = fresh.iter().filter_map(|playlist| playlist.artist_id).collect();
        let candidates: Vec<ArtistId> = profile::rank_artists(&self.store, listener_id, now, &self.config.profile)?
            .into_iter()
            .map(|(artist, _)| artist)
            .filter(|artist| !covered.contains(artist))
            .collect();
        debug!(
            "Listener {listener_id}: {deficit} radios missing, {} candidate artists",
            candidates.len()
        );

        let index = RelatedArtistIndex::from_history(&self.store, listener_id, now, &self.config.radio)?;
        let mut rng = self.rng_for(&[listener_id, RADIO_SALT, now.timestamp()]);
        let mut report = RadioReport {
            radios: fresh,
            ..RadioReport::default()
        };

        for artist_id in candidates {
            if report.generated == deficit {
                break;
            }
            match self.build_and_save_radio(listener_id, artist_id, &index, &mut rng, now) {
                Ok(playlist) => {
                    report.radios.push(playlist);
                    report.generated += 1;
                }
                Err(err) => {
                    warn!("Radio of artist {artist_id} for listener {listener_id} failed: {err:#}");
                    report.failed += 1;
                }
            }
        }

        if report.generated < deficit {
            info!(
                "Listener {listener_id}: generated {} of {deficit} missing radios, candidates exhausted",
                report.generated
            );
        }
        Ok(report)
    }

    /// Apply one listener event to the interaction record of the pair and
    /// rescore it.
    ///
    /// Unknown listeners or tracks are ignored and yield `Ok(None)`. A play
    /// without a listen time counts as a full listen.
    pub fn record_interaction(
        &self,
        listener_id: ListenerId,
        track_id: TrackId,
        event: InteractionEvent,
    ) -> Result<Option<Interaction>> {
        if !self.store.listener_exists(listener_id)? {
            debug!("Ignoring {event:?}: unknown listener {listener_id}");
            return Ok(None);
        }
        let Some(track) = self.store.track(track_id)? else {
            debug!("Ignoring {event:?}: unknown track {track_id}");
            return Ok(None);
        };

        let now = self.now();
        let scoring = &self.config.scoring;
        let played = matches!(event, InteractionEvent::Play { .. });
        let interaction = self
            .store
            .apply_interaction(listener_id, track_id, now, played, &mut |interaction| {
                match event {
                    InteractionEvent::Play { listen_time_secs } => {
                        interaction.play_count = interaction.play_count.saturating_add(1);
                        interaction.listen_time_secs = interaction
                            .listen_time_secs
                            .saturating_add(listen_time_secs.unwrap_or_else(|| u64::from(track.duration_secs)));
                    }
                    InteractionEvent::Skip => {
                        interaction.skip_count = interaction.skip_count.saturating_add(1);
                    }
                    InteractionEvent::Like => interaction.liked = true,
                    InteractionEvent::Unlike => interaction.liked = false,
                    InteractionEvent::Share => interaction.shared = true,
                }
                interaction.affinity_score =
                    algorithm::calculate_score(interaction, track.duration_secs, scoring);
                interaction.updated_at = now;
            })
            .with_context(|| format!("Failed to save interaction {listener_id}/{track_id}"))?;

        debug!(
            "Listener {listener_id} {event:?} track {track_id}: score {:.3}",
            interaction.affinity_score
        );
        Ok(Some(interaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::model::{Favorite, FavoriteTarget, GenreId, Track};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn track(id: TrackId, artist: ArtistId, genre: GenreId) -> Track {
        Track {
            id,
            title: format!("Track {id}"),
            duration_secs: 200,
            artist_ids: vec![artist],
            genre_ids: vec![genre],
            album_id: None,
            play_count: 0,
            created_at: start() - Duration::days(365),
            cover: None,
            active: true,
        }
    }

    /// Six artists with 30 tracks each; artists 1-3 play genre 1, 4-6 genre 2.
    fn create_tmp_engine() -> RecommendationEngine<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_listener(1, "ana", true).unwrap();
        for artist in 1..=6 {
            store.insert_artist(artist, &format!("Artist {artist}")).unwrap();
            let genre = if artist <= 3 { 1 } else { 2 };
            for n in 0..30 {
                store.insert_track(&track(artist * 100 + n, artist, genre)).unwrap();
            }
        }
        RecommendationEngine::new(store, EngineConfig::default())
            .with_seed(42)
            .with_clock(Clock::Fixed(start()))
    }

    fn favorite_artist(engine: &RecommendationEngine<SqliteStore>, artist: ArtistId) {
        engine
            .store()
            .add_favorite(&Favorite {
                listener_id: 1,
                target: FavoriteTarget::Artist(artist),
                created_at: start(),
            })
            .unwrap();
    }

    #[test]
    fn test_record_interaction_ignores_unknowns() {
        let engine = create_tmp_engine();
        assert!(engine.record_interaction(9, 100, InteractionEvent::Skip).unwrap().is_none());
        assert!(engine.record_interaction(1, 9999, InteractionEvent::Skip).unwrap().is_none());
    }

    #[test]
    fn test_record_interaction_rescores() {
        let engine = create_tmp_engine();

        let played = engine
            .record_interaction(1, 100, InteractionEvent::Play { listen_time_secs: None })
            .unwrap()
            .unwrap();
        assert_eq!(played.play_count, 1);
        assert_eq!(played.listen_time_secs, 200);
        assert!((played.affinity_score - 2.0 * 2f64.ln()).abs() < 1e-12);

        let liked = engine
            .record_interaction(1, 100, InteractionEvent::Like)
            .unwrap()
            .unwrap();
        assert_eq!(liked.affinity_score, played.affinity_score + 2.0);
        assert_eq!(engine.store().interaction(1, 100).unwrap().unwrap(), liked);
        assert_eq!(engine.store().track(100).unwrap().unwrap().play_count, 1);
    }

    #[test]
    fn test_system_playlist_rejects_personal_types() {
        let engine = create_tmp_engine();
        assert!(engine.generate_system_playlist(PlaylistType::DiscoveryWeekly).is_err());
    }

    #[test]
    fn test_empty_chart_leaves_existing_untouched() {
        let mut engine = create_tmp_engine();
        engine
            .record_interaction(1, 100, InteractionEvent::Play { listen_time_secs: None })
            .unwrap();
        let first = engine
            .generate_system_playlist(PlaylistType::TrendingWeekly)
            .unwrap()
            .unwrap();

        engine.set_clock(Clock::Fixed(start() + Duration::days(30)));
        assert!(engine
            .generate_system_playlist(PlaylistType::TrendingWeekly)
            .unwrap()
            .is_none());
        let stored = engine
            .store()
            .find_playlist(&PlaylistKey::system(PlaylistType::TrendingWeekly))
            .unwrap()
            .unwrap();
        assert_eq!(stored, first);
    }

    #[test]
    fn test_radio_is_idempotent_while_fresh() {
        let mut engine = create_tmp_engine();
        for track_id in [100, 300] {
            engine
                .record_interaction(1, track_id, InteractionEvent::Play { listen_time_secs: None })
                .unwrap();
        }
        let first = engine.generate_artist_radio(1, 2).unwrap();
        assert_eq!(first.name, "Artist 2 Radio");
        assert!((20..=30).contains(&first.track_ids.len()));

        engine.set_clock(Clock::Fixed(start() + Duration::hours(6)));
        let second = engine.generate_artist_radio(1, 2).unwrap();
        assert_eq!(second, first);
        assert_eq!(engine.radios_of(1).unwrap().len(), 1);

        engine.set_clock(Clock::Fixed(start() + Duration::days(8)));
        let regenerated = engine.generate_artist_radio(1, 2).unwrap();
        assert_eq!(regenerated.id, first.id);
        assert!(regenerated.updated_at > first.updated_at);
    }

    #[test]
    fn test_radio_for_artist_without_tracks_fails() {
        let engine = create_tmp_engine();
        assert!(engine.generate_artist_radio(1, 77).is_err());
    }

    #[test]
    fn test_artist_radios_fill_the_deficit() {
        let engine = create_tmp_engine();
        for artist in [1, 3, 5] {
            favorite_artist(&engine, artist);
        }
        engine.generate_artist_radio(1, 3).unwrap();

        let report = engine.artist_radios(1, 3).unwrap();
        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, 0);
        let artists: HashSet<ArtistId> = report.radios.iter().filter_map(|p| p.artist_id).collect();
        assert_eq!(artists, HashSet::from([1, 3, 5]));

        let again = engine.artist_radios(1, 3).unwrap();
        assert_eq!(again.generated, 0);
        assert_eq!(again.radios.len(), 3);
    }

    #[test]
    fn test_artist_radios_skip_failures() {
        let engine = create_tmp_engine();
        favorite_artist(&engine, 77);
        favorite_artist(&engine, 4);

        let report = engine.artist_radios(1, 5).unwrap();
        assert_eq!(report.generated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.radios[0].artist_id, Some(4));
    }

    #[test]
    fn test_refresh_policy() {
        let mut engine = create_tmp_engine();
        let first = engine.refresh_personal_playlists(1, RefreshPolicy::IfStale).unwrap();
        assert_eq!(first.len(), 3);

        engine.set_clock(Clock::Fixed(start() + Duration::days(1)));
        let kept = engine.refresh_personal_playlists(1, RefreshPolicy::IfStale).unwrap();
        assert_eq!(kept, first);

        let forced = engine.refresh_personal_playlists(1, RefreshPolicy::Always).unwrap();
        assert!(forced.iter().all(|p| p.updated_at == start() + Duration::days(1)));
        let ids: Vec<_> = forced.iter().map(|p| p.id).collect();
        assert_eq!(ids, first.iter().map(|p| p.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_mix_is_kept_when_nothing_can_replace_it() {
        let mut engine = create_tmp_engine();
        let first = engine.refresh_personal_playlists(1, RefreshPolicy::IfStale).unwrap();
        assert_eq!(first.len(), 3);

        for artist in 1..=6 {
            let genre = if artist <= 3 { 1 } else { 2 };
            for n in 0..30 {
                let retired = Track {
                    active: false,
                    ..track(artist * 100 + n, artist, genre)
                };
                engine.store().insert_track(&retired).unwrap();
            }
        }
        engine.set_clock(Clock::Fixed(start() + Duration::days(8)));

        let refreshed = engine.refresh_personal_playlists(1, RefreshPolicy::IfStale).unwrap();
        assert_eq!(refreshed, first);
    }

    #[test]
    fn test_radio_for_artist_zero_is_rejected() {
        let engine = create_tmp_engine();
        for n in 0..30 {
            engine.store().insert_track(&track(9000 + n, 0, 1)).unwrap();
        }
        assert!(engine.generate_artist_radio(1, 0).is_err());
        assert!(engine.radios_of(1).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_listener_is_an_error_for_generation() {
        let engine = create_tmp_engine();
        assert!(engine.recommendations_for(9).is_err());
        assert!(engine.generate_artist_radio(9, 1).is_err());
    }

    #[test]
    fn test_seeded_engines_agree() {
        let a = create_tmp_engine();
        let b = create_tmp_engine();
        favorite_artist(&a, 2);
        favorite_artist(&b, 2);

        let artist_mix = |engine: &RecommendationEngine<SqliteStore>| {
            engine
                .refresh_personal_playlists(1, RefreshPolicy::Always)
                .unwrap()
                .into_iter()
                .find(|p| p.playlist_type == PlaylistType::ArtistMix)
                .unwrap()
                .track_ids
        };
        let left = artist_mix(&a);
        assert_eq!(left.len(), 5);
        assert_eq!(left, artist_mix(&b));
    }
}
