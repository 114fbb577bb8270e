//! The persistence collaborator the engine reads signals from and writes
//! playlists to.
//!
//! Every ranked query returns its rows already ordered; the engine never
//! re-sorts what the store ranked. "Nothing found" is an empty `Vec` or
//! `None`, never an error. Errors mean the store itself failed and are
//! propagated to the caller untouched.

use crate::model::{
    AlbumId, ArtistId, GenreId, HistoryEvent, Interaction, ListenerId, PlayWindow, Playlist,
    PlaylistDraft, PlaylistId, PlaylistKey, Track, TrackId,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait RecommendationStore: Send + Sync {
    /// Active tracks created at or after `since`, newest first.
    fn tracks_created_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Track>>;

    /// Active tracks by number of plays logged at or after `since`, most
    /// played first.
    fn tracks_trending_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Track>>;

    /// Per-track play counts split into a recent window (`>= recent_since`)
    /// and a baseline window (`[baseline_since, recent_since)`). Only tracks
    /// with at least one recent play are returned, ordered by
    /// `recent / (baseline + baseline_offset)` descending so that `limit`
    /// keeps the fastest risers rather than the most played.
    fn play_windows_since(
        &self,
        recent_since: DateTime<Utc>,
        baseline_since: DateTime<Utc>,
        baseline_offset: f64,
        limit: usize,
    ) -> Result<Vec<PlayWindow>>;

    /// Whole active catalog of an artist, newest first.
    fn tracks_by_artist(&self, artist_id: ArtistId) -> Result<Vec<Track>>;

    /// Active tracks carrying `genre_id`, most played first.
    fn tracks_by_genre(&self, genre_id: GenreId, limit: usize) -> Result<Vec<Track>>;

    /// Any active tracks, in no particular order.
    fn active_tracks(&self, limit: usize) -> Result<Vec<Track>>;

    /// Tracks for the given ids. Unknown ids are skipped; order follows `ids`.
    fn tracks_by_ids(&self, ids: &[TrackId]) -> Result<Vec<Track>>;

    fn track(&self, track_id: TrackId) -> Result<Option<Track>>;

    fn album_cover(&self, album_id: AlbumId) -> Result<Option<String>>;

    fn artist_name(&self, artist_id: ArtistId) -> Result<Option<String>>;

    fn listener_exists(&self, listener_id: ListenerId) -> Result<bool>;

    fn active_listeners(&self) -> Result<Vec<ListenerId>>;

    fn interaction(&self, listener_id: ListenerId, track_id: TrackId) -> Result<Option<Interaction>>;

    /// Insert or replace the record for `(listener_id, track_id)`.
    fn save_interaction(&self, interaction: &Interaction) -> Result<()>;

    /// Append to the play log, move the history entry for the pair to
    /// `played_at`, and bump the track's lifetime play count.
    fn record_play(
        &self,
        listener_id: ListenerId,
        track_id: TrackId,
        played_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Read, update and save the record for `(listener_id, track_id)` as
    /// one atomic step. `update` gets the stored record, or a fresh one
    /// dated `now`. With `played` the play is logged as by
    /// [`record_play`](Self::record_play) in the same transaction, so a
    /// failure leaves neither the play nor the new counters behind.
    fn apply_interaction(
        &self,
        listener_id: ListenerId,
        track_id: TrackId,
        now: DateTime<Utc>,
        played: bool,
        update: &mut dyn FnMut(&mut Interaction),
    ) -> Result<Interaction>;

    /// A listener's interactions, highest affinity first.
    fn top_interactions_by_listener(
        &self,
        listener_id: ListenerId,
        limit: usize,
    ) -> Result<Vec<Interaction>>;

    /// Tracks liked by listeners who like what `listener_id` likes, with the
    /// summed affinity of those peers. Tracks the listener already
    /// interacted with are excluded. Highest weight first.
    fn collaborative_candidates(
        &self,
        listener_id: ListenerId,
        limit: usize,
    ) -> Result<Vec<(TrackId, f64)>>;

    /// Most recently favorited first.
    fn favorite_artists_by_listener(&self, listener_id: ListenerId) -> Result<Vec<ArtistId>>;
    fn favorite_tracks_by_listener(&self, listener_id: ListenerId) -> Result<Vec<TrackId>>;
    fn favorite_albums_by_listener(&self, listener_id: ListenerId) -> Result<Vec<AlbumId>>;
    fn favorite_playlists_by_listener(&self, listener_id: ListenerId) -> Result<Vec<PlaylistId>>;

    /// History entries played at or after `since`, most recent first.
    fn history_since(
        &self,
        listener_id: ListenerId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryEvent>>;

    fn find_playlist(&self, key: &PlaylistKey) -> Result<Option<Playlist>>;

    /// Every playlist owned by `listener_id`.
    fn playlists_for_owner(&self, listener_id: ListenerId) -> Result<Vec<Playlist>>;

    /// Create the playlist for `draft.key`, or replace the tracks of the
    /// existing one keeping its identity and `created_at`. Two concurrent
    /// calls for the same key must leave a single playlist behind.
    fn upsert_playlist(&self, draft: &PlaylistDraft, now: DateTime<Utc>) -> Result<Playlist>;
}
