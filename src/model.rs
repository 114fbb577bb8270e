//! Value types shared by every stage of playlist generation.
//!
//! These are plain data: the engine never mutates a [`Track`], and a
//! [`Playlist`] is only ever replaced wholesale through the store's upsert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type TrackId = i64;
pub type ListenerId = i64;
pub type ArtistId = i64;
pub type AlbumId = i64;
pub type GenreId = i64;
pub type PlaylistId = i64;

/// A catalog track as seen by the recommender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    /// Length in seconds. Zero for tracks whose duration is unknown.
    pub duration_secs: u32,
    /// Ordered, primary artist first.
    pub artist_ids: Vec<ArtistId>,
    pub genre_ids: Vec<GenreId>,
    pub album_id: Option<AlbumId>,
    /// Lifetime play count, incremented by the store on every recorded play.
    pub play_count: u64,
    pub created_at: DateTime<Utc>,
    /// Track-level artwork, if any.
    #[serde(default)]
    pub cover: Option<String>,
    /// Inactive tracks are never surfaced.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Track {
    /// True if `artist_id` is credited anywhere on this track.
    #[must_use]
    pub fn has_artist(&self, artist_id: ArtistId) -> bool {
        self.artist_ids.contains(&artist_id)
    }

    /// True if this track carries at least one of `genres`.
    #[must_use]
    pub fn shares_genre(&self, genres: &[GenreId]) -> bool {
        self.genre_ids.iter().any(|genre| genres.contains(genre))
    }
}

/// Per-(listener, track) counters plus the score derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub listener_id: ListenerId,
    pub track_id: TrackId,
    pub play_count: u32,
    pub skip_count: u32,
    /// Cumulative listen time in seconds across all plays.
    pub listen_time_secs: u64,
    pub liked: bool,
    pub shared: bool,
    pub affinity_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl Interaction {
    /// A fresh record with every counter at zero.
    #[must_use]
    pub fn new(listener_id: ListenerId, track_id: TrackId, now: DateTime<Utc>) -> Self {
        Self {
            listener_id,
            track_id,
            play_count: 0,
            skip_count: 0,
            listen_time_secs: 0,
            liked: false,
            shared: false,
            affinity_score: 0.0,
            updated_at: now,
        }
    }
}

/// Something a listener did to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionEvent {
    Play { listen_time_secs: Option<u64> },
    Skip,
    Like,
    Unlike,
    Share,
}

impl InteractionEvent {
    /// Parse the event names accepted on the command line.
    pub fn parse(name: &str, listen_time_secs: Option<u64>) -> anyhow::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "play" => Ok(Self::Play { listen_time_secs }),
            "skip" => Ok(Self::Skip),
            "like" => Ok(Self::Like),
            "unlike" => Ok(Self::Unlike),
            "share" => Ok(Self::Share),
            other => anyhow::bail!(
                "Unknown interaction event: {other}. Use play, skip, like, unlike or share"
            ),
        }
    }
}

/// What a favorite points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FavoriteTarget {
    Track(TrackId),
    Album(AlbumId),
    Artist(ArtistId),
    Playlist(PlaylistId),
}

impl FavoriteTarget {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Track(_) => "track",
            Self::Album(_) => "album",
            Self::Artist(_) => "artist",
            Self::Playlist(_) => "playlist",
        }
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Track(id) | Self::Album(id) | Self::Artist(id) | Self::Playlist(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub listener_id: ListenerId,
    pub target: FavoriteTarget,
    pub created_at: DateTime<Utc>,
}

/// Latest play of a track by a listener. Repeat plays move `played_at`
/// forward instead of adding rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub listener_id: ListenerId,
    pub track_id: TrackId,
    pub played_at: DateTime<Utc>,
}

/// Recent and baseline play counts for one track, the raw input of the
/// viral ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayWindow {
    pub track: Track,
    pub recent_plays: u64,
    pub baseline_plays: u64,
}

/// Playlist kinds. Only the recommendation kinds are produced here; `User`
/// and `Public` exist so stored rows always map onto a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaylistType {
    User,
    Public,
    TrendingWeekly,
    NewDaily,
    NewReleases,
    ViralHits,
    DiscoveryWeekly,
    ArtistMix,
    GenreMix,
    ArtistRadio,
}

impl PlaylistType {
    /// System-wide charts, regenerated for everyone at once.
    pub const SYSTEM: [Self; 4] = [
        Self::TrendingWeekly,
        Self::NewDaily,
        Self::NewReleases,
        Self::ViralHits,
    ];

    /// Personal mixes, one per listener. Artist radio is personal too but is
    /// keyed per artist and managed by [`crate::radio`].
    pub const PERSONAL: [Self; 3] = [Self::DiscoveryWeekly, Self::ArtistMix, Self::GenreMix];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Public => "public",
            Self::TrendingWeekly => "trending-weekly",
            Self::NewDaily => "new-daily",
            Self::NewReleases => "new-releases",
            Self::ViralHits => "viral-hits",
            Self::DiscoveryWeekly => "discovery-weekly",
            Self::ArtistMix => "artist-mix",
            Self::GenreMix => "genre-mix",
            Self::ArtistRadio => "artist-radio",
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        Self::SYSTEM.contains(self)
    }

    #[must_use]
    pub fn is_personal(&self) -> bool {
        Self::PERSONAL.contains(self) || *self == Self::ArtistRadio
    }

    /// Display name for generated playlists. Radio names come from the artist.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::User | Self::Public => "Playlist",
            Self::TrendingWeekly => "Trending This Week",
            Self::NewDaily => "New Today",
            Self::NewReleases => "New Releases",
            Self::ViralHits => "Viral Hits",
            Self::DiscoveryWeekly => "Discovery Weekly",
            Self::ArtistMix => "Your Artist Mix",
            Self::GenreMix => "Your Genre Mix",
            Self::ArtistRadio => "Artist Radio",
        }
    }

    /// Last resort in cover selection.
    #[must_use]
    pub fn default_cover(&self) -> String {
        format!("covers/default-{}.png", self.as_str())
    }
}

impl fmt::Display for PlaylistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PlaylistType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::User,
            Self::Public,
            Self::TrendingWeekly,
            Self::NewDaily,
            Self::NewReleases,
            Self::ViralHits,
            Self::DiscoveryWeekly,
            Self::ArtistMix,
            Self::GenreMix,
            Self::ArtistRadio,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
        .ok_or_else(|| anyhow::anyhow!("Unknown playlist type `{s}`"))
    }
}

/// Identity under which a generated playlist is upserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaylistKey {
    pub playlist_type: PlaylistType,
    pub owner_id: Option<ListenerId>,
    pub artist_id: Option<ArtistId>,
}

impl PlaylistKey {
    #[must_use]
    pub const fn system(playlist_type: PlaylistType) -> Self {
        Self {
            playlist_type,
            owner_id: None,
            artist_id: None,
        }
    }

    #[must_use]
    pub const fn personal(playlist_type: PlaylistType, owner_id: ListenerId) -> Self {
        Self {
            playlist_type,
            owner_id: Some(owner_id),
            artist_id: None,
        }
    }

    #[must_use]
    pub const fn radio(owner_id: ListenerId, artist_id: ArtistId) -> Self {
        Self {
            playlist_type: PlaylistType::ArtistRadio,
            owner_id: Some(owner_id),
            artist_id: Some(artist_id),
        }
    }
}

/// Output of a generator, ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDraft {
    pub key: PlaylistKey,
    pub name: String,
    pub track_ids: Vec<TrackId>,
    pub cover: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub playlist_type: PlaylistType,
    pub track_ids: Vec<TrackId>,
    pub owner_id: Option<ListenerId>,
    /// Generating artist, set only for artist radio.
    pub artist_id: Option<ArtistId>,
    pub cover: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playlist {
    #[must_use]
    pub fn key(&self) -> PlaylistKey {
        PlaylistKey {
            playlist_type: self.playlist_type,
            owner_id: self.owner_id,
            artist_id: self.artist_id,
        }
    }
}
