//! SQLite implementation of [`RecommendationStore`].
//!
//! Timestamps are stored as Unix seconds. Playlists are keyed by
//! `(playlist_type, owner_key, artist_key)` under a UNIQUE constraint, with
//! `0` standing in for "no owner" / "no artist", so an upsert racing another
//! upsert for the same key turns into an update. Listener and artist ids in
//! a playlist key must therefore be positive.

use crate::model::{
    AlbumId, ArtistId, Favorite, GenreId, HistoryEvent, Interaction, ListenerId, PlayWindow,
    Playlist, PlaylistDraft, PlaylistId, PlaylistKey, PlaylistType, Track, TrackId,
};
use crate::store::RecommendationStore;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS artists (
        id   INTEGER PRIMARY KEY,
        name TEXT    NOT NULL
    );
    CREATE TABLE IF NOT EXISTS albums (
        id    INTEGER PRIMARY KEY,
        title TEXT    NOT NULL,
        cover TEXT
    );
    CREATE TABLE IF NOT EXISTS tracks (
        id            INTEGER PRIMARY KEY,
        title         TEXT    NOT NULL,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        album_id      INTEGER,
        play_count    INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL,
        cover         TEXT,
        active        INTEGER NOT NULL DEFAULT 1
    );
    CREATE INDEX IF NOT EXISTS idx_tracks_created ON tracks(created_at);
    CREATE TABLE IF NOT EXISTS track_artists (
        track_id  INTEGER NOT NULL,
        artist_id INTEGER NOT NULL,
        position  INTEGER NOT NULL,
        PRIMARY KEY (track_id, artist_id)
    );
    CREATE INDEX IF NOT EXISTS idx_track_artists_artist ON track_artists(artist_id);
    CREATE TABLE IF NOT EXISTS track_genres (
        track_id INTEGER NOT NULL,
        genre_id INTEGER NOT NULL,
        PRIMARY KEY (track_id, genre_id)
    );
    CREATE INDEX IF NOT EXISTS idx_track_genres_genre ON track_genres(genre_id);
    CREATE TABLE IF NOT EXISTS listeners (
        id     INTEGER PRIMARY KEY,
        name   TEXT    NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS interactions (
        listener_id      INTEGER NOT NULL,
        track_id         INTEGER NOT NULL,
        play_count       INTEGER NOT NULL DEFAULT 0,
        skip_count       INTEGER NOT NULL DEFAULT 0,
        listen_time_secs INTEGER NOT NULL DEFAULT 0,
        liked            INTEGER NOT NULL DEFAULT 0,
        shared           INTEGER NOT NULL DEFAULT 0,
        affinity_score   REAL    NOT NULL DEFAULT 0,
        updated_at       INTEGER NOT NULL,
        PRIMARY KEY (listener_id, track_id)
    );
    CREATE INDEX IF NOT EXISTS idx_interactions_track ON interactions(track_id);
    CREATE TABLE IF NOT EXISTS favorites (
        listener_id INTEGER NOT NULL,
        target_kind TEXT    NOT NULL,
        target_id   INTEGER NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (listener_id, target_kind, target_id)
    );
    CREATE TABLE IF NOT EXISTS history (
        listener_id INTEGER NOT NULL,
        track_id    INTEGER NOT NULL,
        played_at   INTEGER NOT NULL,
        PRIMARY KEY (listener_id, track_id)
    );
    CREATE TABLE IF NOT EXISTS play_log (
        id          INTEGER PRIMARY KEY,
        listener_id INTEGER NOT NULL,
        track_id    INTEGER NOT NULL,
        played_at   INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_play_log_played_at ON play_log(played_at);
    CREATE TABLE IF NOT EXISTS playlists (
        id            INTEGER PRIMARY KEY,
        name          TEXT    NOT NULL,
        playlist_type TEXT    NOT NULL,
        owner_key     INTEGER NOT NULL DEFAULT 0,
        artist_key    INTEGER NOT NULL DEFAULT 0,
        cover         TEXT,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL,
        UNIQUE (playlist_type, owner_key, artist_key)
    );
    CREATE TABLE IF NOT EXISTS playlist_tracks (
        playlist_id INTEGER NOT NULL,
        position    INTEGER NOT NULL,
        track_id    INTEGER NOT NULL,
        PRIMARY KEY (playlist_id, position)
    );
";

/// Columns read by [`track_from_row`], in order. Artists come back as
/// `position:artist_id` pairs so their order survives `GROUP_CONCAT`.
const TRACK_COLUMNS: &str = "
    t.id, t.title, t.duration_secs, t.album_id, t.play_count, t.created_at, t.cover, t.active,
    (SELECT GROUP_CONCAT(ta.position || ':' || ta.artist_id) FROM track_artists ta WHERE ta.track_id = t.id),
    (SELECT GROUP_CONCAT(tg.genre_id) FROM track_genres tg WHERE tg.track_id = t.id)";

const PLAYLIST_COLUMNS: &str =
    "id, name, playlist_type, owner_key, artist_key, cover, created_at, updated_at";

/// Records accepted by [`SqliteStore::import_catalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFixture {
    pub artists: Vec<ArtistRecord>,
    pub albums: Vec<AlbumRecord>,
    pub tracks: Vec<Track>,
    pub listeners: Vec<ListenerRecord>,
    pub favorites: Vec<Favorite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub id: ArtistId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub id: AlbumId,
    pub title: String,
    #[serde(default)]
    pub cover: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerRecord {
    pub id: ListenerId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Thread-safe handle on a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Self::init(conn)
    }

    /// Private database that disappears with the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Invalid SQL when creating the schema")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("Failed to stamp schema version")?;
        debug!("Database schema ready (version {SCHEMA_VERSION})");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))
    }

    pub fn insert_artist(&self, id: ArtistId, name: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO artists (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .with_context(|| format!("Failed to insert artist {id}"))?;
        Ok(())
    }

    pub fn insert_album(&self, id: AlbumId, title: &str, cover: Option<&str>) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO albums (id, title, cover) VALUES (?1, ?2, ?3)",
                params![id, title, cover],
            )
            .with_context(|| format!("Failed to insert album {id}"))?;
        Ok(())
    }

    pub fn insert_listener(&self, id: ListenerId, name: &str, active: bool) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO listeners (id, name, active) VALUES (?1, ?2, ?3)",
                params![id, name, active],
            )
            .with_context(|| format!("Failed to insert listener {id}"))?;
        Ok(())
    }

    pub fn insert_track(&self, track: &Track) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_track_in(&tx, track)?;
        tx.commit().context("Committing track insert failed")?;
        Ok(())
    }

    pub fn add_favorite(&self, favorite: &Favorite) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO favorites (listener_id, target_kind, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    favorite.listener_id,
                    favorite.target.kind(),
                    favorite.target.id(),
                    favorite.created_at.timestamp()
                ],
            )
            .with_context(|| format!("Failed to insert favorite {favorite:?}"))?;
        Ok(())
    }

    /// Load a whole fixture in one transaction.
    pub fn import_catalog(&self, catalog: &CatalogFixture) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO artists (id, name) VALUES (?1, ?2)")?;
            for artist in &catalog.artists {
                stmt.execute(params![artist.id, artist.name])
                    .with_context(|| format!("Failed to import artist {artist:?}"))?;
            }

            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO albums (id, title, cover) VALUES (?1, ?2, ?3)")?;
            for album in &catalog.albums {
                stmt.execute(params![album.id, album.title, album.cover])
                    .with_context(|| format!("Failed to import album {album:?}"))?;
            }

            let mut stmt = tx
                .prepare("INSERT OR REPLACE INTO listeners (id, name, active) VALUES (?1, ?2, ?3)")?;
            for listener in &catalog.listeners {
                stmt.execute(params![listener.id, listener.name, listener.active])
                    .with_context(|| format!("Failed to import listener {listener:?}"))?;
            }

            for track in &catalog.tracks {
                insert_track_in(&tx, track)?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO favorites (listener_id, target_kind, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for favorite in &catalog.favorites {
                stmt.execute(params![
                    favorite.listener_id,
                    favorite.target.kind(),
                    favorite.target.id(),
                    favorite.created_at.timestamp()
                ])
                .with_context(|| format!("Failed to import favorite {favorite:?}"))?;
            }
        }

        tx.commit().context("Committing catalog import failed")?;
        debug!(
            "Imported {} artists, {} albums, {} tracks, {} listeners, {} favorites",
            catalog.artists.len(),
            catalog.albums.len(),
            catalog.tracks.len(),
            catalog.listeners.len(),
            catalog.favorites.len()
        );
        Ok(())
    }

    fn favorites_of_kind(&self, listener_id: ListenerId, kind: &str) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT target_id FROM favorites
             WHERE listener_id = ?1 AND target_kind = ?2
             ORDER BY created_at DESC, target_id",
        )?;
        let ids = stmt
            .query_map(params![listener_id, kind], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .with_context(|| format!("Cannot query {kind} favorites of listener {listener_id}"))?;
        Ok(ids)
    }
}

fn insert_track_in(conn: &Connection, track: &Track) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tracks
            (id, title, duration_secs, album_id, play_count, created_at, cover, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            track.id,
            track.title,
            track.duration_secs,
            track.album_id,
            to_sql_int(track.play_count),
            track.created_at.timestamp(),
            track.cover,
            track.active
        ],
    )
    .with_context(|| format!("Invalid SQL statement when inserting track {}", track.id))?;

    conn.execute("DELETE FROM track_artists WHERE track_id = ?1", [track.id])?;
    conn.execute("DELETE FROM track_genres WHERE track_id = ?1", [track.id])?;

    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO track_artists (track_id, artist_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, artist_id) in track.artist_ids.iter().enumerate() {
        stmt.execute(params![track.id, artist_id, to_sql_int(position as u64)])?;
    }

    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO track_genres (track_id, genre_id) VALUES (?1, ?2)")?;
    for genre_id in &track.genre_ids {
        stmt.execute(params![track.id, genre_id])?;
    }
    Ok(())
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// `"1:7,0:3"` → `[3, 7]`.
fn parse_positioned_ids(raw: Option<String>) -> Vec<i64> {
    let mut pairs: Vec<(i64, i64)> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|pair| {
            let (position, id) = pair.split_once(':')?;
            Some((position.trim().parse().ok()?, id.trim().parse().ok()?))
        })
        .collect();
    pairs.sort_unstable();
    pairs.into_iter().map(|(_, id)| id).collect()
}

fn parse_ids(raw: Option<String>) -> Vec<i64> {
    let mut ids: Vec<i64> = raw
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect();
    ids.sort_unstable();
    ids
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        title: row.get(1)?,
        duration_secs: row.get(2)?,
        album_id: row.get(3)?,
        play_count: from_sql_count(row.get(4)?),
        created_at: from_ts(row.get(5)?),
        cover: row.get(6)?,
        active: row.get(7)?,
        artist_ids: parse_positioned_ids(row.get(8)?),
        genre_ids: parse_ids(row.get(9)?),
    })
}

fn query_tracks<P: rusqlite::Params>(conn: &Connection, tail: &str, params: P) -> Result<Vec<Track>> {
    let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks t {tail}");
    let mut stmt = conn
        .prepare_cached(&sql)
        .with_context(|| format!("Invalid SQL statement: {sql}"))?;
    let tracks = stmt
        .query_map(params, track_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Cannot query tracks")?;
    Ok(tracks)
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    Ok(Interaction {
        listener_id: row.get(0)?,
        track_id: row.get(1)?,
        play_count: row.get(2)?,
        skip_count: row.get(3)?,
        listen_time_secs: from_sql_count(row.get(4)?),
        liked: row.get(5)?,
        shared: row.get(6)?,
        affinity_score: row.get(7)?,
        updated_at: from_ts(row.get(8)?),
    })
}

const INTERACTION_COLUMNS: &str = "listener_id, track_id, play_count, skip_count, listen_time_secs, liked, shared, affinity_score, updated_at";

struct PlaylistRow {
    id: PlaylistId,
    name: String,
    kind: String,
    owner_key: i64,
    artist_key: i64,
    cover: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl PlaylistRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            owner_key: row.get(3)?,
            artist_key: row.get(4)?,
            cover: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_playlist(self, conn: &Connection) -> Result<Playlist> {
        let mut stmt = conn.prepare_cached(
            "SELECT track_id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position",
        )?;
        let track_ids = stmt
            .query_map([self.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<TrackId>>>()
            .with_context(|| format!("Cannot query tracks of playlist {}", self.id))?;

        Ok(Playlist {
            id: self.id,
            name: self.name,
            playlist_type: self.kind.parse::<PlaylistType>()?,
            track_ids,
            owner_id: key_to_id(self.owner_key),
            artist_id: key_to_id(self.artist_key),
            cover: self.cover,
            created_at: from_ts(self.created_at),
            updated_at: from_ts(self.updated_at),
        })
    }
}

fn id_to_key(id: Option<i64>) -> Result<i64> {
    match id {
        None => Ok(0),
        Some(id) if id > 0 => Ok(id),
        Some(id) => bail!("Playlist keys take positive ids, got {id}"),
    }
}

fn key_to_id(key: i64) -> Option<i64> {
    (key != 0).then_some(key)
}

fn interaction_in(
    conn: &Connection,
    listener_id: ListenerId,
    track_id: TrackId,
) -> Result<Option<Interaction>> {
    conn.query_row(
        &format!("SELECT {INTERACTION_COLUMNS} FROM interactions WHERE listener_id = ?1 AND track_id = ?2"),
        params![listener_id, track_id],
        interaction_from_row,
    )
    .optional()
    .with_context(|| format!("Failed to query interaction {listener_id}/{track_id}"))
}

fn save_interaction_in(conn: &Connection, interaction: &Interaction) -> Result<()> {
    conn.execute(
        "INSERT INTO interactions
            (listener_id, track_id, play_count, skip_count, listen_time_secs,
             liked, shared, affinity_score, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (listener_id, track_id) DO UPDATE SET
            play_count = excluded.play_count,
            skip_count = excluded.skip_count,
            listen_time_secs = excluded.listen_time_secs,
            liked = excluded.liked,
            shared = excluded.shared,
            affinity_score = excluded.affinity_score,
            updated_at = excluded.updated_at",
        params![
            interaction.listener_id,
            interaction.track_id,
            interaction.play_count,
            interaction.skip_count,
            to_sql_int(interaction.listen_time_secs),
            interaction.liked,
            interaction.shared,
            interaction.affinity_score,
            interaction.updated_at.timestamp()
        ],
    )
    .with_context(|| format!("Invalid SQL statement when saving {interaction:?}"))?;
    Ok(())
}

/// Play log row, history move and lifetime count bump for one play.
fn record_play_in(
    conn: &Connection,
    listener_id: ListenerId,
    track_id: TrackId,
    played_at: DateTime<Utc>,
) -> Result<()> {
    let at = played_at.timestamp();
    conn.execute(
        "INSERT INTO play_log (listener_id, track_id, played_at) VALUES (?1, ?2, ?3)",
        params![listener_id, track_id, at],
    )?;
    conn.execute(
        "INSERT INTO history (listener_id, track_id, played_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (listener_id, track_id) DO UPDATE SET played_at = excluded.played_at",
        params![listener_id, track_id, at],
    )?;
    conn.execute("UPDATE tracks SET play_count = play_count + 1 WHERE id = ?1", [track_id])?;
    trace!("Recorded play of track {track_id} by listener {listener_id}");
    Ok(())
}

impl RecommendationStore for SqliteStore {
    fn tracks_created_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        query_tracks(
            &conn,
            "WHERE t.active = 1 AND t.created_at >= ?1 ORDER BY t.created_at DESC, t.id DESC LIMIT ?2",
            params![since.timestamp(), sql_limit(limit)],
        )
    }

    fn tracks_trending_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        query_tracks(
            &conn,
            "JOIN (SELECT track_id, COUNT(*) AS plays FROM play_log
                   WHERE played_at >= ?1 GROUP BY track_id) p ON p.track_id = t.id
             WHERE t.active = 1
             ORDER BY p.plays DESC, t.play_count DESC, t.id
             LIMIT ?2",
            params![since.timestamp(), sql_limit(limit)],
        )
    }

    fn play_windows_since(
        &self,
        recent_since: DateTime<Utc>,
        baseline_since: DateTime<Utc>,
        baseline_offset: f64,
        limit: usize,
    ) -> Result<Vec<PlayWindow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TRACK_COLUMNS}, w.recent, w.baseline FROM tracks t
             JOIN (SELECT track_id,
                          SUM(CASE WHEN played_at >= ?1 THEN 1 ELSE 0 END) AS recent,
                          SUM(CASE WHEN played_at <  ?1 THEN 1 ELSE 0 END) AS baseline
                   FROM play_log WHERE played_at >= ?2 GROUP BY track_id) w ON w.track_id = t.id
             WHERE t.active = 1 AND w.recent > 0
             ORDER BY CASE WHEN w.baseline + ?3 > 0 THEN w.recent * 1.0 / (w.baseline + ?3)
                           ELSE 1e308 END DESC,
                      w.recent DESC, t.id
             LIMIT ?4"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let windows = stmt
            .query_map(
                params![
                    recent_since.timestamp(),
                    baseline_since.timestamp(),
                    baseline_offset,
                    sql_limit(limit)
                ],
                |row| {
                    Ok(PlayWindow {
                        track: track_from_row(row)?,
                        recent_plays: from_sql_count(row.get(10)?),
                        baseline_plays: from_sql_count(row.get(11)?),
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Cannot query play windows")?;
        Ok(windows)
    }

    fn tracks_by_artist(&self, artist_id: ArtistId) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        query_tracks(
            &conn,
            "JOIN track_artists a ON a.track_id = t.id
             WHERE a.artist_id = ?1 AND t.active = 1
             ORDER BY t.created_at DESC, t.id",
            [artist_id],
        )
    }

    fn tracks_by_genre(&self, genre_id: GenreId, limit: usize) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        query_tracks(
            &conn,
            "JOIN track_genres g ON g.track_id = t.id
             WHERE g.genre_id = ?1 AND t.active = 1
             ORDER BY t.play_count DESC, t.id
             LIMIT ?2",
            params![genre_id, sql_limit(limit)],
        )
    }

    fn active_tracks(&self, limit: usize) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        query_tracks(
            &conn,
            "WHERE t.active = 1 ORDER BY RANDOM() LIMIT ?1",
            [sql_limit(limit)],
        )
    }

    fn tracks_by_ids(&self, ids: &[TrackId]) -> Result<Vec<Track>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks t WHERE t.id = ?1");
        let mut stmt = conn.prepare_cached(&sql)?;

        let mut tracks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(track) = stmt.query_row([id], track_from_row).optional()? {
                tracks.push(track);
            }
        }
        Ok(tracks)
    }

    fn track(&self, track_id: TrackId) -> Result<Option<Track>> {
        Ok(self.tracks_by_ids(&[track_id])?.into_iter().next())
    }

    fn album_cover(&self, album_id: AlbumId) -> Result<Option<String>> {
        let conn = self.conn()?;
        let cover = conn
            .query_row("SELECT cover FROM albums WHERE id = ?1", [album_id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .with_context(|| format!("Failed to query cover of album {album_id}"))?;
        Ok(cover.flatten())
    }

    fn artist_name(&self, artist_id: ArtistId) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT name FROM artists WHERE id = ?1", [artist_id], |row| row.get(0))
            .optional()
            .with_context(|| format!("Failed to query artist {artist_id}"))
    }

    fn listener_exists(&self, listener_id: ListenerId) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM listeners WHERE id = ?1", [listener_id], |_| Ok(()))
            .optional()
            .with_context(|| format!("Failed to query listener {listener_id}"))?;
        Ok(found.is_some())
    }

    fn active_listeners(&self) -> Result<Vec<ListenerId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id FROM listeners WHERE active = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<ListenerId>>>()
            .context("Cannot query active listeners")?;
        Ok(ids)
    }

    fn interaction(&self, listener_id: ListenerId, track_id: TrackId) -> Result<Option<Interaction>> {
        interaction_in(&*self.conn()?, listener_id, track_id)
    }

    fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        save_interaction_in(&*self.conn()?, interaction)
    }

    fn record_play(
        &self,
        listener_id: ListenerId,
        track_id: TrackId,
        played_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        record_play_in(&tx, listener_id, track_id, played_at)?;
        tx.commit()
            .with_context(|| format!("Committing play of track {track_id} failed"))?;
        Ok(())
    }

    fn apply_interaction(
        &self,
        listener_id: ListenerId,
        track_id: TrackId,
        now: DateTime<Utc>,
        played: bool,
        update: &mut dyn FnMut(&mut Interaction),
    ) -> Result<Interaction> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut interaction = interaction_in(&tx, listener_id, track_id)?
            .unwrap_or_else(|| Interaction::new(listener_id, track_id, now));
        update(&mut interaction);
        if played {
            record_play_in(&tx, listener_id, track_id, now)?;
        }
        save_interaction_in(&tx, &interaction)?;

        tx.commit()
            .with_context(|| format!("Committing interaction {listener_id}/{track_id} failed"))?;
        Ok(interaction)
    }

    fn top_interactions_by_listener(
        &self,
        listener_id: ListenerId,
        limit: usize,
    ) -> Result<Vec<Interaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions
             WHERE listener_id = ?1
             ORDER BY affinity_score DESC, updated_at DESC, track_id
             LIMIT ?2"
        ))?;
        let interactions = stmt
            .query_map(params![listener_id, sql_limit(limit)], interaction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Cannot query interactions of listener {listener_id}"))?;
        Ok(interactions)
    }

    fn collaborative_candidates(
        &self,
        listener_id: ListenerId,
        limit: usize,
    ) -> Result<Vec<(TrackId, f64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT other.track_id, SUM(other.affinity_score) AS weight
             FROM interactions mine
             JOIN interactions peer
               ON peer.track_id = mine.track_id
              AND peer.listener_id != mine.listener_id
              AND peer.affinity_score > 0
             JOIN interactions other
               ON other.listener_id = peer.listener_id
              AND other.affinity_score > 0
             JOIN tracks t ON t.id = other.track_id AND t.active = 1
             WHERE mine.listener_id = ?1
               AND mine.affinity_score > 0
               AND other.track_id NOT IN
                   (SELECT track_id FROM interactions WHERE listener_id = ?1)
             GROUP BY other.track_id
             ORDER BY weight DESC, other.track_id
             LIMIT ?2",
        )?;
        let candidates = stmt
            .query_map(params![listener_id, sql_limit(limit)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<(TrackId, f64)>>>()
            .with_context(|| format!("Cannot query peers of listener {listener_id}"))?;
        Ok(candidates)
    }

    fn favorite_artists_by_listener(&self, listener_id: ListenerId) -> Result<Vec<ArtistId>> {
        self.favorites_of_kind(listener_id, "artist")
    }

    fn favorite_tracks_by_listener(&self, listener_id: ListenerId) -> Result<Vec<TrackId>> {
        self.favorites_of_kind(listener_id, "track")
    }

    fn favorite_albums_by_listener(&self, listener_id: ListenerId) -> Result<Vec<AlbumId>> {
        self.favorites_of_kind(listener_id, "album")
    }

    fn favorite_playlists_by_listener(&self, listener_id: ListenerId) -> Result<Vec<PlaylistId>> {
        self.favorites_of_kind(listener_id, "playlist")
    }

    fn history_since(
        &self,
        listener_id: ListenerId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HistoryEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT listener_id, track_id, played_at FROM history
             WHERE listener_id = ?1 AND played_at >= ?2
             ORDER BY played_at DESC, track_id
             LIMIT ?3",
        )?;
        let events = stmt
            .query_map(
                params![listener_id, since.timestamp(), sql_limit(limit)],
                |row| {
                    Ok(HistoryEvent {
                        listener_id: row.get(0)?,
                        track_id: row.get(1)?,
                        played_at: from_ts(row.get(2)?),
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Cannot query history of listener {listener_id}"))?;
        Ok(events)
    }

    fn find_playlist(&self, key: &PlaylistKey) -> Result<Option<Playlist>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {PLAYLIST_COLUMNS} FROM playlists
                     WHERE playlist_type = ?1 AND owner_key = ?2 AND artist_key = ?3"
                ),
                params![
                    key.playlist_type.as_str(),
                    id_to_key(key.owner_id)?,
                    id_to_key(key.artist_id)?
                ],
                PlaylistRow::from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query playlist {key:?}"))?;

        row.map(|row| row.into_playlist(&conn)).transpose()
    }

    fn playlists_for_owner(&self, listener_id: ListenerId) -> Result<Vec<Playlist>> {
        let owner_key = id_to_key(Some(listener_id))?;
        let conn = self.conn()?;
        let rows = {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {PLAYLIST_COLUMNS} FROM playlists
                 WHERE owner_key = ?1
                 ORDER BY playlist_type, artist_key"
            ))?;
            let rows = stmt
                .query_map([owner_key], PlaylistRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("Cannot query playlists of listener {listener_id}"))?;
            rows
        };

        rows.into_iter().map(|row| row.into_playlist(&conn)).collect()
    }

    fn upsert_playlist(&self, draft: &PlaylistDraft, now: DateTime<Utc>) -> Result<Playlist> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id: PlaylistId = tx
            .query_row(
                "INSERT INTO playlists
                    (name, playlist_type, owner_key, artist_key, cover, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (playlist_type, owner_key, artist_key) DO UPDATE SET
                    name = excluded.name,
                    cover = excluded.cover,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    draft.name,
                    draft.key.playlist_type.as_str(),
                    id_to_key(draft.key.owner_id)?,
                    id_to_key(draft.key.artist_id)?,
                    draft.cover,
                    now.timestamp()
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to upsert playlist {:?}", draft.key))?;

        tx.execute("DELETE FROM playlist_tracks WHERE playlist_id = ?1", [id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO playlist_tracks (playlist_id, position, track_id) VALUES (?1, ?2, ?3)",
            )?;
            for (position, track_id) in draft.track_ids.iter().enumerate() {
                stmt.execute(params![id, to_sql_int(position as u64), track_id])?;
            }
        }

        let playlist = tx
            .query_row(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                [id],
                PlaylistRow::from_row,
            )?
            .into_playlist(&tx)?;

        tx.commit()
            .with_context(|| format!("Committing playlist {id} failed"))?;
        Ok(playlist)
    }
}
