//! Scheduled entry points. Each one fans a single engine operation out over
//! every chart or every active listener in parallel. A failing item is
//! logged and counted, the rest of the sweep carries on.

use crate::engine::{RecommendationEngine, RefreshPolicy};
use crate::model::{ListenerId, PlaylistType};
use crate::radio::RadioState;
use crate::store::RecommendationStore;
use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use std::fmt;

/// Tally of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items processed without error (including those with nothing to do).
    pub succeeded: usize,
    /// `(item, error)` for every item that failed.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record<T>(&mut self, item: String, outcome: Result<T>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(err) => {
                warn!("{item} failed: {err:#}");
                self.failed.push((item, format!("{err:#}")));
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
        self
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed.len())
    }
}

fn sweep<T, F>(items: Vec<T>, label: impl Fn(&T) -> String + Sync, work: F) -> BatchReport
where
    T: Send + Sync,
    F: Fn(&T) -> Result<BatchReport> + Sync,
{
    let mut report = items
        .par_iter()
        .map(|item| {
            let mut report = BatchReport::default();
            match work(item) {
                Ok(inner) => report = report.merge(inner),
                Err(err) => report.record::<()>(label(item), Err(err)),
            }
            report
        })
        .reduce(BatchReport::default, BatchReport::merge);
    report.failed.sort();
    report
}

fn active_listeners<S: RecommendationStore>(engine: &RecommendationEngine<S>) -> Result<Vec<ListenerId>> {
    engine
        .store()
        .active_listeners()
        .context("Failed to list active listeners")
}

/// Regenerate every chart.
pub fn refresh_system_playlists<S: RecommendationStore>(engine: &RecommendationEngine<S>) -> BatchReport {
    let report = sweep(
        PlaylistType::SYSTEM.to_vec(),
        |kind| kind.to_string(),
        |kind| {
            let mut report = BatchReport::default();
            report.record(kind.to_string(), engine.generate_system_playlist(*kind));
            Ok(report)
        },
    );
    info!("System playlists refreshed: {report}");
    report
}

/// Refresh the personal mixes of every active listener.
pub fn refresh_all_personal<S: RecommendationStore>(
    engine: &RecommendationEngine<S>,
    policy: RefreshPolicy,
) -> Result<BatchReport> {
    let report = sweep(
        active_listeners(engine)?,
        |listener| format!("listener {listener}"),
        |&listener| {
            let mut report = BatchReport::default();
            report.record(
                format!("listener {listener}"),
                engine.refresh_personal_playlists(listener, policy),
            );
            Ok(report)
        },
    );
    info!("Personal playlists refreshed: {report}");
    Ok(report)
}

/// Regenerate every stale radio of every active listener. Fresh radios are
/// left alone, so running this twice in a row does nothing the second time.
pub fn sweep_stale_radios<S: RecommendationStore>(engine: &RecommendationEngine<S>) -> Result<BatchReport> {
    let report = sweep(
        active_listeners(engine)?,
        |listener| format!("listener {listener}"),
        |&listener| {
            let mut report = BatchReport::default();
            for (playlist, state) in engine.radio_states(listener)? {
                let Some(artist) = playlist.artist_id else {
                    continue;
                };
                if state == RadioState::Stale {
                    report.record(
                        format!("radio {listener}/{artist}"),
                        engine.generate_artist_radio(listener, artist),
                    );
                }
            }
            Ok(report)
        },
    );
    info!("Stale radios swept: {report}");
    Ok(report)
}

/// Top up every active listener to `target` fresh radios.
pub fn refresh_all_radios<S: RecommendationStore>(
    engine: &RecommendationEngine<S>,
    target: usize,
) -> Result<BatchReport> {
    let report = sweep(
        active_listeners(engine)?,
        |listener| format!("listener {listener}"),
        |&listener| {
            let mut report = BatchReport::default();
            report.record(format!("listener {listener}"), engine.artist_radios(listener, target));
            Ok(report)
        },
    );
    info!("Radios topped up to {target}: {report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::SqliteStore;
    use crate::engine::Clock;
    use crate::model::{Favorite, FavoriteTarget, PlaylistKey, Track};
    use chrono::{Duration, TimeZone, Utc};

    fn create_tmp_engine() -> RecommendationEngine<SqliteStore> {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        for listener in 1..=4 {
            store
                .insert_listener(listener, &format!("listener {listener}"), listener != 4)
                .unwrap();
            store
                .add_favorite(&Favorite {
                    listener_id: listener,
                    target: FavoriteTarget::Artist(listener),
                    created_at: now,
                })
                .unwrap();
        }
        for artist in 1..=3 {
            for n in 0..25 {
                store
                    .insert_track(&Track {
                        id: artist * 100 + n,
                        title: format!("Track {n}"),
                        duration_secs: 180,
                        artist_ids: vec![artist],
                        genre_ids: vec![1],
                        album_id: None,
                        play_count: 0,
                        created_at: now - Duration::hours(n),
                        cover: None,
                        active: true,
                    })
                    .unwrap();
            }
        }
        RecommendationEngine::new(store, EngineConfig::default())
            .with_seed(9)
            .with_clock(Clock::Fixed(now))
    }

    #[test]
    fn test_system_refresh_counts_empty_charts_as_success() {
        let engine = create_tmp_engine();
        let report = refresh_system_playlists(&engine);
        assert!(report.is_clean());
        assert_eq!(report.succeeded, 4);
        assert!(engine
            .store()
            .find_playlist(&PlaylistKey::system(PlaylistType::NewDaily))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_personal_refresh_visits_active_listeners_only() {
        let engine = create_tmp_engine();
        let report = refresh_all_personal(&engine, RefreshPolicy::Always).unwrap();
        assert_eq!(report.succeeded, 3);
        assert!(engine.store().playlists_for_owner(4).unwrap().is_empty());
    }

    #[test]
    fn test_radio_top_up_visits_every_active_listener() {
        let engine = create_tmp_engine();
        let report = refresh_all_radios(&engine, 1).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded, 3);
        assert_eq!(engine.radios_of(1).unwrap().len(), 1);
    }

    #[test]
    fn test_sweep_only_touches_stale_radios() {
        let mut engine = create_tmp_engine();
        engine.generate_artist_radio(1, 1).unwrap();
        engine.generate_artist_radio(2, 2).unwrap();

        let report = sweep_stale_radios(&engine).unwrap();
        assert_eq!(report.succeeded, 0);

        let later = engine.now() + Duration::days(8);
        engine.set_clock(Clock::Fixed(later));
        let report = sweep_stale_radios(&engine).unwrap();
        assert_eq!(report.succeeded, 2);
        for radio in engine.radios_of(1).unwrap() {
            assert_eq!(radio.updated_at, later);
        }

        let report = sweep_stale_radios(&engine).unwrap();
        assert_eq!(report.succeeded, 0);
    }

    #[test]
    fn test_report_merge_and_display() {
        let mut report = BatchReport::default();
        report.record("a".to_string(), Ok(()));
        report.record::<()>("b".to_string(), Err(anyhow::anyhow!("boom")));
        assert_eq!(report.to_string(), "1 succeeded, 1 failed");
        assert_eq!(report.failed, vec![("b".to_string(), "boom".to_string())]);
    }
}
