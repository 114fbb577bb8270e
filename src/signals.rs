//! Time-windowed catalog signals and the cold-start fallback chain.

use crate::model::Track;
use crate::store::RecommendationStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub trending_window_days: i64,
    pub viral: ViralFormula,
    /// How many candidate windows to pull before ranking by velocity. The
    /// store already orders them by velocity, so this bounds work only.
    pub viral_pool: usize,
    /// Windows of the "new tracks" fallback stages, shortest first.
    pub fallback_new_days: [i64; 2],
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            trending_window_days: 7,
            viral: ViralFormula::default(),
            viral_pool: 500,
            fallback_new_days: [30, 90],
        }
    }
}

/// `velocity = (recent / recent_days) / (baseline / baseline_days + smoothing)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViralFormula {
    pub recent_days: i64,
    /// Length of the baseline window that precedes the recent one.
    pub baseline_days: i64,
    pub smoothing: f64,
}

impl Default for ViralFormula {
    fn default() -> Self {
        Self {
            recent_days: 3,
            baseline_days: 27,
            smoothing: 1.0,
        }
    }
}

impl ViralFormula {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn velocity(&self, recent_plays: u64, baseline_plays: u64) -> f64 {
        let recent_rate = recent_plays as f64 / self.recent_days.max(1) as f64;
        let baseline_rate = baseline_plays as f64 / self.baseline_days.max(1) as f64;
        recent_rate / (baseline_rate + self.smoothing)
    }

    /// Baseline plays equivalent to the smoothing term. Velocity orders the
    /// same way as `recent / (baseline + baseline_offset)`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn baseline_offset(&self) -> f64 {
        self.smoothing * self.baseline_days.max(1) as f64
    }
}

/// Which link of the fallback chain produced a candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStage {
    Primary,
    New30,
    New90,
    GlobalPool,
    Exhausted,
}

impl fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::New30 => "new (short window)",
            Self::New90 => "new (long window)",
            Self::GlobalPool => "global pool",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Read-only view of the catalog signals at a fixed instant.
pub struct SignalSources<'a> {
    store: &'a dyn RecommendationStore,
    now: DateTime<Utc>,
    config: &'a SignalConfig,
}

impl<'a> SignalSources<'a> {
    #[must_use]
    pub fn new(store: &'a dyn RecommendationStore, now: DateTime<Utc>, config: &'a SignalConfig) -> Self {
        Self { store, now, config }
    }

    /// Most played tracks of the trending window.
    pub fn trending(&self, limit: usize) -> Result<Vec<Track>> {
        let since = self.now - Duration::days(self.config.trending_window_days);
        self.store
            .tracks_trending_since(since, limit)
            .context("Failed to read trending tracks")
    }

    /// Tracks created in the last `days` days, newest first.
    pub fn new_since(&self, days: i64, limit: usize) -> Result<Vec<Track>> {
        self.store
            .tracks_created_since(self.now - Duration::days(days), limit)
            .with_context(|| format!("Failed to read tracks created in the last {days} days"))
    }

    /// Tracks ranked by play velocity of the recent window against the
    /// baseline window preceding it.
    pub fn viral(&self, limit: usize) -> Result<Vec<Track>> {
        let formula = &self.config.viral;
        let recent_since = self.now - Duration::days(formula.recent_days);
        let baseline_since = recent_since - Duration::days(formula.baseline_days);

        let mut ranked: Vec<(f64, u64, Track)> = self
            .store
            .play_windows_since(
                recent_since,
                baseline_since,
                formula.baseline_offset(),
                self.config.viral_pool.max(limit),
            )
            .context("Failed to read play windows")?
            .into_iter()
            .filter(|window| window.recent_plays > 0)
            .map(|window| {
                let velocity = formula.velocity(window.recent_plays, window.baseline_plays);
                (velocity, window.recent_plays, window.track)
            })
            .collect();

        ranked.sort_by(|(va, ra, ta), (vb, rb, tb)| {
            vb.partial_cmp(va)
                .unwrap_or(Ordering::Equal)
                .then_with(|| rb.cmp(ra))
                .then_with(|| ta.id.cmp(&tb.id))
        });
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(_, _, track)| track).collect())
    }

    /// Any active tracks, unordered.
    pub fn global_pool(&self, limit: usize) -> Result<Vec<Track>> {
        self.store
            .active_tracks(limit)
            .context("Failed to read the global track pool")
    }

    /// Walk the fallback chain until some stage yields tracks.
    ///
    /// `primary` is used as-is when non-empty. Otherwise new tracks of the
    /// short window, new tracks of the long window and finally the global
    /// pool are tried in turn. An empty catalog ends in
    /// [`FallbackStage::Exhausted`] with no tracks, never an error.
    pub fn with_fallback(&self, primary: Vec<Track>, limit: usize) -> Result<(Vec<Track>, FallbackStage)> {
        if !primary.is_empty() {
            return Ok((primary, FallbackStage::Primary));
        }

        let [short, long] = self.config.fallback_new_days;
        for (days, stage) in [(short, FallbackStage::New30), (long, FallbackStage::New90)] {
            let tracks = self.new_since(days, limit)?;
            if !tracks.is_empty() {
                debug!("Fallback chain settled on {stage} with {} tracks", tracks.len());
                return Ok((tracks, stage));
            }
        }

        let pool = self.global_pool(limit)?;
        if pool.is_empty() {
            debug!("Fallback chain exhausted: no active tracks");
            return Ok((pool, FallbackStage::Exhausted));
        }
        debug!("Fallback chain settled on {} with {} tracks", FallbackStage::GlobalPool, pool.len());
        Ok((pool, FallbackStage::GlobalPool))
    }
}
