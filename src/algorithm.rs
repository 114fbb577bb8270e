//! Interaction scoring.
//!
//! Turns the raw counters of an [`Interaction`] into a single affinity score.
//! The score is a pure function of the counters and the track duration, so it
//! can be recomputed at any time and always lands on the same value.

use crate::model::Interaction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tunable weights of the affinity formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringContext {
    /// Multiplier on `ln(1 + plays)`.
    pub play_weight: f64,
    /// How much a full listen amplifies the play term.
    pub completion_weight: f64,
    /// Subtracted once per skip.
    pub skip_weight: f64,
    pub like_bonus: f64,
    pub share_bonus: f64,
}

impl Default for ScoringContext {
    fn default() -> Self {
        Self {
            play_weight: 1.0,
            completion_weight: 1.0,
            skip_weight: 0.5,
            like_bonus: 2.0,
            share_bonus: 1.5,
        }
    }
}

type ScoreCache = Arc<Mutex<HashMap<InteractionFingerprint, f64>>>;

/// Everything the formula reads, in hashable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct InteractionFingerprint {
    plays: u32,
    skips: u32,
    listen_time_secs: u64,
    duration_secs: u32,
    liked: bool,
    shared: bool,
    context: [u64; 5],
}

impl InteractionFingerprint {
    fn new(interaction: &Interaction, duration_secs: u32, context: &ScoringContext) -> Self {
        Self {
            plays: interaction.play_count,
            skips: interaction.skip_count,
            listen_time_secs: interaction.listen_time_secs,
            duration_secs,
            liked: interaction.liked,
            shared: interaction.shared,
            context: [
                context.play_weight.to_bits(),
                context.completion_weight.to_bits(),
                context.skip_weight.to_bits(),
                context.like_bonus.to_bits(),
                context.share_bonus.to_bits(),
            ],
        }
    }
}

lazy_static::lazy_static! {
    /// Memoised scores keyed by counter fingerprint.
    static ref SCORE_CACHE: ScoreCache = Arc::new(Mutex::new(HashMap::new()));
}

const CACHE_LIMIT: usize = 10_000;

/// Affinity score of one interaction.
///
/// ```text
/// plays_term = play_weight * ln(1 + plays)
/// engaged    = plays_term * (1 + completion_weight * completion)
/// score      = max(0, engaged - skip_weight * skips)
///              + liked * like_bonus + shared * share_bonus
/// ```
///
/// `completion` is the average fraction of the track heard per play,
/// clamped to `[0, 1]`, and zero when the duration is unknown.
///
/// # Examples
///
/// ```
/// use curator::algorithm::{calculate_score, ScoringContext};
/// use curator::model::Interaction;
///
/// let mut interaction = Interaction::new(1, 1, chrono::Utc::now());
/// interaction.play_count = 4;
/// interaction.listen_time_secs = 800;
///
/// let score = calculate_score(&interaction, 200, &ScoringContext::default());
/// assert!(score > 0.0);
/// ```
#[must_use]
pub fn calculate_score(interaction: &Interaction, duration_secs: u32, context: &ScoringContext) -> f64 {
    let fingerprint = InteractionFingerprint::new(interaction, duration_secs, context);

    if let Ok(cache) = SCORE_CACHE.lock() {
        if let Some(&cached) = cache.get(&fingerprint) {
            return cached;
        }
    }

    let score = engagement(interaction, duration_secs, context)
        .pipe(|engaged| engaged - context.skip_weight * f64::from(interaction.skip_count))
        .max(0.0)
        .pipe(|score| apply_bonuses(score, interaction, context));

    if let Ok(mut cache) = SCORE_CACHE.lock() {
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(fingerprint, score);
    }

    log::trace!(
        "Scored listener {} / track {}: {score:.3}",
        interaction.listener_id,
        interaction.track_id
    );
    score
}

/// Average completion ratio across all plays, in `[0, 1]`.
#[must_use]
pub fn completion_ratio(interaction: &Interaction, duration_secs: u32) -> f64 {
    match (interaction.play_count, duration_secs) {
        (0, _) | (_, 0) => 0.0,
        (plays, duration) => {
            #[allow(clippy::cast_precision_loss)]
            let heard = interaction.listen_time_secs as f64;
            (heard / (f64::from(plays) * f64::from(duration))).clamp(0.0, 1.0)
        }
    }
}

#[inline]
fn engagement(interaction: &Interaction, duration_secs: u32, context: &ScoringContext) -> f64 {
    let plays_term = context.play_weight * f64::from(interaction.play_count).ln_1p();
    plays_term * (1.0 + context.completion_weight * completion_ratio(interaction, duration_secs))
}

#[inline]
fn apply_bonuses(score: f64, interaction: &Interaction, context: &ScoringContext) -> f64 {
    let like = if interaction.liked { context.like_bonus } else { 0.0 };
    let share = if interaction.shared { context.share_bonus } else { 0.0 };
    score + like + share
}

trait PipelineExt<T> {
    fn pipe<U>(self, f: impl FnOnce(T) -> U) -> U;
}

impl<T> PipelineExt<T> for T {
    #[inline]
    fn pipe<U>(self, f: impl FnOnce(T) -> U) -> U {
        f(self)
    }
}

/// Score many interactions at once. Each entry carries the duration of its
/// track. Order is preserved.
#[must_use]
pub fn batch_calculate_scores(
    interactions: &[(Interaction, u32)],
    context: &ScoringContext,
) -> Vec<f64> {
    interactions
        .par_iter()
        .map(|(interaction, duration)| calculate_score(interaction, *duration, context))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn interaction(plays: u32, skips: u32, listen: u64) -> Interaction {
        Interaction {
            play_count: plays,
            skip_count: skips,
            listen_time_secs: listen,
            ..Interaction::new(1, 1, Utc::now())
        }
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let context = ScoringContext::default();
        let subject = interaction(10, 2, 1800);

        let first = calculate_score(&subject, 200, &context);
        let second = calculate_score(&subject, 200, &context);

        assert_eq!(first, second, "Scoring must be deterministic");
    }

    #[test]
    fn test_plays_have_diminishing_returns() {
        let context = ScoringContext::default();
        let s1 = calculate_score(&interaction(1, 0, 0), 0, &context);
        let s10 = calculate_score(&interaction(10, 0, 0), 0, &context);
        let s100 = calculate_score(&interaction(100, 0, 0), 0, &context);

        assert!(s10 > s1);
        assert!(s100 > s10);
        assert!(s100 - s10 < (s10 - s1) * 9.0, "Growth should saturate");
    }

    #[test]
    fn test_skips_lower_the_score() {
        let context = ScoringContext::default();
        let clean = calculate_score(&interaction(10, 0, 0), 0, &context);
        let skipped = calculate_score(&interaction(10, 3, 0), 0, &context);
        assert!(skipped < clean);
    }

    #[test]
    fn test_full_listens_beat_partial_listens() {
        let context = ScoringContext::default();
        let full = calculate_score(&interaction(5, 0, 1000), 200, &context);
        let partial = calculate_score(&interaction(5, 0, 250), 200, &context);
        assert!(full > partial);
    }

    #[test]
    fn test_zero_duration_does_not_divide_by_zero() {
        let context = ScoringContext::default();
        let subject = interaction(3, 0, 500);

        assert_eq!(completion_ratio(&subject, 0), 0.0);
        let score = calculate_score(&subject, 0, &context);
        assert!(score.is_finite());
        assert_eq!(score, 3f64.ln_1p());
    }

    #[test]
    fn test_completion_is_clamped() {
        let subject = interaction(1, 0, 10_000);
        assert_eq!(completion_ratio(&subject, 100), 1.0);
    }

    #[test]
    fn test_like_and_share_bonuses() {
        let context = ScoringContext::default();
        let base = interaction(2, 0, 0);
        let liked = Interaction { liked: true, ..base.clone() };
        let shared = Interaction { shared: true, ..base.clone() };

        let base_score = calculate_score(&base, 0, &context);
        assert_eq!(calculate_score(&liked, 0, &context), base_score + context.like_bonus);
        assert_eq!(calculate_score(&shared, 0, &context), base_score + context.share_bonus);
    }

    #[test]
    fn test_score_never_negative() {
        let context = ScoringContext::default();
        let hated = interaction(1, 1000, 0);
        let score = calculate_score(&hated, 180, &context);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_context_changes_are_not_served_from_cache() {
        let subject = interaction(4, 0, 0);
        let default_score = calculate_score(&subject, 0, &ScoringContext::default());
        let doubled = ScoringContext {
            play_weight: 2.0,
            ..ScoringContext::default()
        };
        let doubled_score = calculate_score(&subject, 0, &doubled);
        assert_eq!(doubled_score, default_score * 2.0);
    }

    #[test]
    fn test_batch_matches_individual_scores() {
        let context = ScoringContext::default();
        let items: Vec<(Interaction, u32)> = (0..50)
            .map(|i| (interaction(i % 13, i % 4, u64::from(i) * 90), 180 + i))
            .collect();

        let batch = batch_calculate_scores(&items, &context);
        assert_eq!(batch.len(), items.len());
        for ((subject, duration), score) in items.iter().zip(batch) {
            assert_eq!(calculate_score(subject, *duration, &context), score);
        }
    }
}
