//! Weighted blending of two ranked candidate lists.

use crate::model::TrackId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Why a track was recommended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchReason {
    Collaborative,
    ContentBased,
    /// Present in both source lists.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub track_id: TrackId,
    pub score: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reason: MatchReason,
}

impl Candidate {
    #[must_use]
    pub fn new(track_id: TrackId, score: f64, confidence: f64, reason: MatchReason) -> Self {
        Self {
            track_id,
            score,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendWeights {
    pub collaborative: f64,
    pub content: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.6,
            content: 0.4,
        }
    }
}

struct Blended {
    candidate: Candidate,
    /// Largest unweighted confidence seen for this track.
    confidence_cap: f64,
}

/// Merge `list_a` and `list_b`, scaling each by its weight.
///
/// A track found in both lists gets `score_a * weight_a + score_b *
/// weight_b`, the same sum for its confidence (never above the larger raw
/// confidence), and [`MatchReason::Both`]. The result is sorted by combined
/// score, highest first with ties on track id, and cut to `limit`.
/// Candidates with a non-finite score are ignored, as are repeats of a
/// track inside the same list.
#[must_use]
pub fn blend(
    list_a: &[Candidate],
    list_b: &[Candidate],
    weight_a: f64,
    weight_b: f64,
    limit: usize,
) -> Vec<Candidate> {
    let mut merged: HashMap<TrackId, Blended> = HashMap::new();
    let mut order: Vec<TrackId> = Vec::new();

    for candidate in dedup(list_a) {
        merged.insert(
            candidate.track_id,
            Blended {
                candidate: Candidate {
                    score: candidate.score * weight_a,
                    confidence: candidate.confidence * weight_a,
                    ..*candidate
                },
                confidence_cap: candidate.confidence,
            },
        );
        order.push(candidate.track_id);
    }

    for candidate in dedup(list_b) {
        match merged.get_mut(&candidate.track_id) {
            Some(existing) => {
                existing.candidate.score += candidate.score * weight_b;
                existing.candidate.confidence += candidate.confidence * weight_b;
                existing.candidate.reason = MatchReason::Both;
                existing.confidence_cap = existing.confidence_cap.max(candidate.confidence);
            }
            None => {
                merged.insert(
                    candidate.track_id,
                    Blended {
                        candidate: Candidate {
                            score: candidate.score * weight_b,
                            confidence: candidate.confidence * weight_b,
                            ..*candidate
                        },
                        confidence_cap: candidate.confidence,
                    },
                );
                order.push(candidate.track_id);
            }
        }
    }

    let mut ranked: Vec<Candidate> = order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .map(|blended| Candidate {
            confidence: blended.candidate.confidence.min(blended.confidence_cap),
            ..blended.candidate
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    ranked.truncate(limit);
    ranked
}

fn dedup(list: &[Candidate]) -> impl Iterator<Item = &Candidate> {
    let mut seen = std::collections::HashSet::new();
    list.iter()
        .filter(|candidate| candidate.score.is_finite())
        .filter(move |candidate| seen.insert(candidate.track_id))
}
