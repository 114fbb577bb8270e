//! # Curator Performance Benchmarks
//!
//! Benchmarks for the hot paths of playlist generation.
//!
//! ## Benchmark Categories
//!
//! - **Algorithm Performance**: Single and batch interaction scoring
//! - **Hybrid Blending**: Merging collaborative and content candidates
//! - **Radio Composition**: Segment sampling for one artist radio
//! - **Database Operations**: Upserts and generation against SQLite
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench algorithm
//! cargo bench radio
//! ```

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use curator::algorithm::{self, ScoringContext};
use curator::config::EngineConfig;
use curator::db::SqliteStore;
use curator::engine::{Clock, RecommendationEngine, RefreshPolicy};
use curator::hybrid::{self, Candidate, MatchReason};
use curator::model::{Interaction, InteractionEvent, PlaylistDraft, PlaylistKey, PlaylistType, Track};
use curator::radio;
use curator::store::RecommendationStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;
use tempfile::TempDir;

fn create_test_interactions(count: usize) -> Vec<(Interaction, u32)> {
    (1..=count)
        .map(|i| {
            let plays = u32::try_from(i % 50).unwrap_or(0);
            let interaction = Interaction {
                play_count: plays,
                skip_count: plays / 5,
                listen_time_secs: u64::from(plays) * 150,
                liked: i % 20 == 0,
                shared: i % 45 == 0,
                ..Interaction::new(1, i64::try_from(i).unwrap_or(0), Utc::now())
            };
            (interaction, 180 + u32::try_from(i % 120).unwrap_or(0))
        })
        .collect()
}

fn create_test_tracks(artist: i64, genre: i64, count: i64) -> Vec<Track> {
    let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|n| Track {
            id: artist * 10_000 + n,
            title: format!("Song {n:04}"),
            duration_secs: 200,
            artist_ids: vec![artist],
            genre_ids: vec![genre],
            album_id: None,
            play_count: 0,
            created_at: created + Duration::minutes(n),
            cover: None,
            active: true,
        })
        .collect()
}

fn create_candidates(count: usize, offset: i64, reason: MatchReason) -> Vec<Candidate> {
    (0..count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let score = 1.0 / (i as f64 + 1.0);
            Candidate::new(offset + i64::try_from(i).unwrap_or(0), score, score, reason)
        })
        .collect()
}

/// Benchmark algorithm scoring performance
fn benchmark_algorithm_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("algorithm_scoring");
    let context = ScoringContext::default();

    let (single, duration) = create_test_interactions(7).pop().unwrap();
    group.bench_function("single_interaction_score", |b| {
        b.iter(|| algorithm::calculate_score(black_box(&single), black_box(duration), black_box(&context)))
    });

    for size in [10, 100, 1000, 5000] {
        let interactions = create_test_interactions(size);
        group.bench_with_input(BenchmarkId::new("batch_scoring", size), &interactions, |b, interactions| {
            b.iter(|| algorithm::batch_calculate_scores(black_box(interactions), black_box(&context)))
        });
    }

    group.finish();
}

/// Benchmark hybrid blending
fn benchmark_hybrid_blend(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_blend");

    for size in [50, 200, 1000] {
        // Half of each list overlaps with the other.
        let collaborative = create_candidates(size, 0, MatchReason::Collaborative);
        let content = create_candidates(size, i64::try_from(size / 2).unwrap_or(0), MatchReason::ContentBased);
        group.bench_with_input(
            BenchmarkId::new("blend", size),
            &(collaborative, content),
            |b, (collaborative, content)| {
                b.iter(|| hybrid::blend(black_box(collaborative), black_box(content), 0.6, 0.4, 30))
            },
        );
    }

    group.finish();
}

/// Benchmark radio composition
fn benchmark_radio_composition(c: &mut Criterion) {
    let mut group = c.benchmark_group("radio_composition");

    let seed = create_test_tracks(1, 7, 60);
    let related: Vec<Track> = (2..=10).flat_map(|artist| create_test_tracks(artist, 7, 40)).collect();
    let genre_pool: Vec<Track> = (11..=15).flat_map(|artist| create_test_tracks(artist, 7, 20)).collect();

    group.bench_function("compose_artist_radio", |b| {
        b.iter_batched(
            || StdRng::seed_from_u64(42),
            |mut rng| {
                radio::compose_artist_radio(
                    1,
                    black_box(&seed),
                    black_box(&related),
                    black_box(&genre_pool),
                    25,
                    0.6,
                    &mut rng,
                )
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Benchmark database operations
fn benchmark_database_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("database_operations");
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = SqliteStore::open(&temp_dir.path().join("bench.db")).expect("Failed to open database");
    for listener in 1..=20 {
        store
            .insert_listener(listener, &format!("listener {listener}"), true)
            .expect("Failed to insert listener");
    }
    for artist in 1..=20 {
        store
            .insert_artist(artist, &format!("Artist {artist}"))
            .expect("Failed to insert artist");
        for track in create_test_tracks(artist, artist % 4, 50) {
            store.insert_track(&track).expect("Failed to insert track");
        }
    }

    let draft = PlaylistDraft {
        key: PlaylistKey::system(PlaylistType::TrendingWeekly),
        name: PlaylistType::TrendingWeekly.display_name().to_string(),
        track_ids: (10_000..10_050).collect(),
        cover: PlaylistType::TrendingWeekly.default_cover(),
    };
    group.bench_function("upsert_playlist", |b| {
        b.iter(|| store.upsert_playlist(black_box(&draft), now).expect("Upsert failed"))
    });

    let engine = RecommendationEngine::new(store, EngineConfig::default())
        .with_seed(7)
        .with_clock(Clock::Fixed(now));
    for listener in 1..=20 {
        for track in 0..10 {
            engine
                .record_interaction(
                    listener,
                    ((listener + track) % 20 + 1) * 10_000 + track,
                    InteractionEvent::Play { listen_time_secs: None },
                )
                .expect("Failed to record play");
        }
    }

    group.bench_function("refresh_personal_playlists", |b| {
        b.iter(|| {
            engine
                .refresh_personal_playlists(black_box(3), RefreshPolicy::Always)
                .expect("Refresh failed")
        })
    });

    let config = engine.config().radio.clone();
    let index = radio::RelatedArtistIndex::from_history(engine.store(), 3, now, &config)
        .expect("Failed to index history");
    group.bench_function("artist_radio_draft", |b| {
        b.iter_batched(
            || StdRng::seed_from_u64(42),
            |mut rng| {
                radio::build_radio_draft(engine.store(), 3, black_box(5), &index, &config, &mut rng)
                    .expect("Radio failed")
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_algorithm_scoring,
    benchmark_hybrid_blend,
    benchmark_radio_composition,
    benchmark_database_operations
);
criterion_main!(benches);
