//! Personalized playlists, charts and artist radio built from listening
//! signals.
//!
//! Core modules:
//! - [`algorithm`] - Interaction scoring
//! - [`profile`] - Listener affinity profiles (top genres and artists)
//! - [`signals`] - Trending, new and viral signals plus the cold-start fallback chain
//! - [`hybrid`] - Blending of collaborative and content-based candidates
//! - [`generators`] - One strategy per recommendation playlist type
//! - [`radio`] - Artist radio composition and freshness
//! - [`engine`] - The operations callers use
//! - [`batch`] - Scheduled sweeps over charts and listeners
//!
//! ### Supporting Modules
//!
//! - [`model`] - Shared value types
//! - [`store`] - The persistence trait the engine is written against
//! - [`db`] - SQLite implementation of that trait
//! - [`config`] - Data directory and engine tunables
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use curator::config::EngineConfig;
//! use curator::db::SqliteStore;
//! use curator::engine::{RecommendationEngine, RefreshPolicy};
//! use curator::model::{InteractionEvent, PlaylistType};
//!
//! let store = SqliteStore::open(&curator::config::get_db_path()?)?;
//! let engine = RecommendationEngine::new(store, EngineConfig::default());
//!
//! // Feed a signal in.
//! engine.record_interaction(1, 42, InteractionEvent::Play { listen_time_secs: Some(180) })?;
//!
//! // Charts for everyone, mixes and radios for one listener.
//! engine.generate_system_playlist(PlaylistType::TrendingWeekly)?;
//! let mixes = engine.refresh_personal_playlists(1, RefreshPolicy::IfStale)?;
//! let radios = engine.artist_radios(1, 5)?;
//! println!("{} mixes, {} new radios", mixes.len(), radios.generated);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Scoring
//!
//! Each (listener, track) pair keeps play, skip and listen-time counters
//! plus liked/shared flags. The affinity score grows logarithmically with
//! plays, is amplified by how much of the track was heard, loses a fixed
//! amount per skip and gains fixed bonuses for likes and shares. It is
//! recomputed from the counters on every event.
//!
//! ## Sparse Data
//!
//! Nothing fails because a listener is new or the catalog is thin. Personal
//! mixes walk a fallback chain (primary signal, tracks new in the last 30
//! days, in the last 90 days, any active track) and charts with nothing to
//! show are simply not written.

pub mod algorithm;
pub mod batch;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod generators;
pub mod hybrid;
pub mod model;
pub mod profile;
pub mod radio;
pub mod signals;
pub mod store;
