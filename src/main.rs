//! # Curator
//!
//! Operator entry point of the recommendation engine. Each subcommand runs
//! one engine or batch operation against the SQLite database and exits;
//! scheduling is left to cron or systemd timers.
//!
//! ```bash
//! curator init-db
//! curator import catalog.json
//! curator refresh-system
//! curator refresh-all
//! curator sweep-radios
//! ```
//!
//! Logging is controlled with `RUST_LOG`, e.g. `RUST_LOG=curator=debug`.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use curator::batch::{self, BatchReport};
use curator::cli::{Args, Command};
use curator::completion;
use curator::config::{self, RuntimeConfig};
use curator::db::{CatalogFixture, SqliteStore};
use curator::engine::{RecommendationEngine, RefreshPolicy};
use curator::model::{InteractionEvent, Playlist};
use log::info;
use std::fs;

fn print_playlist(playlist: &Playlist) {
    println!(
        "{:>5}  {:<20} {:<28} {:>3} tracks  updated {}",
        playlist.id,
        playlist.playlist_type,
        playlist.name,
        playlist.track_ids.len(),
        playlist.updated_at.format("%Y-%m-%d %H:%M")
    );
}

fn print_report(report: &BatchReport) {
    println!("{report}");
    for (item, error) in &report.failed {
        eprintln!("  {item}: {error}");
    }
}

fn policy(force: bool) -> RefreshPolicy {
    if force {
        RefreshPolicy::Always
    } else {
        RefreshPolicy::IfStale
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let runtime = RuntimeConfig::from_overrides(args.db.as_deref(), args.config.as_deref())?;

    match args.command {
        Command::Completion { shell } => {
            let mut cmd = Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
            return Ok(());
        }
        Command::CompleteListeners => return completion::print_listener_completions(&runtime.db_path),
        _ => {}
    }

    let engine_config = config::load_engine_config(&runtime.config_path)?;
    let default_target = engine_config.radio.default_target;
    let store = SqliteStore::open(&runtime.db_path)?;
    let mut engine = RecommendationEngine::new(store, engine_config);
    if let Some(seed) = args.seed {
        engine = engine.with_seed(seed);
    }

    match args.command {
        Command::InitDb => {
            println!("Database ready at {}", runtime.db_path.display());
        }
        Command::Import { catalog } => {
            let raw = fs::read_to_string(&catalog)
                .with_context(|| format!("Failed to read catalog {}", catalog.display()))?;
            let fixture: CatalogFixture = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid catalog in {}", catalog.display()))?;
            engine.store().import_catalog(&fixture)?;
            info!("Imported catalog from {}", catalog.display());
            println!(
                "Imported {} tracks, {} listeners",
                fixture.tracks.len(),
                fixture.listeners.len()
            );
        }
        Command::RefreshSystem => {
            print_report(&batch::refresh_system_playlists(&engine));
        }
        Command::RefreshListener { listener, force } => {
            for playlist in engine.refresh_personal_playlists(listener, policy(force))? {
                print_playlist(&playlist);
            }
        }
        Command::RefreshAll { force } => {
            print_report(&batch::refresh_all_personal(&engine, policy(force))?);
        }
        Command::Radio { listener, artist } => {
            print_playlist(&engine.generate_artist_radio(listener, artist)?);
        }
        Command::Radios { listener, target } => {
            let report = engine.artist_radios(listener, target.unwrap_or(default_target))?;
            for playlist in &report.radios {
                print_playlist(playlist);
            }
            println!("{} generated, {} failed", report.generated, report.failed);
        }
        Command::SweepRadios => {
            print_report(&batch::sweep_stale_radios(&engine)?);
        }
        Command::Record {
            listener,
            track,
            event,
            listen_time,
        } => {
            let event = InteractionEvent::parse(event.name(), listen_time)?;
            match engine.record_interaction(listener, track, event)? {
                Some(interaction) => println!(
                    "listener {listener} / track {track}: {} plays, {} skips, score {:.3}",
                    interaction.play_count, interaction.skip_count, interaction.affinity_score
                ),
                None => println!("Unknown listener or track, nothing recorded"),
            }
        }
        Command::List { listener } => {
            for playlist in engine.recommendations_for(listener)? {
                print_playlist(&playlist);
            }
        }
        Command::Completion { .. } | Command::CompleteListeners => {}
    }

    Ok(())
}
