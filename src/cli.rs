//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `curator` binary. Every command maps onto
//! one engine or batch operation, so a scheduler (cron, systemd timers) can
//! drive the same entry points an operator runs by hand.
//!
//! ## Examples
//!
//! ```bash
//! curator import catalog.json
//! curator refresh-system
//! curator record 1 42 play --listen-time 180
//! curator radios 1 --target 5
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Events accepted by `curator record`.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum EventKind {
    Play,
    Skip,
    Like,
    Unlike,
    Share,
}

impl EventKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Skip => "skip",
            Self::Like => "like",
            Self::Unlike => "unlike",
            Self::Share => "share",
        }
    }
}

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Curator: personalized playlists, charts and artist radio from listening signals")]
#[command(version)]
pub struct Args {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "CURATOR_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true, env = "CURATOR_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Seed for reproducible shuffles
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database schema
    InitDb,

    /// Load a JSON catalog (artists, albums, tracks, listeners, favorites)
    Import {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        catalog: PathBuf,
    },

    /// Regenerate the system charts (trending, new, viral)
    RefreshSystem,

    /// Regenerate the personal mixes of one listener
    RefreshListener {
        listener: i64,

        /// Regenerate even mixes that are still fresh
        #[arg(long)]
        force: bool,
    },

    /// Regenerate the personal mixes of every active listener
    RefreshAll {
        /// Regenerate even mixes that are still fresh
        #[arg(long)]
        force: bool,
    },

    /// Generate (or fetch, when fresh) one artist radio
    Radio { listener: i64, artist: i64 },

    /// Top up a listener's artist radios to a target count
    Radios {
        listener: i64,

        /// Number of fresh radios wanted (defaults to the configured target)
        #[arg(long)]
        target: Option<usize>,
    },

    /// Regenerate every stale artist radio
    SweepRadios,

    /// Record a listener event and rescore the pair
    Record {
        listener: i64,
        track: i64,
        #[arg(value_enum)]
        event: EventKind,

        /// Seconds listened, for plays (defaults to the whole track)
        #[arg(long)]
        listen_time: Option<u64>,
    },

    /// Show a listener's recommendation playlists
    List { listener: i64 },

    /// Generate shell completions
    ///
    /// Usage: curator completion bash > ~/.local/share/bash-completion/completions/curator
    Completion { shell: Shell },

    /// List active listener ids for completion (hidden command)
    #[command(hide = true)]
    CompleteListeners,
}
