//! # Shell Completion Module
//!
//! Static completion scripts through `clap_complete`, plus the listener ids
//! the hidden `complete-listeners` command prints for dynamic completion.
//!
//! ```bash
//! curator completion bash > ~/.local/share/bash-completion/completions/curator
//! curator completion zsh > ~/.config/zsh/completions/_curator
//! ```

use crate::db::SqliteStore;
use crate::model::ListenerId;
use crate::store::RecommendationStore;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;
use std::path::Path;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Active listener ids in `db_path`. A missing or unreadable database
/// completes to nothing rather than failing the shell.
pub fn get_listener_completions(db_path: &Path) -> Vec<ListenerId> {
    if !db_path.exists() {
        return Vec::new();
    }
    SqliteStore::open(db_path)
        .and_then(|store| store.active_listeners())
        .unwrap_or_default()
}

pub fn print_listener_completions(db_path: &Path) -> Result<()> {
    for listener in get_listener_completions(db_path) {
        println!("{listener}");
    }
    Ok(())
}
