//! # Configuration Module
//!
//! Data directory setup and the tunables of the recommendation engine.
//!
//! ## Data Storage
//!
//! Curator keeps its files in the platform-standard data directory:
//! - Linux: `~/.local/share/curator/`
//! - macOS: `~/Library/Application Support/curator/`
//! - Windows: `%APPDATA%\curator\`
//!
//! `curator.db` holds the catalog, signals and generated playlists.
//! `config.json`, when present, overrides any subset of [`EngineConfig`].

use crate::algorithm::ScoringContext;
use crate::generators::GeneratorConfig;
use crate::profile::ProfileConfig;
use crate::radio::RadioConfig;
use crate::signals::SignalConfig;
use anyhow::{Context, Result};
use log::debug;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "curator";
const DB_FILE: &str = "curator.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the platform-appropriate data directory for Curator, creating
/// it if needed.
///
/// # Errors
///
/// If the system data directory cannot be determined or the `curator`
/// subdirectory cannot be created.
///
/// # Examples
///
/// ```no_run
/// use curator::config::get_data_dir;
///
/// let data_dir = get_data_dir()?;
/// println!("Data directory: {}", data_dir.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create Curator data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Default database location: `<data dir>/curator/curator.db`.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Default engine config location: `<data dir>/curator/config.json`.
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// Every tunable of the engine. Missing fields in a config file fall back
/// to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringContext,
    pub profile: ProfileConfig,
    pub signals: SignalConfig,
    pub generators: GeneratorConfig,
    pub radio: RadioConfig,
    pub personal: PersonalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalConfig {
    /// Personal mixes older than this are regenerated by a stale-only refresh.
    pub staleness_days: i64,
}

impl Default for PersonalConfig {
    fn default() -> Self {
        Self { staleness_days: 7 }
    }
}

/// Read an [`EngineConfig`] from a JSON file, or use the defaults when the
/// file does not exist.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        debug!("No engine config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read engine config {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid engine config in {}", path.display()))?;
    debug!("Loaded engine config from {}", path.display());
    Ok(config)
}

/// Where the binary reads and writes its files.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl RuntimeConfig {
    /// Explicit paths win over the platform defaults. Relative paths are
    /// made absolute against the working directory.
    pub fn from_overrides(db_path: Option<&Path>, config_path: Option<&Path>) -> Result<Self> {
        let db_path = match db_path {
            Some(path) => absolute(path)?,
            None => get_db_path()?,
        };
        let config_path = match config_path {
            Some(path) => absolute(path)?,
            None => get_config_path()?,
        };
        Ok(Self {
            db_path,
            config_path,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Cannot resolve path {}", path.display()))?
        .into_owned())
}
