//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `--config <path>` on the command line (must exist)
//! 2. `<platform config dir>/driftwall/config.toml`
//! 3. Built-in defaults (everything is optional)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use driftwall_core::{Aggregation, Backend, Direction};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub drift: DriftConfig,
    pub wall: WallConfig,
}

/// State store settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `current` or `experimental`.
    pub backend: Backend,
}

/// Drift analysis settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Score queries that have no retrieval diagnostic.
    pub assume_gold_present: bool,
    /// Analyze episodes on the rayon pool.
    pub parallel: bool,
}

/// Wall search defaults, overridable per invocation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    pub direction: Direction,
    pub mode: Aggregation,
    pub threshold: Option<f64>,
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(p) = explicit {
        if !p.exists() {
            bail!("config file {} does not exist", p.display());
        }
        return read_config(p);
    }

    match default_config_path() {
        Some(p) if p.exists() => read_config(&p),
        _ => Ok(Config::default()),
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    tracing::debug!("loaded config from {}", path.display());
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "driftwall", "driftwall")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Describe the active config path (for `driftwall config`).
pub fn show_config_path(explicit: Option<&Path>) -> String {
    match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
